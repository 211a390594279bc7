//! Reference transport: line-based ASCII over TCP.
//!
//! Wire format, one command and one response per `\n`-terminated line:
//!
//! ```text
//! p                  -> +P                  (handshake)
//! r<addr4>           -> +<val8> | -
//! w<addr4>:<val8>    -> + | -
//! R<a1>,<a2>,...     -> +<v1>,<v2>,... | -
//! W<a1>,...;<v1>,... -> + | -
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use super::{Transport, TransportError, DEFAULT_TIMEOUT_MS, MAX_BATCH};

/// How long a single socket read blocks before the deadline is re-checked.
const READ_SLICE_MS: u64 = 50;

pub struct TcpTransport {
    stream: Option<TcpStream>,
    /// Bytes received but not yet consumed as a full line.
    rx_buf: Vec<u8>,
    timeout: Duration,
}

impl TcpTransport {
    /// Connect to the debug server and perform the `p` handshake.
    pub fn connect(addr: &str) -> Result<TcpTransport, TransportError> {
        let stream = TcpStream::connect(addr)?;
        // RSP-style chatter is many small lines; Nagle hurts here.
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(Duration::from_millis(READ_SLICE_MS)))?;

        let mut transport = TcpTransport {
            stream: Some(stream),
            rx_buf: Vec::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        };

        let resp = transport.exchange("p")?;
        if resp != "+P" {
            warn!("unexpected handshake response: {:?}", resp);
            return Err(TransportError::Malformed(resp));
        }
        info!("debug transport connected to {}", addr);
        Ok(transport)
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Disconnected)
    }

    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        trace!("TX: {}", line);
        let stream = self.stream()?;
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        Ok(())
    }

    /// Receive one `\n`-terminated line (terminator stripped), enforcing the
    /// configured timeout as a monotonic deadline across partial reads.
    fn recv_line(&mut self) -> Result<String, TransportError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(pos) = self.rx_buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.rx_buf.drain(..=pos).collect();
                line.pop(); // terminator
                let line = String::from_utf8(line)
                    .map_err(|e| TransportError::Malformed(format!("non-utf8 line: {}", e)))?;
                trace!("RX: {}", line);
                return Ok(line);
            }

            let mut tmp = [0u8; 256];
            let stream = self.stream()?;
            match stream.read(&mut tmp) {
                Ok(0) => {
                    self.stream = None;
                    return Err(TransportError::Disconnected);
                }
                Ok(n) => self.rx_buf.extend_from_slice(&tmp[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout);
                    }
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn exchange(&mut self, cmd: &str) -> Result<String, TransportError> {
        self.send_line(cmd)?;
        self.recv_line()
    }

    /// Strip the `+` ack from a response, mapping `-` to NACK.
    fn ack_payload(resp: &str) -> Result<&str, TransportError> {
        match resp.as_bytes().first() {
            Some(b'+') => Ok(&resp[1..]),
            Some(b'-') => Err(TransportError::Nack),
            _ => Err(TransportError::Malformed(resp.to_string())),
        }
    }
}

fn parse_word(s: &str) -> Result<u32, TransportError> {
    u32::from_str_radix(s, 16).map_err(|_| TransportError::Malformed(s.to_string()))
}

impl Transport for TcpTransport {
    fn read_reg(&mut self, addr: u32) -> Result<u32, TransportError> {
        let resp = self.exchange(&format!("r{:04x}", addr))?;
        let payload = Self::ack_payload(&resp)?;
        parse_word(payload)
    }

    fn write_reg(&mut self, addr: u32, data: u32) -> Result<(), TransportError> {
        let resp = self.exchange(&format!("w{:04x}:{:08x}", addr, data))?;
        Self::ack_payload(&resp).map(drop)
    }

    fn read_regs(&mut self, addrs: &[u32]) -> Result<Vec<u32>, TransportError> {
        if addrs.is_empty() {
            return Ok(Vec::new());
        }
        if addrs.len() > MAX_BATCH {
            return Err(TransportError::BatchTooLarge(addrs.len()));
        }

        let cmd: Vec<String> = addrs.iter().map(|a| format!("{:04x}", a)).collect();
        let resp = self.exchange(&format!("R{}", cmd.join(",")))?;
        let payload = Self::ack_payload(&resp)?;

        let words: Result<Vec<u32>, _> = payload.split(',').map(parse_word).collect();
        let words = words?;
        if words.len() != addrs.len() {
            return Err(TransportError::Malformed(format!(
                "batch read: asked for {} words, got {}",
                addrs.len(),
                words.len()
            )));
        }
        Ok(words)
    }

    fn write_regs(&mut self, addrs: &[u32], data: &[u32]) -> Result<(), TransportError> {
        if addrs.is_empty() {
            return Ok(());
        }
        if addrs.len() != data.len() {
            return Err(TransportError::Malformed(format!(
                "batch write: {} addresses but {} values",
                addrs.len(),
                data.len()
            )));
        }
        if addrs.len() > MAX_BATCH {
            return Err(TransportError::BatchTooLarge(addrs.len()));
        }

        let addr_part: Vec<String> = addrs.iter().map(|a| format!("{:04x}", a)).collect();
        let data_part: Vec<String> = data.iter().map(|d| format!("{:08x}", d)).collect();
        let resp =
            self.exchange(&format!("W{};{}", addr_part.join(","), data_part.join(",")))?;
        Self::ack_payload(&resp).map(drop)
    }

    fn send_cmd(&mut self, cmd: &str) -> Result<String, TransportError> {
        self.exchange(cmd)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("closing debug transport");
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}
