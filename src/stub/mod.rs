//! The GDB RSP stub: a TCP server translating GDB client packets into
//! warp-control engine calls.

mod handlers;
mod target_xml;

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

use log::{debug, info, trace, warn};

use crate::engine::Engine;
use crate::error::Error;
use crate::protocol::response_writer::frame;
use crate::protocol::{ClientFeatures, Command, Packet};

/// Default RSP listen port.
pub const DEFAULT_GDB_PORT: u16 = 3333;

/// Advertised to the client in `qSupported`.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Ids per `qfThreadInfo`/`qsThreadInfo` chunk.
const THREAD_INFO_CHUNK: usize = 64;

pub struct GdbStub<'e> {
    engine: &'e mut Engine,
    /// Flat map: index `gtid - 1` holds the (warp, thread) pair.
    threads: Vec<(u32, u32)>,
    target_xml: String,
    attached: bool,
    client_features: ClientFeatures,
    thread_cursor: usize,
}

impl<'e> GdbStub<'e> {
    /// Build the stub over an initialized engine. The thread-id map is fixed
    /// at construction from the platform inventory.
    pub fn new(engine: &'e mut Engine) -> Result<GdbStub<'e>, Error> {
        let p = engine.platform()?;
        let mut threads = Vec::with_capacity(p.num_total_threads as usize);
        for wid in 0..p.num_total_warps {
            for tid in 0..p.num_threads {
                threads.push((wid, tid));
            }
        }
        Ok(GdbStub {
            engine,
            threads,
            target_xml: target_xml::build(),
            attached: false,
            client_features: ClientFeatures::empty(),
            thread_cursor: 0,
        })
    }

    /// Global thread ids are strictly positive; zero is reserved.
    fn gtid_to_pair(&self, gtid: u32) -> Option<(u32, u32)> {
        if gtid == 0 {
            return None;
        }
        self.threads.get(gtid as usize - 1).copied()
    }

    /// Accept clients forever. A client disconnect (or a transport failure
    /// inside a session) closes that session; the server keeps listening.
    pub fn serve_forever(&mut self, port: u16) -> Result<(), Error> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| Error::Failed(format!("failed to bind GDB port {}: {}", port, e)))?;
        info!("GDB server listening on port {}", port);

        loop {
            info!("waiting for GDB connection...");
            let (stream, addr) = listener
                .accept()
                .map_err(|e| Error::Failed(format!("accept failed: {}", e)))?;
            info!("GDB client connected from {}", addr);

            match self.run_session(stream) {
                Ok(()) => info!("GDB client disconnected"),
                Err(e) => warn!("GDB session ended: {}", e),
            }
            self.attached = false;
        }
    }

    /// Pump packets for one client until it goes away or the debug transport
    /// dies.
    fn run_session(&mut self, mut stream: TcpStream) -> Result<(), Error> {
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Failed(format!("set_nodelay: {}", e)))?;

        let mut buf = Vec::with_capacity(MAX_PACKET_SIZE);
        loop {
            match recv_frame(&mut stream, &mut buf) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(Error::Failed(format!("client read failed: {}", e))),
            }

            match Packet::from_buf(&buf) {
                Ok(Packet::Ack) => continue,
                Ok(Packet::Nack) => {
                    warn!("client NACKed our last reply");
                    continue;
                }
                Ok(Packet::Interrupt) => {
                    // Synthesize a stop report; an in-progress continue
                    // handles the interrupt byte itself.
                    send_raw(&mut stream, &frame("S05"))?;
                }
                Ok(Packet::Command(body)) => {
                    let body = body.to_vec();
                    send_raw(&mut stream, "+")?;

                    let payload = match Command::parse(&body) {
                        Ok(cmd) => {
                            debug!("cmd: {}", String::from_utf8_lossy(&body));
                            let mut probe = interrupt_probe(&stream);
                            self.handle_command(cmd, &mut probe)?
                        }
                        Err(e) => {
                            warn!("malformed command {:?}", e.body);
                            "E01".to_string()
                        }
                    };
                    send_raw(&mut stream, &frame(&payload))?;
                }
                Err(e) => {
                    warn!("bad packet: {:?}", e);
                    send_raw(&mut stream, "-")?;
                }
            }
        }
    }
}

/// Read one frame into `buf`: a single `+`/`-`/`0x03`, or `$...#cc`.
fn recv_frame(stream: &mut impl Read, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    let header = read_byte(stream)?;
    buf.push(header);
    if header != b'$' {
        return Ok(());
    }
    loop {
        let byte = read_byte(stream)?;
        buf.push(byte);
        if byte == b'#' {
            break;
        }
        if buf.len() > MAX_PACKET_SIZE {
            return Err(std::io::Error::new(ErrorKind::InvalidData, "packet too long"));
        }
    }
    buf.push(read_byte(stream)?);
    buf.push(read_byte(stream)?);
    trace!("<-- {}", String::from_utf8_lossy(buf));
    Ok(())
}

fn read_byte(stream: &mut impl Read) -> std::io::Result<u8> {
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(_) => return Ok(byte[0]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn send_raw(stream: &mut TcpStream, data: &str) -> Result<(), Error> {
    trace!("--> {}", data);
    stream
        .write_all(data.as_bytes())
        .map_err(|e| Error::Failed(format!("client write failed: {}", e)))
}

/// A predicate that fires when the client has queued an interrupt byte.
/// Consulted between polls of a blocking continue.
fn interrupt_probe(stream: &TcpStream) -> impl FnMut() -> bool + '_ {
    move || {
        let mut byte = [0u8; 1];
        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let pending = matches!(stream.peek(&mut byte), Ok(1) if byte[0] == 0x03);
        if pending {
            // Consume it so it is not replayed between packets.
            let _ = (&*stream).read(&mut byte);
        }
        let _ = stream.set_nonblocking(false);
        pending
    }
}
