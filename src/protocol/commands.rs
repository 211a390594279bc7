//! Parsed RSP commands.
//!
//! Incoming packet bodies are parsed into one tagged [`Command`] value and
//! handled by a single dispatch function in the stub, so every command is
//! unit-testable without a socket or a target.

use bitflags::bitflags;

use super::hex::{decode_hex, decode_hex_buf};

bitflags! {
    /// Features advertised by the GDB client in `qSupported`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClientFeatures: u8 {
        const SWBREAK = 1 << 0;
        const HWBREAK = 1 << 1;
        const XMLREGS = 1 << 2;
    }
}

/// Thread selector carried by `H`/`T` packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSelector {
    /// `-1`: all threads.
    All,
    /// `0`: any thread.
    Any,
    /// A specific global thread id (strictly positive).
    Id(u32),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    QSupported(ClientFeatures),
    QAttached,
    HaltReason,
    Detach,
    ReadRegs,
    /// Register bank image, already hex-decoded to raw wire bytes
    /// (little-endian words back to back).
    WriteRegs(Vec<u8>),
    ReadReg(u32),
    /// `value` is already byte-swapped back into target order.
    WriteReg { regno: u32, value: u32 },
    ReadMem { addr: u32, len: u32 },
    WriteMem { addr: u32, len: u32, data: Vec<u8> },
    Continue { addr: Option<u32> },
    Step { addr: Option<u32> },
    InsertBreakpoint { kind: u8, addr: u32 },
    RemoveBreakpoint { kind: u8, addr: u32 },
    ThreadInfoFirst,
    ThreadInfoNext,
    ThreadExtraInfo(u32),
    /// `Hc<tid>` / `Hg<tid>`.
    SetThread { op: char, thread: ThreadSelector },
    ThreadAlive(ThreadSelector),
    XferFeaturesRead { annex: String, offset: usize, len: usize },
    Unknown(String),
}

#[derive(Debug, PartialEq, Eq)]
pub struct CommandParseError {
    pub body: String,
}

type ParseResult = Result<Command, CommandParseError>;

impl Command {
    /// Parse a packet body. Commands with no registered prefix come back as
    /// [`Command::Unknown`], which the stub answers with an empty packet.
    pub fn parse(body: &[u8]) -> ParseResult {
        let err = || CommandParseError { body: String::from_utf8_lossy(body).into_owned() };

        let text = core::str::from_utf8(body).map_err(|_| err())?;
        let cmd = match body {
            [b'?', ..] => Command::HaltReason,
            [b'D', ..] => Command::Detach,
            [b'g'] => Command::ReadRegs,
            [b'G', hex @ ..] => Command::WriteRegs(decode_hex_buf(hex).ok_or_else(err)?),
            [b'p', hex @ ..] => Command::ReadReg(decode_hex(hex).ok_or_else(err)?),
            [b'P', rest @ ..] => parse_write_reg(rest).ok_or_else(err)?,
            [b'm', rest @ ..] => parse_read_mem(rest).ok_or_else(err)?,
            [b'M', rest @ ..] => parse_write_mem(rest).ok_or_else(err)?,
            [b'c', rest @ ..] => Command::Continue { addr: parse_opt_addr(rest).ok_or_else(err)? },
            [b's', rest @ ..] => Command::Step { addr: parse_opt_addr(rest).ok_or_else(err)? },
            [b'Z', rest @ ..] => parse_breakpoint(rest, true).ok_or_else(err)?,
            [b'z', rest @ ..] => parse_breakpoint(rest, false).ok_or_else(err)?,
            [b'H', op @ (b'c' | b'g'), rest @ ..] => Command::SetThread {
                op: *op as char,
                thread: parse_thread(rest).ok_or_else(err)?,
            },
            [b'T', rest @ ..] => Command::ThreadAlive(parse_thread(rest).ok_or_else(err)?),
            _ if text == "qfThreadInfo" => Command::ThreadInfoFirst,
            _ if text == "qsThreadInfo" => Command::ThreadInfoNext,
            _ if text.starts_with("qThreadExtraInfo,") => {
                let tid = &body["qThreadExtraInfo,".len()..];
                Command::ThreadExtraInfo(decode_hex(tid).ok_or_else(err)?)
            }
            _ if text.starts_with("qSupported") => parse_q_supported(text),
            _ if text.starts_with("qAttached") => Command::QAttached,
            _ if text.starts_with("qXfer:features:read:") => {
                parse_xfer(&text["qXfer:features:read:".len()..]).ok_or_else(err)?
            }
            _ => Command::Unknown(text.to_string()),
        };
        Ok(cmd)
    }
}

fn parse_q_supported(text: &str) -> Command {
    let mut features = ClientFeatures::empty();
    if let Some(args) = text.strip_prefix("qSupported:") {
        for feat in args.split(';') {
            match feat {
                "swbreak+" => features |= ClientFeatures::SWBREAK,
                "hwbreak+" => features |= ClientFeatures::HWBREAK,
                "xmlRegisters=i386" | "xmlRegisters=riscv" => features |= ClientFeatures::XMLREGS,
                _ => {}
            }
        }
    }
    Command::QSupported(features)
}

/// `P<regno>=<value8>`
fn parse_write_reg(rest: &[u8]) -> Option<Command> {
    let eq = rest.iter().position(|&b| b == b'=')?;
    let regno = decode_hex(&rest[..eq])?;
    let bytes = decode_hex_buf(&rest[eq + 1..])?;
    let value = u32::from_le_bytes(bytes.try_into().ok()?);
    Some(Command::WriteReg { regno, value })
}

/// `m<addr>,<len>`
fn parse_read_mem(rest: &[u8]) -> Option<Command> {
    let comma = rest.iter().position(|&b| b == b',')?;
    Some(Command::ReadMem {
        addr: decode_hex(&rest[..comma])?,
        len: decode_hex(&rest[comma + 1..])?,
    })
}

/// `M<addr>,<len>:<hex>`
fn parse_write_mem(rest: &[u8]) -> Option<Command> {
    let comma = rest.iter().position(|&b| b == b',')?;
    let colon = rest.iter().position(|&b| b == b':')?;
    if colon < comma {
        return None;
    }
    Some(Command::WriteMem {
        addr: decode_hex(&rest[..comma])?,
        len: decode_hex(&rest[comma + 1..colon])?,
        data: decode_hex_buf(&rest[colon + 1..])?,
    })
}

fn parse_opt_addr(rest: &[u8]) -> Option<Option<u32>> {
    if rest.is_empty() {
        Some(None)
    } else {
        decode_hex(rest).map(Some)
    }
}

/// `Z<type>,<addr>,<kind>` / `z<type>,<addr>,<kind>`
fn parse_breakpoint(rest: &[u8], insert: bool) -> Option<Command> {
    let mut parts = rest.split(|&b| b == b',');
    let kind: u8 = decode_hex(parts.next()?)?;
    let addr: u32 = decode_hex(parts.next()?)?;
    let _bpkind = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(if insert {
        Command::InsertBreakpoint { kind, addr }
    } else {
        Command::RemoveBreakpoint { kind, addr }
    })
}

fn parse_thread(rest: &[u8]) -> Option<ThreadSelector> {
    match rest {
        b"-1" => Some(ThreadSelector::All),
        b"0" => Some(ThreadSelector::Any),
        id => decode_hex(id).map(ThreadSelector::Id),
    }
}

/// `<annex>:<offset>,<length>`
fn parse_xfer(rest: &str) -> Option<Command> {
    let (annex, range) = rest.split_once(':')?;
    let (offset, len) = range.split_once(',')?;
    Some(Command::XferFeaturesRead {
        annex: annex.to_string(),
        offset: decode_hex(offset.as_bytes())?,
        len: decode_hex(len.as_bytes())?,
    })
}
