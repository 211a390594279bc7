//! Command handlers: one tagged command in, one reply payload out.
//!
//! Engine failures become `Exx` replies and the session continues; transport
//! failures propagate as errors and end the session (the server stays up).

use log::{debug, warn};

use super::{GdbStub, MAX_PACKET_SIZE, THREAD_INFO_CHUNK};
use crate::error::Error;
use crate::protocol::hex::encode_hex_buf;
use crate::protocol::{ClientFeatures, Command, ResponseWriter};
use crate::protocol::commands::ThreadSelector;
use crate::riscv;

/// Wire register numbering: 0..=31 GPRs, 32 PC, 33..=41 the exposed CSRs.
const REGNO_PC: u32 = 32;
const REGNO_CSR_BASE: u32 = 33;
const REGNO_LAST: u32 = REGNO_CSR_BASE + riscv::GDB_CSRS.len() as u32 - 1;

impl GdbStub<'_> {
    pub(super) fn handle_command(
        &mut self,
        cmd: Command,
        interrupt: &mut dyn FnMut() -> bool,
    ) -> Result<String, Error> {
        match cmd {
            Command::QSupported(features) => {
                self.client_features = features;
                let mut reply = format!(
                    "PacketSize={};qXfer:features:read+;",
                    MAX_PACKET_SIZE
                );
                if features.contains(ClientFeatures::SWBREAK) {
                    reply.push_str("swbreak+;");
                }
                Ok(reply)
            }

            Command::QAttached => {
                self.attached = true;
                Ok("1".to_string())
            }

            Command::HaltReason => Ok("S05".to_string()),

            Command::Detach => {
                self.attached = false;
                // Let the target run free once the debugger lets go.
                Self::reply_or(self.engine.resume_all().map(|_| "OK".to_string()), "E01")
            }

            Command::ReadRegs => {
                let r = self.read_register_bank();
                Self::reply_or(r, "E01")
            }

            Command::WriteRegs(bytes) => {
                let r = self.write_register_bank(&bytes);
                Self::reply_or(r, "E03")
            }

            Command::ReadReg(regno) => {
                if regno > REGNO_LAST {
                    warn!("read of invalid register number {}", regno);
                    return Ok("E02".to_string());
                }
                let r = self.read_wire_register(regno).map(|v| {
                    let mut w = ResponseWriter::new();
                    w.write_word_le(v);
                    w.payload().to_string()
                });
                Self::reply_or(r, "E02")
            }

            Command::WriteReg { regno, value } => {
                if (REGNO_CSR_BASE..=REGNO_LAST).contains(&regno) {
                    // The exposed Vortex CSRs are read-only.
                    return Ok("E03".to_string());
                }
                if regno > REGNO_LAST {
                    return Ok("E01".to_string());
                }
                let r = if regno == REGNO_PC {
                    self.engine.write_pc(value)
                } else {
                    self.engine.write_gpr(regno as u8, value)
                };
                Self::reply_or(r.map(|_| "OK".to_string()), "E03")
            }

            Command::ReadMem { addr, len } => {
                let r = self
                    .engine
                    .read_mem(addr, len as usize)
                    .map(|bytes| encode_hex_buf(&bytes));
                Self::reply_or(r, "E03")
            }

            Command::WriteMem { addr, len, data } => {
                if len as usize != data.len() {
                    warn!(
                        "memory write length mismatch: {} declared, {} supplied",
                        len,
                        data.len()
                    );
                    return Ok("E02".to_string());
                }
                let r = self.engine.write_mem(addr, &data).map(|_| "OK".to_string());
                Self::reply_or(r, "E03")
            }

            Command::Continue { addr } => {
                let r = self.do_continue(addr, interrupt);
                Self::reply_or(r.map(|_| "S05".to_string()), "E03")
            }

            Command::Step { addr } => {
                let r = self.do_step(addr);
                Self::reply_or(r.map(|_| "S05".to_string()), "E03")
            }

            Command::InsertBreakpoint { kind, addr } => match kind {
                // Software and "hardware" breakpoints both patch ebreak.
                0 | 1 => Self::reply_or(
                    self.engine.set_breakpoint(addr).map(|_| "OK".to_string()),
                    "E03",
                ),
                _ => Ok(String::new()),
            },

            Command::RemoveBreakpoint { kind, addr } => match kind {
                0 | 1 => Self::reply_or(
                    self.engine.remove_breakpoint(addr).map(|_| "OK".to_string()),
                    "E03",
                ),
                _ => Ok(String::new()),
            },

            Command::ThreadInfoFirst => {
                self.thread_cursor = 0;
                Ok(self.thread_info_chunk())
            }

            Command::ThreadInfoNext => Ok(self.thread_info_chunk()),

            Command::ThreadExtraInfo(gtid) => {
                let Some((wid, tid)) = self.gtid_to_pair(gtid) else {
                    return Ok("E01".to_string());
                };
                let r = self.engine.warp_state(wid).map(|halted| {
                    let desc = format!(
                        "warp {}, thread {} ({})",
                        wid,
                        tid,
                        if halted { "halted" } else { "running" }
                    );
                    encode_hex_buf(desc.as_bytes())
                });
                Self::reply_or(r, "E01")
            }

            Command::SetThread { op, thread } => {
                debug!("H{} -> {:?}", op, thread);
                match thread {
                    // "all"/"any" carry no specific target; acknowledge and
                    // keep the current selection.
                    ThreadSelector::All | ThreadSelector::Any => Ok("OK".to_string()),
                    ThreadSelector::Id(gtid) => {
                        let Some((wid, tid)) = self.gtid_to_pair(gtid) else {
                            return Ok("E01".to_string());
                        };
                        Self::reply_or(
                            self.engine
                                .select_warp_thread(wid, tid)
                                .map(|_| "OK".to_string()),
                            "E01",
                        )
                    }
                }
            }

            Command::ThreadAlive(thread) => match thread {
                ThreadSelector::All | ThreadSelector::Any => Ok("OK".to_string()),
                ThreadSelector::Id(gtid) => {
                    let Some((wid, _)) = self.gtid_to_pair(gtid) else {
                        return Ok("E01".to_string());
                    };
                    let r = self.engine.warp_status(false, false).map(|status| {
                        if status.get(&wid).map_or(false, |s| s.active) {
                            "OK".to_string()
                        } else {
                            "E01".to_string()
                        }
                    });
                    Self::reply_or(r, "E01")
                }
            },

            Command::XferFeaturesRead { annex, offset, len } => {
                if annex != "target.xml" {
                    warn!("request for unknown feature annex {:?}", annex);
                    return Ok("E00".to_string());
                }
                Ok(self.xml_chunk(offset, len))
            }

            Command::Unknown(body) => {
                if body != "vMustReplyEmpty" {
                    debug!("unsupported command {:?}", body);
                }
                Ok(String::new())
            }
        }
    }

    /// Engine errors become an error-code reply; transport errors are fatal
    /// to the session and propagate.
    fn reply_or(result: Result<String, Error>, code: &str) -> Result<String, Error> {
        match result {
            Ok(payload) => Ok(payload),
            Err(e @ Error::Transport(_)) => Err(e),
            Err(e) => {
                warn!("command failed: {} (rc={})", e, e.code());
                Ok(code.to_string())
            }
        }
    }

    /// The `g` bank: 32 GPRs, PC, then the exposed Vortex CSRs, each as a
    /// byte-reversed hex word.
    fn read_register_bank(&mut self) -> Result<String, Error> {
        let mut w = ResponseWriter::new();
        for n in 0..32 {
            w.write_word_le(self.engine.read_gpr(n)?);
        }
        w.write_word_le(self.engine.read_pc()?);
        for name in riscv::GDB_CSRS {
            let addr = riscv::csr_addr(name).expect("GDB CSR table entries are known CSRs");
            w.write_word_le(self.engine.read_csr(addr)?);
        }
        Ok(w.payload().to_string())
    }

    /// The `G` bank: parse 32 GPRs and the PC; the trailing CSR image is
    /// accepted but dropped (read-only).
    fn write_register_bank(&mut self, bytes: &[u8]) -> Result<String, Error> {
        if bytes.len() < 33 * 4 {
            return Err(Error::InvalidArg(format!(
                "register bank of {} bytes is too short",
                bytes.len()
            )));
        }
        let mut words = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()));
        for n in 0..32 {
            let value = words.next().expect("length checked above");
            self.engine.write_gpr(n, value)?;
        }
        let pc = words.next().expect("length checked above");
        self.engine.write_pc(pc)?;
        Ok("OK".to_string())
    }

    fn read_wire_register(&mut self, regno: u32) -> Result<u32, Error> {
        match regno {
            0..=31 => self.engine.read_gpr(regno as u8),
            REGNO_PC => self.engine.read_pc(),
            _ => {
                let name = riscv::GDB_CSRS[(regno - REGNO_CSR_BASE) as usize];
                let addr = riscv::csr_addr(name).expect("GDB CSR table entries are known CSRs");
                self.engine.read_csr(addr)
            }
        }
    }

    fn do_step(&mut self, addr: Option<u32>) -> Result<(), Error> {
        if let Some(addr) = addr {
            self.engine.write_pc(addr)?;
        }
        self.engine.step().map(drop)
    }

    fn do_continue(
        &mut self,
        addr: Option<u32>,
        interrupt: &mut dyn FnMut() -> bool,
    ) -> Result<(), Error> {
        if let Some(addr) = addr {
            self.engine.write_pc(addr)?;
        }
        let (wid, _) = self.engine.selected_warp_thread().ok_or(Error::NoneSelected)?;
        let stop = self.engine.continue_until_halt(&[wid], interrupt)?;
        debug!("continue stopped: {:?}", stop);
        Ok(())
    }

    /// `m<tid>,<tid>,...` in bounded chunks, then `l`.
    fn thread_info_chunk(&mut self) -> String {
        if self.thread_cursor >= self.threads.len() {
            return "l".to_string();
        }
        let end = (self.thread_cursor + THREAD_INFO_CHUNK).min(self.threads.len());
        let ids: Vec<String> = (self.thread_cursor..end)
            .map(|idx| format!("{:x}", idx + 1))
            .collect();
        self.thread_cursor = end;
        format!("m{}", ids.join(","))
    }

    /// One `qXfer` chunk of the target description, `m`-prefixed when more
    /// follows and `l`-prefixed on the final chunk.
    fn xml_chunk(&self, offset: usize, len: usize) -> String {
        let xml = self.target_xml.as_bytes();
        if offset >= xml.len() {
            return "l".to_string();
        }
        let end = (offset + len).min(xml.len());
        let marker = if end == xml.len() { 'l' } else { 'm' };
        let mut out = String::with_capacity(end - offset + 1);
        out.push(marker);
        out.push_str(std::str::from_utf8(&xml[offset..end]).expect("target xml is ascii"));
        out
    }
}
