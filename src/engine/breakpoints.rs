//! Software breakpoints: patch `ebreak` over the instruction stream and keep
//! the original word so it can be put back.
//!
//! Breakpoints are process-wide; a single `ebreak` traps whichever warp
//! executes that address, independent of the selection mask.

use log::{debug, info};

use super::Engine;
use crate::error::Error;
use crate::regs::{DmReg, HaltCause};

/// One patched instruction address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub addr: u32,
    pub enabled: bool,
    /// The 32-bit instruction word that `ebreak` replaced.
    pub original: u32,
    pub hit_count: u32,
}

/// Why [`Engine::continue_until_halt`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    /// Halted by an `ebreak` at a recorded breakpoint address.
    Breakpoint { addr: u32 },
    /// Halted for some other reason.
    Halted { cause: HaltCause, pc: u32 },
    /// The caller's interrupt predicate fired; the warps were re-halted.
    Interrupted,
}

impl Engine {
    /// Patch an `ebreak` over the word at `addr`. Idempotent: setting an
    /// already-enabled breakpoint is a no-op.
    pub fn set_breakpoint(&mut self, addr: u32) -> Result<(), Error> {
        if addr % 4 != 0 {
            return Err(Error::InvalidArg(format!(
                "breakpoint address {:#010x} is not word-aligned",
                addr
            )));
        }
        if self.breakpoints.get(&addr).map_or(false, |bp| bp.enabled) {
            return Ok(());
        }

        let original = self.read_mem(addr, 4)?;
        let original = u32::from_le_bytes(original.as_slice().try_into().unwrap());

        let words = self
            .asm
            .assemble(&["ebreak"])
            .map_err(|e| Error::Failed(format!("assembly of ebreak failed: {}", e)))?;
        let [ebreak] = words.as_slice() else {
            return Err(Error::Failed(format!(
                "ebreak assembled to {} words, expected 1",
                words.len()
            )));
        };

        self.write_mem(addr, &ebreak.to_le_bytes())?;
        self.breakpoints.insert(
            addr,
            Breakpoint { addr, enabled: true, original, hit_count: 0 },
        );
        info!("breakpoint set at {:#010x} (was {:#010x})", addr, original);
        Ok(())
    }

    /// Restore the original word at `addr`. Removing a missing or disabled
    /// breakpoint is a no-op.
    pub fn remove_breakpoint(&mut self, addr: u32) -> Result<(), Error> {
        let Some(bp) = self.breakpoints.get(&addr).copied() else {
            return Ok(());
        };
        if bp.enabled {
            self.write_mem(addr, &bp.original.to_le_bytes())?;
        }
        self.breakpoints.remove(&addr);
        info!("breakpoint removed from {:#010x}", addr);
        Ok(())
    }

    pub fn any_breakpoints(&self) -> bool {
        !self.breakpoints.is_empty()
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn breakpoint_at(&self, addr: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&addr)
    }

    /// Resume `wids` and block until some warp halts or `interrupted`
    /// returns true.
    ///
    /// There is deliberately no overall deadline: a continue may legitimately
    /// run forever. The poll cadence is the engine's poll delay, and the
    /// interrupt predicate is consulted between polls; on interrupt the
    /// warps are re-halted. When the stop is an `ebreak` at a recorded
    /// breakpoint address, that breakpoint's hit count is incremented.
    pub fn continue_until_halt(
        &mut self,
        wids: &[u32],
        mut interrupted: impl FnMut() -> bool,
    ) -> Result<StopEvent, Error> {
        self.resume_warps(wids)?;
        debug!("resumed {:?}, waiting for a halt...", wids);

        loop {
            if self.dm_rd_field(DmReg::Dctrl, "anyhalted")? != 0 {
                break;
            }
            if interrupted() {
                info!("continue interrupted by client");
                self.halt_warps(wids)?;
                return Ok(StopEvent::Interrupted);
            }
            std::thread::sleep(self.poll_delay);
        }

        // Classify the stop from the selected thread's point of view.
        self.require_selection()?;
        let cause = HaltCause::from_raw(self.dm_rd_field(DmReg::Dctrl, "hacause")?);
        let pc = self.dm_rd(DmReg::Dpc)?;
        self.selected_pc = pc;

        if cause == HaltCause::Ebreak {
            if let Some(bp) = self.breakpoints.get_mut(&pc) {
                if bp.enabled {
                    bp.hit_count += 1;
                    debug!("breakpoint at {:#010x} hit ({} total)", pc, bp.hit_count);
                    return Ok(StopEvent::Breakpoint { addr: pc });
                }
            }
        }
        Ok(StopEvent::Halted { cause, pc })
    }
}
