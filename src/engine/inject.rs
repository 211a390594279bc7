//! Instruction injection and architectural register access.
//!
//! GPRs move through the `vx_dscratch` CSR, which the debugger reads and
//! writes as the DM `DSCRATCH` register. CSRs additionally borrow t0,
//! because the ISA has no memory-to-CSR move; every use of a scratch GPR is
//! scoped through [`Engine::with_saved_gpr`] so the register is restored on
//! success and on error alike.

use log::trace;

use super::Engine;
use crate::error::Error;
use crate::regs::DmReg;
use crate::riscv::{self, RegName, CSR_DSCRATCH, T0};

impl Engine {
    pub(crate) fn assemble_one(&mut self, line: &str) -> Result<u32, Error> {
        self.asm
            .assemble_line(line)
            .map_err(|e| Error::Failed(format!("assembly of {:?} failed: {}", line, e)))
    }

    /// Execute one instruction word in the selected thread's context.
    /// The selected warp must be halted.
    pub fn inject_instruction(&mut self, word: u32) -> Result<(), Error> {
        self.require_halted()?;
        self.inject_raw(word)
    }

    /// Assemble a single line and inject it.
    pub fn inject_instruction_asm(&mut self, line: &str) -> Result<(), Error> {
        let word = self.assemble_one(line)?;
        self.inject_instruction(word)
    }

    /// The injection sequence proper. Callers have already validated the
    /// selection and halt state.
    pub(crate) fn inject_raw(&mut self, word: u32) -> Result<(), Error> {
        trace!("inject {:#010x}", word);
        self.dm_wr(DmReg::Dinject, word)?;
        self.dm_wr_field(DmReg::Dctrl, "injectreq", 1)?;
        self.dm_poll_field(DmReg::Dctrl, "injectstate", 0)?;
        Ok(())
    }

    /// Assemble (memoized) and inject, for use inside access sequences.
    pub(crate) fn inject_line(&mut self, line: &str) -> Result<(), Error> {
        let word = self.assemble_one(line)?;
        self.inject_raw(word)
    }

    //==========================================================================
    // GPR access
    //==========================================================================

    /// Read GPR `xN` of the selected (halted) thread.
    pub fn read_gpr(&mut self, n: u8) -> Result<u32, Error> {
        self.check_gpr_index(n)?;
        self.require_halted()?;
        self.read_gpr_raw(n)
    }

    /// Write GPR `xN` of the selected (halted) thread.
    pub fn write_gpr(&mut self, n: u8, value: u32) -> Result<(), Error> {
        self.check_gpr_index(n)?;
        self.require_halted()?;
        self.write_gpr_raw(n, value)
    }

    fn check_gpr_index(&self, n: u8) -> Result<(), Error> {
        if n >= 32 {
            return Err(Error::InvalidArg(format!("GPR index {} out of range", n)));
        }
        Ok(())
    }

    fn read_gpr_raw(&mut self, n: u8) -> Result<u32, Error> {
        self.inject_line(&format!("csrw {:#x}, x{}", CSR_DSCRATCH, n))?;
        self.dm_rd(DmReg::Dscratch)
    }

    fn write_gpr_raw(&mut self, n: u8, value: u32) -> Result<(), Error> {
        self.dm_wr(DmReg::Dscratch, value)?;
        self.inject_line(&format!("csrr x{}, {:#x}", n, CSR_DSCRATCH))
    }

    /// Scoped scratch-register acquisition: saves `xN`, runs `body`, and
    /// restores `xN` no matter how `body` exited. The first error wins.
    pub(crate) fn with_saved_gpr<T>(
        &mut self,
        n: u8,
        body: impl FnOnce(&mut Engine) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let saved = self.read_gpr_raw(n)?;
        let result = body(self);
        let restored = self.write_gpr_raw(n, saved);
        match result {
            Err(e) => Err(e),
            Ok(v) => restored.map(|_| v),
        }
    }

    //==========================================================================
    // CSR access
    //==========================================================================

    /// Read a CSR of the selected (halted) thread, marshaling through t0.
    pub fn read_csr(&mut self, csr: u32) -> Result<u32, Error> {
        self.require_halted()?;
        // The mailbox itself is read directly through the DM; going through
        // t0 would only observe the save/restore traffic.
        if csr == CSR_DSCRATCH {
            return self.dm_rd(DmReg::Dscratch);
        }
        self.with_saved_gpr(T0, |eng| {
            eng.inject_line(&format!("csrr t0, {:#x}", csr))?;
            eng.inject_line(&format!("csrw {:#x}, t0", CSR_DSCRATCH))?;
            eng.dm_rd(DmReg::Dscratch)
        })
    }

    /// Write a CSR of the selected (halted) thread, marshaling through t0.
    pub fn write_csr(&mut self, csr: u32, value: u32) -> Result<(), Error> {
        self.require_halted()?;
        if csr == CSR_DSCRATCH {
            return self.dm_wr(DmReg::Dscratch, value);
        }
        self.with_saved_gpr(T0, |eng| {
            eng.dm_wr(DmReg::Dscratch, value)?;
            eng.inject_line(&format!("csrr t0, {:#x}", CSR_DSCRATCH))?;
            eng.inject_line(&format!("csrw {:#x}, t0", csr))
        })
    }

    //==========================================================================
    // PC access
    //==========================================================================

    pub fn read_pc(&mut self) -> Result<u32, Error> {
        self.require_selection()?;
        let pc = self.dm_rd(DmReg::Dpc)?;
        self.selected_pc = pc;
        Ok(pc)
    }

    pub fn write_pc(&mut self, pc: u32) -> Result<(), Error> {
        self.require_selection()?;
        self.dm_wr(DmReg::Dpc, pc)?;
        self.selected_pc = pc;
        Ok(())
    }

    //==========================================================================
    // Name-addressed register access
    //==========================================================================

    /// Read `pc`, `x0..x31`/ABI names, or a known CSR mnemonic.
    pub fn read_register(&mut self, name: &str) -> Result<u32, Error> {
        match self.resolve_reg(name)? {
            RegName::Pc => self.read_pc(),
            RegName::Gpr(n) => self.read_gpr(n),
            RegName::Csr(addr) => self.read_csr(addr),
        }
    }

    pub fn write_register(&mut self, name: &str, value: u32) -> Result<(), Error> {
        match self.resolve_reg(name)? {
            RegName::Pc => self.write_pc(value),
            RegName::Gpr(n) => self.write_gpr(n, value),
            RegName::Csr(addr) => self.write_csr(addr, value),
        }
    }

    fn resolve_reg(&self, name: &str) -> Result<RegName, Error> {
        riscv::RegName::parse(name)
            .ok_or_else(|| Error::InvalidArg(format!("unknown register name {:?}", name)))
    }
}
