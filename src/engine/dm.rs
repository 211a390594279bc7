//! The DM access layer: register- and field-level reads/writes plus the
//! timed polling primitive every higher operation is built from.

use std::time::Instant;

use log::{debug, trace};

use super::Engine;
use crate::error::Error;
use crate::regs::{self, DmReg};
use crate::transport::{Transport, TransportError};

impl Engine {
    pub(crate) fn transport_mut(&mut self) -> Result<&mut dyn Transport, Error> {
        match self.transport.as_deref_mut() {
            Some(t) if t.is_connected() => Ok(t),
            _ => Err(Error::Transport(TransportError::Disconnected)),
        }
    }

    pub(crate) fn dm_rd(&mut self, reg: DmReg) -> Result<u32, Error> {
        let info = regs::descriptor(reg);
        let value = self.transport_mut()?.read_reg(info.addr)?;
        trace!("rd DM[{:#06x}, {}] => {:#010x}", info.addr, info.name, value);
        Ok(value)
    }

    pub(crate) fn dm_wr(&mut self, reg: DmReg, value: u32) -> Result<(), Error> {
        let info = regs::descriptor(reg);
        self.transport_mut()?.write_reg(info.addr, value)?;
        trace!("wr DM[{:#06x}, {}] <= {:#010x}", info.addr, info.name, value);
        Ok(())
    }

    pub(crate) fn dm_rd_field(&mut self, reg: DmReg, field: &'static str) -> Result<u32, Error> {
        let word = self.dm_rd(reg)?;
        let value = regs::extract(reg, field, word)
            .map_err(|e| Error::InvalidArg(e.to_string()))?;
        trace!("rd DM[{}.{}] => {:#x}", regs::descriptor(reg).name, field, value);
        Ok(value)
    }

    /// Read-modify-write of one field. Bits outside the field are carried
    /// through untouched.
    pub(crate) fn dm_wr_field(
        &mut self,
        reg: DmReg,
        field: &'static str,
        value: u32,
    ) -> Result<(), Error> {
        let current = self.dm_rd(reg)?;
        let updated = regs::insert(reg, field, current, value)
            .map_err(|e| Error::InvalidArg(e.to_string()))?;
        self.dm_wr(reg, updated)?;
        trace!(
            "wr DM[{}.{}] <= {:#x} ({:#010x} -> {:#010x})",
            regs::descriptor(reg).name,
            field,
            value,
            current,
            updated
        );
        Ok(())
    }

    /// Poll a field until it reads back `expected`.
    ///
    /// The budget is the engine's poll parameters expressed as a monotonic
    /// deadline, so slow transports don't stretch the wait. On expiry the
    /// error carries the last observed value.
    pub(crate) fn dm_poll_field(
        &mut self,
        reg: DmReg,
        field: &'static str,
        expected: u32,
    ) -> Result<u32, Error> {
        let deadline = Instant::now() + self.poll_delay * self.poll_retries;
        loop {
            let value = self.dm_rd_field(reg, field)?;
            if value == expected {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                debug!(
                    "poll of {}.{} expired: expected {:#x}, last {:#x}",
                    regs::descriptor(reg).name,
                    field,
                    expected,
                    value
                );
                return Err(Error::Timeout { last: value });
            }
            std::thread::sleep(self.poll_delay);
        }
    }
}
