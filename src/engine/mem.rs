//! Memory access through injected load/store sequences.
//!
//! t0 holds the pointer and t1 the data word; both are saved and restored
//! around every operation. Words travel through the DSCRATCH mailbox and are
//! little-endian: byte 0 of a word is its least-significant octet.

use log::debug;

use super::Engine;
use crate::error::Error;
use crate::regs::DmReg;
use crate::riscv::{CSR_DSCRATCH, T0, T1};

impl Engine {
    /// Load t0 with `addr` via the mailbox.
    fn set_pointer(&mut self, addr: u32) -> Result<(), Error> {
        self.dm_wr(DmReg::Dscratch, addr)?;
        self.inject_line(&format!("csrr t0, {:#x}", CSR_DSCRATCH))
    }

    /// Fetch the word t0 points at into the mailbox and return it.
    fn fetch_word(&mut self) -> Result<u32, Error> {
        self.inject_line("lw t1, 0(t0)")?;
        self.inject_line(&format!("csrw {:#x}, t1", CSR_DSCRATCH))?;
        self.dm_rd(DmReg::Dscratch)
    }

    /// Store `word` at the address t0 points at.
    fn store_word(&mut self, word: u32) -> Result<(), Error> {
        self.dm_wr(DmReg::Dscratch, word)?;
        self.inject_line(&format!("csrr t1, {:#x}", CSR_DSCRATCH))?;
        self.inject_line("sw t1, 0(t0)")
    }

    fn advance_pointer(&mut self) -> Result<(), Error> {
        self.inject_line("addi t0, t0, 4")
    }

    /// Read `nbytes` starting at `addr`, any alignment.
    pub fn read_mem(&mut self, addr: u32, nbytes: usize) -> Result<Vec<u8>, Error> {
        if nbytes == 0 {
            return Ok(Vec::new());
        }
        self.require_halted()?;
        debug!("read_mem {:#010x} +{}", addr, nbytes);

        let start = addr & !3;
        let end = addr
            .checked_add(nbytes as u32)
            .and_then(|e| e.checked_add(3))
            .ok_or_else(|| Error::InvalidArg("memory range wraps the address space".into()))?
            & !3;

        let mut buf = Vec::with_capacity((end - start) as usize);
        self.with_saved_gpr(T0, |eng| {
            eng.with_saved_gpr(T1, |eng| {
                eng.set_pointer(start)?;
                let mut word_addr = start;
                while word_addr < end {
                    let word = eng.fetch_word()?;
                    buf.extend_from_slice(&word.to_le_bytes());
                    eng.advance_pointer()?;
                    word_addr += 4;
                }
                Ok(())
            })
        })?;

        let lead = (addr - start) as usize;
        buf.drain(..lead);
        buf.truncate(nbytes);
        Ok(buf)
    }

    /// Write `data` starting at `addr`, any alignment. Bytes outside
    /// `[addr, addr + data.len())` are preserved via read-modify-write of
    /// the partial edge words.
    pub fn write_mem(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        self.require_halted()?;
        debug!("write_mem {:#010x} +{}", addr, data.len());

        let end = addr
            .checked_add(data.len() as u32)
            .ok_or_else(|| Error::InvalidArg("memory range wraps the address space".into()))?;

        self.with_saved_gpr(T0, |eng| {
            eng.with_saved_gpr(T1, |eng| {
                let mut cur = addr;
                let mut data = data;

                // Leading partial word.
                if cur % 4 != 0 {
                    let base = cur & !3;
                    let take = ((base + 4).min(end) - cur) as usize;
                    eng.set_pointer(base)?;
                    let mut word = eng.fetch_word()?.to_le_bytes();
                    word[(cur - base) as usize..(cur - base) as usize + take]
                        .copy_from_slice(&data[..take]);
                    eng.store_word(u32::from_le_bytes(word))?;
                    cur += take as u32;
                    data = &data[take..];
                }

                // Middle full words.
                if end - cur >= 4 {
                    eng.set_pointer(cur)?;
                    while end - cur >= 4 {
                        let (word, rest) = data.split_at(4);
                        eng.store_word(u32::from_le_bytes(word.try_into().unwrap()))?;
                        eng.advance_pointer()?;
                        cur += 4;
                        data = rest;
                    }
                }

                // Trailing partial word.
                if cur < end {
                    eng.set_pointer(cur)?;
                    let mut word = eng.fetch_word()?.to_le_bytes();
                    word[..data.len()].copy_from_slice(data);
                    eng.store_word(u32::from_le_bytes(word))?;
                }
                Ok(())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::engine_over;
    use crate::engine::Engine;
    use crate::transport::mock::MockDm;

    fn engine_with_mem(words: &[(u32, u32)]) -> Engine {
        let mut mock = MockDm::scenario_a();
        for &(addr, word) in words {
            mock.set_mem_word(addr, word);
        }
        let mut e = engine_over(mock);
        e.halt_all().unwrap();
        e.select_warp_thread(0, 0).unwrap();
        e
    }

    fn mem_word(e: &mut Engine, addr: u32) -> u32 {
        let bytes = e.read_mem(addr, 4).unwrap();
        u32::from_le_bytes(bytes.try_into().unwrap())
    }

    #[test]
    fn zero_length_read_is_empty_and_free() {
        let mut e = engine_with_mem(&[]);
        assert_eq!(e.read_mem(0x1000, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn aligned_word_read() {
        let mut e = engine_with_mem(&[(0x1000, 0x4433_2211)]);
        assert_eq!(e.read_mem(0x1000, 4).unwrap(), vec![0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn unaligned_read_spanning_words() {
        let mut e = engine_with_mem(&[(0x1000, 0x4433_2211), (0x1004, 0x8877_6655)]);
        // Bytes 1..6: tail of the first word plus head of the second.
        assert_eq!(
            e.read_mem(0x1001, 5).unwrap(),
            vec![0x22, 0x33, 0x44, 0x55, 0x66]
        );
    }

    #[test]
    fn aligned_write_round_trips() {
        let mut e = engine_with_mem(&[]);
        e.write_mem(0x2000, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(e.read_mem(0x2000, 8).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn scenario_d_unaligned_write_preserves_neighbors() {
        let mut e = engine_with_mem(&[(0x1000, 0x4433_2211)]);
        e.write_mem(0x1001, &[0xAA, 0xBB]).unwrap();
        assert_eq!(
            e.read_mem(0x1000, 4).unwrap(),
            vec![0x11, 0xAA, 0xBB, 0x44]
        );
    }

    #[test]
    fn write_with_lead_middle_and_tail() {
        let mut e = engine_with_mem(&[
            (0x3000, 0xAAAA_AAAA),
            (0x3004, 0xBBBB_BBBB),
            (0x3008, 0xCCCC_CCCC),
        ]);
        // 0x3001..0x300A: one lead byte-triple, one full word, two tail bytes.
        let data: Vec<u8> = (1..=9).collect();
        e.write_mem(0x3001, &data).unwrap();

        assert_eq!(mem_word(&mut e, 0x3000), u32::from_le_bytes([0xAA, 1, 2, 3]));
        assert_eq!(mem_word(&mut e, 0x3004), u32::from_le_bytes([4, 5, 6, 7]));
        assert_eq!(
            mem_word(&mut e, 0x3008),
            u32::from_le_bytes([8, 9, 0xCC, 0xCC])
        );
    }

    #[test]
    fn sub_word_write_within_one_word() {
        let mut e = engine_with_mem(&[(0x4000, 0x4433_2211)]);
        e.write_mem(0x4001, &[0x99]).unwrap();
        assert_eq!(mem_word(&mut e, 0x4000), 0x4433_9911);
    }

    #[test]
    fn scratch_registers_survive_memory_traffic() {
        let mut e = engine_with_mem(&[(0x1000, 0x1234_5678)]);
        e.write_gpr(5, 0x0101_0101).unwrap();
        e.write_gpr(6, 0x0202_0202).unwrap();

        e.write_mem(0x1001, &[0xEE]).unwrap();
        let _ = e.read_mem(0x1000, 4).unwrap();

        assert_eq!(e.read_gpr(5).unwrap(), 0x0101_0101);
        assert_eq!(e.read_gpr(6).unwrap(), 0x0202_0202);
    }

    #[test]
    fn memory_access_requires_halted_warp() {
        let mut e = engine_over(MockDm::scenario_a());
        e.select_warp_thread(0, 0).unwrap();
        assert_eq!(e.read_mem(0x1000, 4).unwrap_err().code(), -9);
    }
}
