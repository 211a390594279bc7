//! A test-only transport backed by a miniature Debug Module model.
//!
//! The model is just deep enough to exercise the engine's algorithms: it
//! tracks per-warp halt state, honors the WMASK/DSELECT selection registers,
//! and executes injected instructions (the lw/sw/addi/csr subset) against
//! per-thread register files and a word-addressed memory.

use std::collections::HashMap;

use super::{Transport, TransportError};
use crate::regs::{self, DmReg};
use crate::riscv::encode::EBREAK;
use crate::riscv::CSR_DSCRATCH;

/// What happens to warps resumed by `resumereq`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ResumeBehavior {
    /// Warps keep running until halted explicitly.
    Run,
    /// Warps immediately halt again at `pc` with halt cause `cause`,
    /// as if execution ran into a trap.
    HaltAt { pc: u32, cause: u32 },
}

pub(crate) struct MockDm {
    // Raw register storage for the pass-through registers.
    dconfig: u32,
    dselect: u32,
    dinject: u32,
    dscratch: u32,
    platform: u32,
    dmactive: bool,
    reset_halt_pending: bool,

    num_warps: u32,
    num_threads: u32,

    active: Vec<bool>,
    halted: Vec<bool>,
    cause: Vec<u32>,
    pcs: Vec<u32>,
    wmask: Vec<u32>,

    gprs: HashMap<(u32, u32), [u32; 32]>,
    csrs: HashMap<(u32, u32, u32), u32>,
    pub(crate) mem: HashMap<u32, u32>,

    pub(crate) resume_behavior: ResumeBehavior,
    /// Number of `dmactive=1` writes to swallow before the DM wakes, to
    /// exercise the bounded wake loop.
    pub(crate) ignore_dmactive_writes: u32,
    connected: bool,
    pub(crate) inject_count: u32,
}

impl MockDm {
    /// Platform of Scenario A: 1 cluster, 2 cores, 4 warps/core,
    /// 4 threads/warp (log2 encoded as 2).
    pub(crate) fn scenario_a() -> MockDm {
        MockDm::new(1, 2, 4, 2)
    }

    pub(crate) fn new(clusters: u32, cores: u32, warps: u32, threads_log2: u32) -> MockDm {
        let platform = {
            let mut w = 0;
            w = regs::insert(DmReg::Platform, "platformid", w, 0x1).unwrap();
            w = regs::insert(DmReg::Platform, "numclusters", w, clusters).unwrap();
            w = regs::insert(DmReg::Platform, "numcores", w, cores).unwrap();
            w = regs::insert(DmReg::Platform, "numwarps", w, warps).unwrap();
            regs::insert(DmReg::Platform, "numthreads", w, threads_log2).unwrap()
        };
        let num_warps = clusters * cores * warps;
        let num_windows = (num_warps as usize + 31) / 32;
        MockDm {
            dconfig: 0,
            dselect: 0,
            dinject: 0,
            dscratch: 0,
            platform,
            dmactive: true,
            reset_halt_pending: false,
            num_warps,
            num_threads: 1 << threads_log2,
            active: vec![true; num_warps as usize],
            halted: vec![false; num_warps as usize],
            cause: vec![0; num_warps as usize],
            pcs: vec![0; num_warps as usize],
            wmask: vec![0; num_windows],
            gprs: HashMap::new(),
            csrs: HashMap::new(),
            mem: HashMap::new(),
            resume_behavior: ResumeBehavior::Run,
            ignore_dmactive_writes: 0,
            connected: true,
            inject_count: 0,
        }
    }

    pub(crate) fn asleep(mut self, ignored_writes: u32) -> MockDm {
        self.dmactive = false;
        self.ignore_dmactive_writes = ignored_writes;
        self
    }

    pub(crate) fn set_active(&mut self, wid: u32, active: bool) {
        self.active[wid as usize] = active;
    }

    pub(crate) fn is_halted(&self, wid: u32) -> bool {
        self.halted[wid as usize]
    }

    pub(crate) fn halt_all(&mut self) {
        for w in 0..self.num_warps as usize {
            self.halted[w] = true;
            self.cause[w] = 2;
        }
    }

    pub(crate) fn wmask_window(&self, win: usize) -> u32 {
        self.wmask[win]
    }

    pub(crate) fn set_pc(&mut self, wid: u32, pc: u32) {
        self.pcs[wid as usize] = pc;
    }

    pub(crate) fn gpr(&self, wid: u32, tid: u32, n: usize) -> u32 {
        self.gprs.get(&(wid, tid)).map(|f| f[n]).unwrap_or(0)
    }

    pub(crate) fn set_gpr(&mut self, wid: u32, tid: u32, n: usize, v: u32) {
        self.gprs.entry((wid, tid)).or_insert([0; 32])[n] = v;
    }

    pub(crate) fn set_csr(&mut self, wid: u32, tid: u32, addr: u32, v: u32) {
        self.csrs.insert((wid, tid, addr), v);
    }

    pub(crate) fn mem_word(&self, addr: u32) -> u32 {
        assert_eq!(addr % 4, 0);
        self.mem.get(&addr).copied().unwrap_or(0)
    }

    pub(crate) fn set_mem_word(&mut self, addr: u32, v: u32) {
        assert_eq!(addr % 4, 0);
        self.mem.insert(addr, v);
    }

    fn winsel(&self) -> u32 {
        regs::extract(DmReg::Dselect, "winsel", self.dselect).unwrap()
    }

    fn warpsel(&self) -> u32 {
        regs::extract(DmReg::Dselect, "warpsel", self.dselect).unwrap()
    }

    fn threadsel(&self) -> u32 {
        regs::extract(DmReg::Dselect, "threadsel", self.dselect).unwrap()
    }

    fn window_bits(&self, win: u32, pred: impl Fn(usize) -> bool) -> u32 {
        let mut bits = 0u32;
        for bit in 0..32 {
            let wid = win as usize * 32 + bit;
            if wid < self.num_warps as usize && pred(wid) {
                bits |= 1 << bit;
            }
        }
        bits
    }

    /// Warps selected by the WMASK of every window.
    fn masked_warps(&self) -> Vec<usize> {
        (0..self.num_warps as usize)
            .filter(|&w| self.wmask[w / 32] & (1 << (w % 32)) != 0)
            .collect()
    }

    fn compose_dctrl(&self) -> u32 {
        let all = |pred: &dyn Fn(usize) -> bool| (0..self.num_warps as usize).all(pred);
        let any = |pred: &dyn Fn(usize) -> bool| (0..self.num_warps as usize).any(pred);

        let mut w = 0;
        let mut put = |field, v: u32| {
            w = regs::insert(DmReg::Dctrl, field, w, v).unwrap();
        };
        put("dmactive", self.dmactive as u32);
        put("allhalted", all(&|i| self.halted[i]) as u32);
        put("anyhalted", any(&|i| self.halted[i]) as u32);
        put("allrunning", all(&|i| !self.halted[i]) as u32);
        put("anyrunning", any(&|i| !self.halted[i]) as u32);
        put("allunavail", all(&|i| !self.active[i]) as u32);
        put("anyunavail", any(&|i| !self.active[i]) as u32);
        put("hacause", self.cause[self.warpsel() as usize]);
        w
    }

    fn process_dctrl_write(&mut self, word: u32) {
        let get = |field| regs::extract(DmReg::Dctrl, field, word).unwrap();

        if get("dmactive") != 0 && !self.dmactive {
            if self.ignore_dmactive_writes > 0 {
                self.ignore_dmactive_writes -= 1;
            } else {
                self.dmactive = true;
            }
        }

        if get("resethaltreq") != 0 {
            self.reset_halt_pending = true;
        }

        if get("ndmreset") != 0 {
            // Reset completes instantly; ndmreset reads back as 0.
            for w in 0..self.num_warps as usize {
                self.pcs[w] = 0;
                if self.reset_halt_pending && self.wmask[w / 32] & (1 << (w % 32)) != 0 {
                    self.halted[w] = true;
                    self.cause[w] = 4;
                } else {
                    self.halted[w] = false;
                    self.cause[w] = 0;
                }
            }
            self.reset_halt_pending = false;
        }

        if get("haltreq") != 0 {
            for w in self.masked_warps() {
                self.halted[w] = true;
                self.cause[w] = 2;
            }
        }

        if get("resumereq") != 0 {
            for w in self.masked_warps() {
                self.halted[w] = false;
                self.cause[w] = 0;
            }
            if let ResumeBehavior::HaltAt { pc, cause } = self.resume_behavior {
                for w in self.masked_warps() {
                    self.halted[w] = true;
                    self.cause[w] = cause;
                    self.pcs[w] = pc;
                }
            }
        }

        if get("stepreq") != 0 {
            let w = self.warpsel() as usize;
            self.pcs[w] = self.pcs[w].wrapping_add(4);
            self.cause[w] = 3;
        }

        if get("injectreq") != 0 {
            self.inject_count += 1;
            self.execute(self.dinject);
        }
    }

    fn reg_get(&self, n: u32) -> u32 {
        if n == 0 {
            0
        } else {
            self.gpr(self.warpsel(), self.threadsel(), n as usize)
        }
    }

    fn reg_set(&mut self, n: u32, v: u32) {
        if n != 0 {
            self.set_gpr(self.warpsel(), self.threadsel(), n as usize, v);
        }
    }

    fn csr_get(&self, addr: u32) -> u32 {
        if addr == CSR_DSCRATCH {
            self.dscratch
        } else {
            self.csrs
                .get(&(self.warpsel(), self.threadsel(), addr))
                .copied()
                .unwrap_or(0)
        }
    }

    fn csr_set(&mut self, addr: u32, v: u32) {
        if addr == CSR_DSCRATCH {
            self.dscratch = v;
        } else {
            self.csrs.insert((self.warpsel(), self.threadsel(), addr), v);
        }
    }

    /// Execute one injected instruction in the selected thread's context.
    fn execute(&mut self, instr: u32) {
        let opcode = instr & 0x7F;
        let rd = (instr >> 7) & 0x1F;
        let funct3 = (instr >> 12) & 0x7;
        let rs1 = (instr >> 15) & 0x1F;
        let rs2 = (instr >> 20) & 0x1F;
        let i_imm = (instr as i32) >> 20; // sign-extended
        match opcode {
            0x03 => {
                assert_eq!(funct3, 0b010, "mock DM only models lw");
                let addr = self.reg_get(rs1).wrapping_add(i_imm as u32);
                let v = self.mem_word(addr);
                self.reg_set(rd, v);
            }
            0x23 => {
                assert_eq!(funct3, 0b010, "mock DM only models sw");
                let s_imm = ((instr as i32) >> 25 << 5) | rd as i32;
                let addr = self.reg_get(rs1).wrapping_add(s_imm as u32);
                let v = self.reg_get(rs2);
                self.set_mem_word(addr, v);
            }
            0x13 => {
                assert_eq!(funct3, 0b000, "mock DM only models addi");
                let v = self.reg_get(rs1).wrapping_add(i_imm as u32);
                self.reg_set(rd, v);
            }
            0x73 => {
                if instr == EBREAK {
                    let w = self.warpsel() as usize;
                    self.halted[w] = true;
                    self.cause[w] = 1;
                    return;
                }
                let csr = (instr >> 20) & 0xFFF;
                match funct3 {
                    0b001 => {
                        // csrrw
                        let old = self.csr_get(csr);
                        let new = self.reg_get(rs1);
                        self.csr_set(csr, new);
                        self.reg_set(rd, old);
                    }
                    0b010 => {
                        // csrrs (the engine only injects the rs1=x0 read form)
                        let old = self.csr_get(csr);
                        if rs1 != 0 {
                            self.csr_set(csr, old | self.reg_get(rs1));
                        }
                        self.reg_set(rd, old);
                    }
                    other => panic!("mock DM: unsupported system funct3 {}", other),
                }
            }
            other => panic!("mock DM: unsupported opcode {:#x}", other),
        }
    }
}

impl Transport for MockDm {
    fn read_reg(&mut self, addr: u32) -> Result<u32, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        let v = match addr {
            0x0 => self.platform,
            0x1 => self.dconfig,
            0x2 => self.dselect,
            0x3 => self.wmask[self.winsel() as usize],
            0x4 => self.window_bits(self.winsel(), |w| self.active[w]),
            0x5 => self.window_bits(self.winsel(), |w| self.halted[w]),
            0x6 => self.compose_dctrl(),
            0x7 => self.pcs[self.warpsel() as usize],
            0x8 => self.dinject,
            0x9 => self.dscratch,
            other => panic!("mock DM: read of unknown register {:#x}", other),
        };
        Ok(v)
    }

    fn write_reg(&mut self, addr: u32, data: u32) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        match addr {
            0x0 => {} // read-only
            0x1 => self.dconfig = data,
            0x2 => self.dselect = data,
            0x3 => {
                let win = self.winsel() as usize;
                self.wmask[win] = data;
            }
            0x4 | 0x5 => {} // read-only
            0x6 => self.process_dctrl_write(data),
            0x7 => {
                let w = self.warpsel() as usize;
                self.pcs[w] = data;
            }
            0x8 => self.dinject = data,
            0x9 => self.dscratch = data,
            other => panic!("mock DM: write of unknown register {:#x}", other),
        }
        Ok(())
    }

    fn send_cmd(&mut self, _cmd: &str) -> Result<String, TransportError> {
        Ok("+P".to_string())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}
