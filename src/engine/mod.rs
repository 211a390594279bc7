//! The warp-control engine.
//!
//! Owns the debug transport and everything reached through it: the DM access
//! layer, warp selection and control, instruction injection, register and
//! memory access, and the software breakpoint table. The GDB stub borrows an
//! [`Engine`] for the duration of a session; the interactive console drives
//! the same API directly.

mod breakpoints;
mod dm;
mod inject;
mod mem;
mod warp;

pub use breakpoints::{Breakpoint, StopEvent};

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::Error;
use crate::regs::{self, DmReg, HaltCause};
use crate::riscv::{self, Assembler};
use crate::transport::Transport;

pub const DEFAULT_POLL_RETRIES: u32 = 10;
pub const DEFAULT_POLL_DELAY_MS: u64 = 100;

/// Platform id reported by Vortex targets.
pub const VORTEX_PLATFORM_ID: u32 = 0x1;

/// Target inventory, read once after the DM wakes.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub platform_id: u32,
    pub platform_name: &'static str,
    pub num_clusters: u32,
    /// Cores per cluster.
    pub num_cores: u32,
    /// Warps per core.
    pub num_warps: u32,
    /// Threads per warp (already decoded from the log2 wire encoding).
    pub num_threads: u32,
    pub num_total_cores: u32,
    pub num_total_warps: u32,
    pub num_total_threads: u32,
    pub misa: u32,
}

/// Per-warp status record, see [`Engine::warp_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarpStatus {
    pub active: bool,
    pub halted: bool,
    /// Only meaningful while the warp is halted.
    pub pc: Option<u32>,
    pub cause: Option<HaltCause>,
}

/// The six DCTRL summary booleans, read in a single register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarpSummary {
    pub all_halted: bool,
    pub any_halted: bool,
    pub all_running: bool,
    pub any_running: bool,
    pub all_unavail: bool,
    pub any_unavail: bool,
}

pub struct Engine {
    transport: Option<Box<dyn Transport>>,
    platform: Option<PlatformInfo>,
    /// Mirror of DSELECT.{warpsel,threadsel}. Display-only; rewritten into
    /// the DM before every operation that depends on it.
    selected: Option<(u32, u32)>,
    /// Last DPC observed for the selected thread.
    selected_pc: u32,
    breakpoints: BTreeMap<u32, Breakpoint>,
    asm: Assembler,
    poll_retries: u32,
    poll_delay: Duration,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            transport: None,
            platform: None,
            selected: None,
            selected_pc: 0,
            breakpoints: BTreeMap::new(),
            asm: Assembler::new(),
            poll_retries: DEFAULT_POLL_RETRIES,
            poll_delay: Duration::from_millis(DEFAULT_POLL_DELAY_MS),
        }
    }

    pub fn set_poll_params(&mut self, retries: u32, delay: Duration) {
        self.poll_retries = retries;
        self.poll_delay = delay;
    }

    //==========================================================================
    // Transport management
    //==========================================================================

    pub fn set_transport(&mut self, transport: Box<dyn Transport>) {
        if self.transport.is_some() {
            warn!("replacing an existing transport");
        }
        self.transport = Some(transport);
    }

    pub fn transport_connected(&self) -> bool {
        self.transport.as_ref().map_or(false, |t| t.is_connected())
    }

    pub fn disconnect_transport(&mut self) {
        if let Some(t) = self.transport.as_mut() {
            t.disconnect();
        }
        self.transport = None;
    }

    //==========================================================================
    // Initialization and reset
    //==========================================================================

    /// Wake the DM, fetch platform info, and report it.
    pub fn initialize(&mut self) -> Result<(), Error> {
        info!("initializing engine...");
        self.wake_dm()?;

        // Route ebreak to the debugger; software breakpoints depend on it.
        self.dm_wr_field(DmReg::Dconfig, "ebreakh", 1)?;

        self.fetch_platform_info()?;
        self.report_platform_info();
        Ok(())
    }

    /// Bring the DM out of whatever of {powered-off, resetting, awake} state
    /// it is in.
    pub fn wake_dm(&mut self) -> Result<(), Error> {
        if self.dm_rd_field(DmReg::Dctrl, "ndmreset")? != 0 {
            debug!("waiting for DCTRL.ndmreset to clear...");
            self.dm_poll_field(DmReg::Dctrl, "ndmreset", 0)?;
        }

        if self.dm_rd_field(DmReg::Dctrl, "dmactive")? == 0 {
            debug!("DM not active, waking it up...");
            const WAKE_ATTEMPTS: u32 = 3;
            let mut awake = false;
            for _ in 0..WAKE_ATTEMPTS {
                self.dm_wr_field(DmReg::Dctrl, "dmactive", 1)?;
                match self.dm_poll_field(DmReg::Dctrl, "dmactive", 1) {
                    Ok(_) => {
                        awake = true;
                        break;
                    }
                    Err(Error::Timeout { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
            if !awake {
                return Err(Error::Failed(format!(
                    "DM failed to wake after {} attempts",
                    WAKE_ATTEMPTS
                )));
            }
        }
        debug!("DM is awake");
        Ok(())
    }

    /// Reset the target, optionally requesting that all warps halt out of
    /// reset, then re-initialize.
    pub fn reset_platform(&mut self, halt: bool) -> Result<(), Error> {
        info!("issuing system reset...");
        if halt {
            self.select_all_warps(true)?;
            self.dm_wr_field(DmReg::Dctrl, "resethaltreq", 1)?;
        }

        self.dm_wr_field(DmReg::Dctrl, "ndmreset", 1)?;
        self.dm_poll_field(DmReg::Dctrl, "ndmreset", 0)?;

        if halt {
            let dctrl = self.dm_rd(DmReg::Dctrl)?;
            let all = regs::extract(DmReg::Dctrl, "allhalted", dctrl).unwrap_or(0);
            let any = regs::extract(DmReg::Dctrl, "anyhalted", dctrl).unwrap_or(0);
            if all != 0 {
                info!("all warps halted after reset");
            } else if any != 0 {
                warn!("some warps halted after reset, but not all");
            } else {
                warn!("no warps halted after reset");
            }
        }

        info!("system reset complete");
        self.selected = None;
        self.initialize()
    }

    /// Decode PLATFORM, derive totals, and read `misa` from warp 0/thread 0.
    pub fn fetch_platform_info(&mut self) -> Result<(), Error> {
        let word = self.dm_rd(DmReg::Platform)?;
        let get = |f| regs::extract(DmReg::Platform, f, word).unwrap();

        let platform_id = get("platformid");
        let num_clusters = get("numclusters");
        let num_cores = get("numcores");
        let num_warps = get("numwarps");
        // numthreads is log2-encoded on the wire.
        let num_threads = 1u32 << get("numthreads");

        let num_total_cores = num_clusters * num_cores;
        let num_total_warps = num_total_cores * num_warps;
        let num_total_threads = num_total_warps * num_threads;

        self.platform = Some(PlatformInfo {
            platform_id,
            platform_name: if platform_id == VORTEX_PLATFORM_ID { "Vortex" } else { "Unknown" },
            num_clusters,
            num_cores,
            num_warps,
            num_threads,
            num_total_cores,
            num_total_warps,
            num_total_threads,
            misa: 0,
        });

        let misa = self.read_misa()?;
        if let Some(p) = self.platform.as_mut() {
            p.misa = misa;
        }
        Ok(())
    }

    /// Reading `misa` requires running a CSR access inside warp 0/thread 0,
    /// halting it first if needed and restoring its run state afterwards.
    fn read_misa(&mut self) -> Result<u32, Error> {
        self.select_warp_thread(0, 0)?;
        let was_halted = self.warp_state(0)?;
        if !was_halted {
            self.halt_warps(&[0])?;
        }
        let misa = self.read_csr(riscv::CSR_MISA);
        if !was_halted {
            self.resume_warps(&[0])?;
        }
        misa
    }

    pub fn platform(&self) -> Result<&PlatformInfo, Error> {
        self.platform
            .as_ref()
            .ok_or_else(|| Error::Failed("platform info not available (run initialize)".into()))
    }

    fn report_platform_info(&self) {
        let Ok(p) = self.platform() else { return };
        info!(
            "platform {:#010x} ({}): {} cluster(s), {} core(s)/cluster, \
             {} warp(s)/core, {} thread(s)/warp; {} total warps, {} total threads; isa {}",
            p.platform_id,
            p.platform_name,
            p.num_clusters,
            p.num_cores,
            p.num_warps,
            p.num_threads,
            p.num_total_warps,
            p.num_total_threads,
            riscv::isa_string(p.misa),
        );
    }
}
