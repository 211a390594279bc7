//! Warp selection, status queries, and halt/resume/step control.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use super::{Engine, WarpStatus, WarpSummary};
use crate::error::Error;
use crate::regs::{self, DmReg, HaltCause};

impl Engine {
    fn num_windows(&self) -> Result<u32, Error> {
        Ok((self.platform()?.num_total_warps + 31) / 32)
    }

    /// Point the WMASK window at `win` and write `bits` into it.
    fn write_window_mask(&mut self, win: u32, bits: u32) -> Result<(), Error> {
        self.dm_wr_field(DmReg::Dselect, "winsel", win)?;
        self.dm_wr(DmReg::Wmask, bits)
    }

    //==========================================================================
    // Warp selection
    //==========================================================================

    /// Build the selection mask from a list of global warp ids. Out-of-range
    /// ids are dropped with a warning; callers often pass "all active" lists.
    pub fn select_warps(&mut self, wids: &[u32]) -> Result<(), Error> {
        let total = self.platform()?.num_total_warps;
        let num_win = self.num_windows()?;
        let mut masks = vec![0u32; num_win as usize];

        let mut selected = 0;
        for &wid in wids {
            if wid >= total {
                warn!("ignoring invalid warp id {}", wid);
                continue;
            }
            masks[(wid / 32) as usize] |= 1 << (wid % 32);
            selected += 1;
        }

        for (win, &bits) in masks.iter().enumerate() {
            self.write_window_mask(win as u32, bits)?;
        }
        debug!("selected {} warp(s)", selected);
        Ok(())
    }

    /// Select every warp (`true`) or none (`false`).
    pub fn select_all_warps(&mut self, all: bool) -> Result<(), Error> {
        let bits = if all { u32::MAX } else { 0 };
        for win in 0..self.num_windows()? {
            self.write_window_mask(win, bits)?;
        }
        Ok(())
    }

    /// Point DSELECT at a single (warp, thread) for per-thread operations.
    pub fn select_warp_thread(&mut self, wid: u32, tid: u32) -> Result<(), Error> {
        let p = self.platform()?;
        if wid >= p.num_total_warps {
            return Err(Error::InvalidArg(format!(
                "warp id {} out of range (0..{})",
                wid, p.num_total_warps
            )));
        }
        if tid >= p.num_threads {
            return Err(Error::InvalidArg(format!(
                "thread id {} out of range (0..{})",
                tid, p.num_threads
            )));
        }

        self.write_thread_pointer(wid, tid)?;
        self.selected = Some((wid, tid));
        self.selected_pc = self.dm_rd(DmReg::Dpc)?;
        info!("selected warp {}, thread {}", wid, tid);
        Ok(())
    }

    /// The cached current-thread pointer. For display only; operations that
    /// depend on the pointer resync it into the DM first.
    pub fn selected_warp_thread(&self) -> Option<(u32, u32)> {
        self.selected
    }

    /// Last observed PC of the selected thread (display only).
    pub fn selected_pc(&self) -> u32 {
        self.selected_pc
    }

    fn write_thread_pointer(&mut self, wid: u32, tid: u32) -> Result<(), Error> {
        let current = self.dm_rd(DmReg::Dselect)?;
        let word = regs::insert(DmReg::Dselect, "warpsel", current, wid)
            .and_then(|w| regs::insert(DmReg::Dselect, "threadsel", w, tid))
            .map_err(|e| Error::InvalidArg(e.to_string()))?;
        self.dm_wr(DmReg::Dselect, word)
    }

    /// Rewrite DSELECT from the cache and return the pointer, failing when no
    /// selection has been made. Every pointer-dependent operation goes
    /// through here so a stale DM-side pointer can never be observed.
    pub(crate) fn require_selection(&mut self) -> Result<(u32, u32), Error> {
        let (wid, tid) = self.selected.ok_or(Error::NoneSelected)?;
        self.write_thread_pointer(wid, tid)?;
        Ok((wid, tid))
    }

    /// Like [`require_selection`], additionally checking that the selected
    /// warp is active and halted.
    pub(crate) fn require_halted(&mut self) -> Result<(u32, u32), Error> {
        let (wid, tid) = self.require_selection()?;
        self.dm_wr_field(DmReg::Dselect, "winsel", wid / 32)?;
        let bit = 1u32 << (wid % 32);
        if self.dm_rd(DmReg::Wactive)? & bit == 0 {
            return Err(Error::WarpNotActive(wid));
        }
        if self.dm_rd(DmReg::Wstatus)? & bit == 0 {
            return Err(Error::WarpNotHalted(wid));
        }
        Ok((wid, tid))
    }

    //==========================================================================
    // Status queries
    //==========================================================================

    /// Whether warp `wid` is halted.
    pub fn warp_state(&mut self, wid: u32) -> Result<bool, Error> {
        if wid >= self.platform()?.num_total_warps {
            return Err(Error::InvalidArg(format!("warp id {} out of range", wid)));
        }
        self.dm_wr_field(DmReg::Dselect, "winsel", wid / 32)?;
        let status = self.dm_rd(DmReg::Wstatus)?;
        Ok(status & (1 << (wid % 32)) != 0)
    }

    /// The six DCTRL summary booleans in one register read.
    pub fn warp_summary(&mut self) -> Result<WarpSummary, Error> {
        let dctrl = self.dm_rd(DmReg::Dctrl)?;
        let get = |f| regs::extract(DmReg::Dctrl, f, dctrl).unwrap() != 0;
        Ok(WarpSummary {
            all_halted: get("allhalted"),
            any_halted: get("anyhalted"),
            all_running: get("allrunning"),
            any_running: get("anyrunning"),
            all_unavail: get("allunavail"),
            any_unavail: get("anyunavail"),
        })
    }

    /// Status record for every warp. PC and halt cause are fetched only when
    /// requested, and only for warps that are both active and halted; doing
    /// so retargets the current-thread pointer, which is saved and restored.
    pub fn warp_status(
        &mut self,
        include_pc: bool,
        include_cause: bool,
    ) -> Result<BTreeMap<u32, WarpStatus>, Error> {
        let total = self.platform()?.num_total_warps;
        let mut out = BTreeMap::new();

        for win in 0..self.num_windows()? {
            self.dm_wr_field(DmReg::Dselect, "winsel", win)?;
            let active = self.dm_rd(DmReg::Wactive)?;
            let halted = self.dm_rd(DmReg::Wstatus)?;

            for bit in 0..32 {
                let wid = win * 32 + bit;
                if wid >= total {
                    break;
                }
                let is_active = active & (1 << bit) != 0;
                let is_halted = halted & (1 << bit) != 0;
                let mut status = WarpStatus {
                    active: is_active,
                    halted: is_halted,
                    pc: None,
                    cause: None,
                };

                if is_active && is_halted && (include_pc || include_cause) {
                    self.write_thread_pointer(wid, 0)?;
                    if include_pc {
                        status.pc = Some(self.dm_rd(DmReg::Dpc)?);
                    }
                    if include_cause {
                        let raw = self.dm_rd_field(DmReg::Dctrl, "hacause")?;
                        status.cause = Some(HaltCause::from_raw(raw));
                    }
                }
                out.insert(wid, status);
            }
        }

        // Put the pointer back where the caller left it.
        if let Some((wid, tid)) = self.selected {
            self.write_thread_pointer(wid, tid)?;
        }
        Ok(out)
    }

    //==========================================================================
    // Halt, resume, step
    //==========================================================================

    /// Halt specific warps and verify each one stopped.
    pub fn halt_warps(&mut self, wids: &[u32]) -> Result<(), Error> {
        let total = self.platform()?.num_total_warps;
        self.select_warps(wids)?;
        self.dm_wr_field(DmReg::Dctrl, "haltreq", 1)?;

        let mut stuck = Vec::new();
        for &wid in wids {
            if wid < total && !self.warp_state(wid)? {
                warn!("warp {} did not halt", wid);
                stuck.push(wid);
            }
        }
        if !stuck.is_empty() {
            return Err(Error::Failed(format!("warps failed to halt: {:?}", stuck)));
        }
        Ok(())
    }

    /// Halt every warp and wait for the allhalted summary.
    pub fn halt_all(&mut self) -> Result<(), Error> {
        self.select_all_warps(true)?;
        self.dm_wr_field(DmReg::Dctrl, "haltreq", 1)?;
        self.dm_poll_field(DmReg::Dctrl, "allhalted", 1)?;
        Ok(())
    }

    /// Resume specific warps. Warps that remain halted are only warned
    /// about; they may legitimately re-halt immediately (e.g. on a
    /// breakpoint at the resume PC).
    pub fn resume_warps(&mut self, wids: &[u32]) -> Result<(), Error> {
        let total = self.platform()?.num_total_warps;
        self.select_warps(wids)?;
        self.dm_wr_field(DmReg::Dctrl, "resumereq", 1)?;

        for &wid in wids {
            if wid < total && self.warp_state(wid)? {
                warn!("warp {} is still halted after resume", wid);
            }
        }
        Ok(())
    }

    /// Resume every warp and wait for the allrunning summary.
    pub fn resume_all(&mut self) -> Result<(), Error> {
        self.select_all_warps(true)?;
        self.dm_wr_field(DmReg::Dctrl, "resumereq", 1)?;
        self.dm_poll_field(DmReg::Dctrl, "allrunning", 1)?;
        Ok(())
    }

    /// Single-step the selected thread, returning the new PC.
    pub fn step(&mut self) -> Result<u32, Error> {
        let (wid, _) = self.require_halted()?;

        // Stepping one thread while everything else is halted can deadlock
        // the target if the stepped thread waits on its siblings.
        if self.warp_summary()?.all_halted {
            warn!("stepping warp {} while all warps are halted", wid);
        }

        self.dm_wr_field(DmReg::Dctrl, "stepreq", 1)?;
        self.dm_poll_field(DmReg::Dctrl, "stepstate", 0)?;

        let pc = self.dm_rd(DmReg::Dpc)?;
        self.selected_pc = pc;
        Ok(pc)
    }
}
