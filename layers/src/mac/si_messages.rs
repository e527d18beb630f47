//! Other System Information Scheduling
//!
//! SI messages are broadcast inside periodic SI windows (TS 38.331 clause
//! 5.2.2.3.2). For message n with window length W and N slots per frame,
//! x = (n - 1) * W, the window starts in slot x mod N of the frame where
//! SFN mod T = floor(x / N). At most one transmission is made per window.

use super::common_pdsch::{alloc_common_grant, eligible_pdsch_td, find_pdsch_candidate};
use super::config::CellConfiguration;
use super::pdcch::PdcchAllocator;
use super::resource_grid::SlotAllocator;
use super::retry::{CauseCounters, FailureCause};
use super::sched_result::{RntiType, SiGrant, SiKind, MAX_SI_PDUS_PER_SLOT};
use common::types::Rnti;
use common::SlotPoint;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle of the SI window of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiWindowState {
    WaitingWindow,
    WindowOpen { start: SlotPoint, end: SlotPoint },
    /// Transmitted; nothing else to do until `end`
    Served { end: SlotPoint },
}

impl SiWindowState {
    /// State at `slot` before any allocation attempt
    pub fn advance(self, slot: SlotPoint, window_start: bool, window_len: u32) -> (SiWindowState, bool) {
        let (state, expired) = match self {
            SiWindowState::WindowOpen { end, .. } if slot >= end => (SiWindowState::WaitingWindow, true),
            SiWindowState::Served { end } if slot >= end => (SiWindowState::WaitingWindow, false),
            other => (other, false),
        };
        let state = match state {
            SiWindowState::WaitingWindow if window_start => SiWindowState::WindowOpen {
                start: slot,
                end: slot + window_len,
            },
            other => other,
        };
        (state, expired)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SiWindowState::WindowOpen { .. })
    }
}

/// Per-message counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SiMessageStats {
    pub nof_windows: u64,
    pub nof_tx: u64,
    pub nof_expired_windows: u64,
    pub failures: CauseCounters,
}

#[derive(Debug, Clone)]
struct SiMessageContext {
    period_frames: u32,
    payload_bytes: u32,
    /// Window start, slot within the frame
    start_slot_index: u32,
    /// Window start, SFN mod period
    start_sfn_offset: u32,
    state: SiWindowState,
    stats: SiMessageStats,
}

/// First slot of the window of message `index` (0-based)
pub fn si_window_start(index: u32, window_len: u32, slots_per_frame: u32) -> (u32, u32) {
    let x = index * window_len;
    (x / slots_per_frame, x % slots_per_frame)
}

/// Other-SI scheduler
pub struct SiMessageScheduler {
    cell: Arc<CellConfiguration>,
    pdcch: PdcchAllocator,
    messages: Vec<SiMessageContext>,
}

impl SiMessageScheduler {
    pub fn new(cell: Arc<CellConfiguration>) -> Self {
        let window_len = cell.params.si.si_window_len_slots;
        let messages = cell
            .params
            .si
            .messages
            .iter()
            .enumerate()
            .map(|(i, msg)| {
                let (sfn_offset, slot_index) = si_window_start(i as u32, window_len, cell.slots_per_frame());
                SiMessageContext {
                    period_frames: msg.period_frames,
                    payload_bytes: msg.payload_bytes,
                    start_slot_index: slot_index,
                    start_sfn_offset: sfn_offset,
                    state: SiWindowState::WaitingWindow,
                    stats: SiMessageStats::default(),
                }
            })
            .collect();
        Self {
            pdcch: PdcchAllocator::new(cell.clone()),
            cell,
            messages,
        }
    }

    pub fn nof_messages(&self) -> usize {
        self.messages.len()
    }

    pub fn window_state(&self, index: usize) -> Option<SiWindowState> {
        self.messages.get(index).map(|m| m.state)
    }

    pub fn stats(&self, index: usize) -> Option<&SiMessageStats> {
        self.messages.get(index).map(|m| &m.stats)
    }

    /// Whether `slot` falls inside the SI window of any message
    pub fn is_window_slot(&self, slot: SlotPoint) -> bool {
        let slots_per_frame = self.cell.slots_per_frame();
        let window_len = self.cell.params.si.si_window_len_slots;
        self.messages.iter().any(|msg| {
            let period = msg.period_frames * slots_per_frame;
            let start = msg.start_sfn_offset * slots_per_frame + msg.start_slot_index;
            let pos = (slot.sfn() % msg.period_frames) * slots_per_frame + slot.slot_index();
            (pos + period - start) % period < window_len
        })
    }

    pub fn run_slot(&mut self, slot_alloc: &mut SlotAllocator) {
        let slot = slot_alloc.slot;
        let window_len = self.cell.params.si.si_window_len_slots;
        for index in 0..self.messages.len() {
            let msg = &mut self.messages[index];
            let window_start = slot.sfn() % msg.period_frames == msg.start_sfn_offset
                && slot.slot_index() == msg.start_slot_index;
            let (state, expired) = msg.state.advance(slot, window_start, window_len);
            if expired {
                msg.stats.nof_expired_windows += 1;
                warn!("SI message {} window closed in {} without transmission", index + 1, slot);
            }
            if window_start {
                msg.stats.nof_windows += 1;
            }
            msg.state = state;
            if !state.is_open() {
                continue;
            }

            let payload_bytes = msg.payload_bytes;
            let result = self.try_schedule(slot_alloc, index as u8 + 1, payload_bytes);
            let msg = &mut self.messages[index];
            match result {
                Ok(()) => {
                    if let SiWindowState::WindowOpen { end, .. } = msg.state {
                        msg.state = SiWindowState::Served { end };
                    }
                    msg.stats.nof_tx += 1;
                    debug!("Scheduled SI message {} in {}", index + 1, slot);
                }
                Err(cause) => {
                    msg.stats.failures.record(cause);
                    debug!("SI message {} postponed in {}: {}", index + 1, slot, cause);
                }
            }
        }
    }

    fn try_schedule(&self, slot_alloc: &mut SlotAllocator, si_index: u8, payload_bytes: u32) -> Result<(), FailureCause> {
        let ss_id = self.cell.params.si.other_si_search_space_id;
        let monitoring = self
            .cell
            .search_space(ss_id)
            .map(|ss| ss.is_monitoring_active(slot_alloc.slot))
            .unwrap_or(false);
        if !monitoring || !self.cell.is_dl_enabled(slot_alloc.slot) {
            return Err(FailureCause::SlotUnavailable);
        }
        if slot_alloc.result.dl.si_grants.len() >= MAX_SI_PDUS_PER_SLOT {
            return Err(FailureCause::ResultListFull);
        }
        let mcs = self.cell.params.si.si_mcs;
        let mut last_err = FailureCause::SlotUnavailable;
        let tds: Vec<u8> = eligible_pdsch_td(&self.cell, slot_alloc).map(|(i, _)| i).collect();
        for td_index in tds {
            let cand = match find_pdsch_candidate(
                &self.cell,
                slot_alloc,
                td_index,
                payload_bytes,
                mcs,
                self.cell.dl_bwp_prbs(),
            ) {
                Ok(cand) => cand,
                Err(cause) => {
                    last_err = cause;
                    continue;
                }
            };
            let pdsch = alloc_common_grant(
                &self.cell,
                &self.pdcch,
                slot_alloc,
                Rnti::SI_RNTI,
                RntiType::Si,
                ss_id,
                &cand,
                mcs,
            )?;
            slot_alloc.result.dl.si_grants.push(SiGrant {
                kind: SiKind::SiMessage(si_index),
                beam: None,
                pdsch,
            });
            return Ok(());
        }
        Err(last_err)
    }
}
