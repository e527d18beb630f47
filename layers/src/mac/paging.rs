//! Paging Scheduler
//!
//! Implements paging frame and paging occasion selection according to
//! 3GPP TS 38.304 clause 7.1 and aggregates the paging records due in a slot
//! into one P-RNTI PDSCH.

use super::common_pdsch::{alloc_common_grant, eligible_pdsch_td, find_pdsch_candidate, PdschCandidate};
use super::config::{CellConfiguration, PAGING_DRX_CYCLES};
use super::indications::{indication_queue, IndicationReceiver, IndicationSender, PagingInformation};
use super::pdcch::PdcchAllocator;
use super::resource_grid::SlotAllocator;
use super::retry::{AllocOutcome, BoundedRetry, CauseCounters, FailureCause};
use super::sched_result::{PagingGrant, PagingUeIdentity, RntiType, MAX_PAGING_PDUS_PER_SLOT};
use common::types::Rnti;
use common::SlotPoint;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum paging records in one Paging message (maxNrofPageRec)
pub const MAX_PAGING_RECORDS: usize = 32;

/// Fixed part of the Paging message
pub const PAGING_HEADER_BYTES: u32 = 2;

/// Paging record carrying a 48-bit 5G-S-TMSI
pub const CN_PAGING_RECORD_BYTES: u32 = 7;

/// Paging record carrying a 40-bit I-RNTI
pub const RAN_PAGING_RECORD_BYTES: u32 = 6;

/// Size of one paging record
pub fn paging_record_bytes(identity: &PagingUeIdentity) -> u32 {
    match identity {
        PagingUeIdentity::Cn(_) => CN_PAGING_RECORD_BYTES,
        PagingUeIdentity::Ran(_) => RAN_PAGING_RECORD_BYTES,
    }
}

/// (SFN + PF_offset) mod T == (T div N) * (UE_ID mod N)
pub fn is_paging_frame(sfn: u32, pf_offset: u32, drx_cycle: u32, n: u32, ue_id: u32) -> bool {
    (sfn + pf_offset) % drx_cycle == (drx_cycle / n) * (ue_id % n)
}

/// i_s = floor(UE_ID / N) mod Ns
pub fn paging_occasion_index(ue_id: u32, n: u32, nof_po_per_pf: u32) -> u32 {
    (ue_id / n) % nof_po_per_pf
}

/// Lifecycle of a paged identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PagingState {
    Queued,
    Retrying,
    Served,
    Expired,
}

#[derive(Debug, Clone)]
struct PendingPaging {
    info: PagingInformation,
    /// Effective paging cycle T
    drx_cycle: u32,
    retry: BoundedRetry,
    state: PagingState,
}

impl PendingPaging {
    /// Consume one paging occasion and move to the next state
    fn record_occasion(&mut self, outcome: AllocOutcome) -> PagingState {
        self.retry.record(outcome);
        self.state = if !self.retry.is_exhausted() {
            PagingState::Retrying
        } else if self.retry.successes() > 0 {
            PagingState::Served
        } else {
            PagingState::Expired
        };
        self.state
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PagingStats {
    pub nof_requests: u64,
    pub nof_duplicates: u64,
    pub nof_rejected: u64,
    /// Requests dropped for a paging cycle outside 32, 64, 128 and 256 frames
    pub nof_invalid_drx: u64,
    pub nof_grants: u64,
    pub nof_records: u64,
    pub nof_served: u64,
    pub nof_expired: u64,
    pub failures: CauseCounters,
}

/// Paging scheduler
pub struct PagingScheduler {
    cell: Arc<CellConfiguration>,
    pdcch: PdcchAllocator,
    tx: IndicationSender<PagingInformation>,
    rx: IndicationReceiver<PagingInformation>,
    pending: Vec<PendingPaging>,
    stats: PagingStats,
}

impl PagingScheduler {
    pub fn new(cell: Arc<CellConfiguration>) -> Self {
        let (tx, rx) = indication_queue("Paging", cell.params.paging.queue_size);
        Self {
            pdcch: PdcchAllocator::new(cell.clone()),
            cell,
            tx,
            rx,
            pending: Vec::new(),
            stats: PagingStats::default(),
        }
    }

    pub fn sender(&self) -> IndicationSender<PagingInformation> {
        self.tx.clone()
    }

    pub fn stats(&self) -> &PagingStats {
        &self.stats
    }

    pub fn nof_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn state_of(&self, identity: &PagingUeIdentity) -> Option<PagingState> {
        self.pending
            .iter()
            .find(|p| p.info.identity == *identity)
            .map(|p| p.state)
    }

    /// Number of paging occasions already consumed by `identity`
    pub fn attempts_of(&self, identity: &PagingUeIdentity) -> Option<u32> {
        self.pending
            .iter()
            .find(|p| p.info.identity == *identity)
            .map(|p| p.retry.attempts())
    }

    fn handle_paging_info(&mut self, info: PagingInformation) {
        self.stats.nof_requests += 1;
        if self.pending.iter().any(|p| p.info.identity == info.identity) {
            self.stats.nof_duplicates += 1;
            debug!("Paging for {:?} already pending", info.identity);
            return;
        }
        if let Some(drx) = info.paging_drx.filter(|drx| !PAGING_DRX_CYCLES.contains(drx)) {
            self.stats.nof_invalid_drx += 1;
            warn!("Dropping paging for {:?}: invalid paging cycle {}", info.identity, drx);
            return;
        }
        let cfg = &self.cell.params.paging;
        if self.pending.len() >= cfg.max_pending_ues {
            self.stats.nof_rejected += 1;
            warn!("Paging list full, dropping {:?}", info.identity);
            return;
        }
        let drx_cycle = info
            .paging_drx
            .map(|drx| drx.min(cfg.default_drx_cycle))
            .unwrap_or(cfg.default_drx_cycle);
        self.pending.push(PendingPaging {
            info,
            drx_cycle,
            retry: BoundedRetry::new(cfg.max_paging_retries),
            state: PagingState::Queued,
        });
    }

    /// Slot index of paging occasion `i_s` in the frame: first DL slot of the
    /// i_s-th of Ns equal parts of the frame
    fn paging_occasion_slot(&self, sfn: u32, i_s: u32) -> Option<u32> {
        let slots_per_frame = self.cell.slots_per_frame();
        let len = slots_per_frame / self.cell.params.paging.nof_po_per_pf;
        let frame_start = SlotPoint::new(self.cell.numerology(), sfn, 0);
        (i_s * len..(i_s + 1) * len).find(|idx| self.cell.is_dl_enabled(frame_start + *idx))
    }

    fn is_due(&self, p: &PendingPaging, slot: SlotPoint) -> bool {
        let cfg = &self.cell.params.paging;
        let n = (p.drx_cycle / cfg.nof_pf).max(1);
        let ue_id = p.info.ue_identity_index;
        if !is_paging_frame(slot.sfn(), cfg.pf_offset, p.drx_cycle, n, ue_id) {
            return false;
        }
        let i_s = paging_occasion_index(ue_id, n, cfg.nof_po_per_pf);
        self.paging_occasion_slot(slot.sfn(), i_s) == Some(slot.slot_index())
    }

    /// Whether a queued record has its paging occasion in `slot`
    pub fn has_occasion(&self, slot: SlotPoint) -> bool {
        self.pending.iter().any(|p| self.is_due(p, slot))
    }

    pub fn run_slot(&mut self, slot_alloc: &mut SlotAllocator) {
        for info in self.rx.drain() {
            self.handle_paging_info(info);
        }
        if self.pending.is_empty() {
            return;
        }
        let slot = slot_alloc.slot;
        let due: Vec<usize> = (0..self.pending.len())
            .filter(|i| self.is_due(&self.pending[*i], slot))
            .collect();
        if due.is_empty() {
            return;
        }

        let (nof_sent, result) = match self.schedule_records(slot_alloc, &due) {
            Ok(nof_sent) => (nof_sent, Ok(())),
            Err(cause) => (0, Err(cause)),
        };
        match result {
            Ok(()) => {
                self.stats.nof_grants += 1;
                self.stats.nof_records += nof_sent as u64;
                info!("Paging in {} with {} records", slot, nof_sent);
            }
            Err(cause) => {
                self.stats.failures.record(cause);
                debug!("Paging postponed in {}: {}", slot, cause);
            }
        }

        for (pos, idx) in due.iter().enumerate() {
            let outcome = if pos < nof_sent {
                AllocOutcome::Allocated
            } else {
                AllocOutcome::Postponed(result.err().unwrap_or(FailureCause::NoPdsch))
            };
            self.pending[*idx].record_occasion(outcome);
        }

        let stats = &mut self.stats;
        self.pending.retain(|p| match p.state {
            PagingState::Served => {
                stats.nof_served += 1;
                debug!("Paging for {:?} completed", p.info.identity);
                false
            }
            PagingState::Expired => {
                stats.nof_expired += 1;
                warn!(
                    "Paging for {:?} dropped after {} attempts without transmission",
                    p.info.identity,
                    p.retry.attempts()
                );
                false
            }
            _ => true,
        });
    }

    /// Fit as many due records as possible into one PDSCH; returns how many
    /// of `due` (in order) were sent
    fn schedule_records(&self, slot_alloc: &mut SlotAllocator, due: &[usize]) -> Result<usize, FailureCause> {
        let cfg = &self.cell.params.paging;
        let ss = self
            .cell
            .search_space(cfg.paging_search_space_id)
            .ok_or(FailureCause::NoPdcch)?;
        if !ss.is_monitoring_active(slot_alloc.slot) {
            return Err(FailureCause::SlotUnavailable);
        }
        if slot_alloc.result.dl.paging_grants.len() >= MAX_PAGING_PDUS_PER_SLOT {
            return Err(FailureCause::ResultListFull);
        }

        let max_records = due.len().min(MAX_PAGING_RECORDS);
        let payload_for = |n: usize| -> u32 {
            PAGING_HEADER_BYTES
                + due[..n]
                    .iter()
                    .map(|i| paging_record_bytes(&self.pending[*i].info.identity))
                    .sum::<u32>()
        };

        let mut best: Option<(usize, PdschCandidate)> = None;
        for (td_index, _) in eligible_pdsch_td(&self.cell, slot_alloc) {
            for n in (1..=max_records).rev() {
                if best.as_ref().map(|(b, _)| *b >= n).unwrap_or(false) {
                    break;
                }
                if let Ok(cand) = find_pdsch_candidate(
                    &self.cell,
                    slot_alloc,
                    td_index,
                    payload_for(n),
                    cfg.paging_mcs,
                    self.cell.dl_bwp_prbs(),
                ) {
                    best = Some((n, cand));
                    break;
                }
            }
        }
        let (nof_records, cand) = best.ok_or(FailureCause::NoPdsch)?;

        let pdsch = alloc_common_grant(
            &self.cell,
            &self.pdcch,
            slot_alloc,
            Rnti::P_RNTI,
            RntiType::P,
            cfg.paging_search_space_id,
            &cand,
            cfg.paging_mcs,
        )?;
        let records = due[..nof_records]
            .iter()
            .map(|i| self.pending[*i].info.identity)
            .collect();
        slot_alloc.result.dl.paging_grants.push(PagingGrant { pdsch, records });
        Ok(nof_records)
    }
}
