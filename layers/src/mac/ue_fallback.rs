//! UE Fallback Scheduler
//!
//! Schedules UEs without a dedicated configuration: the Contention Resolution
//! CE, SRB0 and SRB1 on the DL, and BSR/SR driven PUSCH on the UL, using the
//! common search spaces, common PUCCH resources and DCI formats 1_0 and 0_0.
//!
//! Every slot runs, in order: event intake, HARQ and contention resolution
//! timeouts, SR opportunities, DL retransmissions, UL grants and DL new
//! transmissions (Contention Resolution CE, then SRB0, then SRB1). A PDCCH
//! failure ends scheduling for that direction in the current slot.

use super::config::{CellConfiguration, FallbackConfig};
use super::fallback_ue::{
    dl_payload_bytes, ConResState, DlHarqParams, DlNewTxKind, FallbackUe, UlHarqParams, MIN_SRB1_SEGMENT_BYTES,
    MIN_UL_GRANT_BYTES,
};
use super::harq::HarqAckOutcome;
use super::indications::{
    indication_queue, DuUeIndex, FallbackEvent, IndicationReceiver, IndicationSender, SrConfig, UlCrcIndication,
};
use super::pdcch::PdcchAllocator;
use super::pucch::PucchAllocator;
use super::resource_grid::{CellResourceAllocator, SlotAllocator, RING_ALLOCATOR_SIZE};
use super::retry::{BoundedRetry, CauseCounters, FailureCause};
use super::sched_result::{
    DlContent, DlDci, OfdmSymbolRange, PdschInfo, PrbInterval, PuschGrant, PuschInfo, PuschKind, RntiType, UeDlGrant,
    UlDci, MAX_PUSCH_PER_SLOT, MAX_UE_PDUS_PER_SLOT,
};
use super::tbs::{nof_dmrs_symbols, prbs_for_payload, tbs_bytes, TbsParams};
use common::types::Rnti;
use common::SlotPoint;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// SR opportunities are placed this many slots ahead, past any PUSCH that can
/// still be granted for that slot
pub const SR_SCHEDULE_AHEAD_SLOTS: u32 = 16;

/// Span of the slot negative cache
pub const NEG_CACHE_WINDOW: usize = 32;

/// Slots already found without free PDSCH resources
#[derive(Debug, Clone)]
struct SlotNegativeCache {
    slots: Vec<Option<SlotPoint>>,
}

impl SlotNegativeCache {
    fn new() -> Self {
        Self {
            slots: vec![None; NEG_CACHE_WINDOW],
        }
    }

    fn index(slot: SlotPoint) -> usize {
        slot.count() as usize % NEG_CACHE_WINDOW
    }

    fn mark(&mut self, slot: SlotPoint) {
        self.slots[Self::index(slot)] = Some(slot);
    }

    /// Entries of older slots sharing the index never match
    fn is_marked(&self, slot: SlotPoint) -> bool {
        self.slots[Self::index(slot)] == Some(slot)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FallbackStats {
    pub nof_ues_added: u64,
    pub nof_ues_removed: u64,
    pub nof_exits: u64,
    pub nof_conres_resolved: u64,
    pub nof_conres_expired: u64,
    pub nof_conres_failed: u64,
    pub nof_dl_newtx: u64,
    pub nof_dl_retx: u64,
    pub nof_dl_bytes: u64,
    pub nof_dl_acks: u64,
    pub nof_dl_nacks: u64,
    pub nof_ul_newtx: u64,
    pub nof_ul_retx: u64,
    pub nof_ul_crc_ok: u64,
    pub nof_ul_crc_ko: u64,
    pub nof_sr_opportunities: u64,
    pub dl_failures: CauseCounters,
    pub ul_failures: CauseCounters,
}

/// How the PRB allocation of a DL grant is sized
#[derive(Debug, Clone, Copy)]
enum DlSizing {
    /// Non-segmentable; the MCS may be raised up to the fallback maximum
    Mandatory { bytes: u32 },
    /// Truncated to the free PRBs when larger
    Segmentable { bytes: u32, min_bytes: u32 },
    /// Same PRB count and TBS as the original transmission
    Retx {
        nof_prbs: u16,
        mcs: u8,
        nof_symbols: u8,
        tbs_bytes: u32,
    },
}

#[derive(Debug, Clone, Copy)]
enum DlTx {
    NewTx(DlNewTxKind),
    Retx(u8),
}

#[derive(Debug, Clone, Copy)]
struct DlPlan {
    pdcch_offset: u32,
    pdsch_offset: u32,
    td_index: u8,
    symbols: OfdmSymbolRange,
    nof_dmrs_symbols: u8,
    prbs: PrbInterval,
    mcs: u8,
    tbs_bytes: u32,
    k1: u8,
}

#[derive(Debug, Clone, Copy)]
enum UlTx {
    NewTx { harq_id: u8, bytes: u32 },
    Retx { harq_id: u8, params: UlHarqParams },
}

#[derive(Debug, Clone, Copy)]
struct UlPlan {
    offset: u32,
    td_index: u8,
    symbols: OfdmSymbolRange,
    nof_dmrs_symbols: u8,
    prbs: PrbInterval,
    mcs: u8,
    tbs_bytes: u32,
}

/// Scheduler for UEs in fallback mode
pub struct UeFallbackScheduler {
    cell: Arc<CellConfiguration>,
    pdcch: PdcchAllocator,
    pucch: PucchAllocator,
    event_tx: IndicationSender<FallbackEvent>,
    event_rx: IndicationReceiver<FallbackEvent>,
    ues: BTreeMap<DuUeIndex, FallbackUe>,
    /// UEs with DL content waiting for a new transmission
    pending_dl: Vec<DuUeIndex>,
    /// UEs with UL demand or a pending UL retransmission
    pending_ul: Vec<DuUeIndex>,
    /// UEs with DL HARQ processes in flight
    ongoing_dl: Vec<DuUeIndex>,
    neg_cache: SlotNegativeCache,
    stats: FallbackStats,
}

impl UeFallbackScheduler {
    pub fn new(cell: Arc<CellConfiguration>) -> Self {
        let (event_tx, event_rx) = indication_queue("Fallback event", cell.params.fallback.event_queue_size);
        Self {
            pdcch: PdcchAllocator::new(cell.clone()),
            pucch: PucchAllocator::default(),
            cell,
            event_tx,
            event_rx,
            ues: BTreeMap::new(),
            pending_dl: Vec::new(),
            pending_ul: Vec::new(),
            ongoing_dl: Vec::new(),
            neg_cache: SlotNegativeCache::new(),
            stats: FallbackStats::default(),
        }
    }

    pub fn sender(&self) -> IndicationSender<FallbackEvent> {
        self.event_tx.clone()
    }

    pub fn stats(&self) -> &FallbackStats {
        &self.stats
    }

    pub fn nof_ues(&self) -> usize {
        self.ues.len()
    }

    pub fn ue(&self, ue_index: DuUeIndex) -> Option<&FallbackUe> {
        self.ues.get(&ue_index)
    }

    pub fn pending_dl_ues(&self) -> &[DuUeIndex] {
        &self.pending_dl
    }

    pub fn pending_ul_ues(&self) -> &[DuUeIndex] {
        &self.pending_ul
    }

    pub fn ongoing_dl_ues(&self) -> &[DuUeIndex] {
        &self.ongoing_dl
    }

    fn fallback_cfg(&self) -> &FallbackConfig {
        &self.cell.params.fallback
    }

    /// Schedule the current slot of `res_grid`. Lookahead PDSCH and PDCCH
    /// allocations skip the future slots for which `reserved` holds.
    pub fn run_slot(&mut self, res_grid: &mut CellResourceAllocator, reserved: &dyn Fn(SlotPoint) -> bool) {
        let slot = res_grid.slot_tx();

        for event in self.event_rx.drain() {
            self.handle_event(event, slot);
        }
        self.slot_indication(slot);
        self.schedule_sr_opportunities(res_grid);

        let mut dl_budget = BoundedRetry::new(self.fallback_cfg().max_sched_attempts_per_slot);
        let dl_active = self.schedule_dl_retxs(res_grid, reserved, &mut dl_budget);
        self.schedule_ul(res_grid);
        if dl_active {
            self.schedule_dl_newtxs(res_grid, reserved, &mut dl_budget);
        }
    }

    fn handle_event(&mut self, event: FallbackEvent, slot: SlotPoint) {
        let ue_index = match event.ue_index() {
            Some(ue_index) => ue_index,
            None => {
                warn!("Fallback event without UE index: {:?}", event);
                return;
            }
        };
        if let FallbackEvent::AddUe { crnti, msg3_slot, sr_config, .. } = event {
            self.add_ue(ue_index, crnti, msg3_slot, sr_config);
            return;
        }
        if !self.ues.contains_key(&ue_index) {
            debug!("Fallback event for unknown {} in {}: {:?}", ue_index, slot, event);
            return;
        }

        match event {
            FallbackEvent::AddUe { .. } => {}
            FallbackEvent::ConResPending { .. } => {
                if let Some(ue) = self.ues.get_mut(&ue_index) {
                    if matches!(ue.conres, ConResState::AwaitingCe { .. }) {
                        ue.conres_ce_pending = true;
                    }
                }
            }
            FallbackEvent::DlBufferState { lcid, bytes, .. } => {
                if let Some(ue) = self.ues.get_mut(&ue_index) {
                    ue.set_buffer_state(lcid, bytes);
                }
            }
            FallbackEvent::UlBsr { lcg_bytes, .. } => {
                if let Some(ue) = self.ues.get_mut(&ue_index) {
                    ue.ul_pending_bytes = lcg_bytes.iter().sum();
                }
            }
            FallbackEvent::SchedulingRequest { .. } => {
                if let Some(ue) = self.ues.get_mut(&ue_index) {
                    ue.sr_pending = true;
                }
            }
            FallbackEvent::DlHarqAck { harq_id, ack, .. } => self.handle_dl_harq_ack(ue_index, harq_id, ack),
            FallbackEvent::UlCrc(crc) => self.handle_ul_crc(ue_index, crc),
            FallbackEvent::ExitFallback { .. } => {
                self.stats.nof_exits += 1;
                self.remove_ue(ue_index, "left fallback");
                return;
            }
            FallbackEvent::RemoveUe { .. } => {
                self.remove_ue(ue_index, "removed");
                return;
            }
        }
        self.refresh_lists(ue_index);
    }

    fn add_ue(&mut self, ue_index: DuUeIndex, crnti: Rnti, msg3_slot: SlotPoint, sr_config: Option<SrConfig>) {
        if self.ues.contains_key(&ue_index) {
            warn!("{} already in fallback, ignoring creation", ue_index);
            return;
        }
        let cfg = self.fallback_cfg();
        let deadline = msg3_slot + cfg.conres_timer_subframes * self.cell.slots_per_subframe();
        let ue = FallbackUe::new(ue_index, crnti, deadline, sr_config, cfg);
        info!("{} rnti={} added to fallback, contention resolution deadline {}", ue_index, crnti, deadline);
        self.ues.insert(ue_index, ue);
        self.stats.nof_ues_added += 1;
    }

    fn remove_ue(&mut self, ue_index: DuUeIndex, reason: &str) {
        if self.ues.remove(&ue_index).is_some() {
            info!("{} {}", ue_index, reason);
            self.stats.nof_ues_removed += 1;
        }
        self.pending_dl.retain(|i| *i != ue_index);
        self.pending_ul.retain(|i| *i != ue_index);
        self.ongoing_dl.retain(|i| *i != ue_index);
    }

    fn handle_dl_harq_ack(&mut self, ue_index: DuUeIndex, harq_id: u8, ack: bool) {
        let ue = match self.ues.get_mut(&ue_index) {
            Some(ue) => ue,
            None => return,
        };
        let (outcome, is_conres) = match ue.dl_harq.get_mut(harq_id) {
            Some(h) => {
                let outcome = h.ack_info(ack);
                (outcome, matches!(h.params().map(|p| &p.content), Some(DlContent::ConRes)))
            }
            None => {
                warn!("{} HARQ-ACK for unknown DL HARQ {}", ue_index, harq_id);
                return;
            }
        };
        match outcome {
            HarqAckOutcome::Acked => {
                self.stats.nof_dl_acks += 1;
                if is_conres {
                    ue.conres = ConResState::Resolved;
                    self.stats.nof_conres_resolved += 1;
                    info!("{} rnti={} contention resolved", ue_index, ue.crnti);
                }
            }
            HarqAckOutcome::Nacked => self.stats.nof_dl_nacks += 1,
            HarqAckOutcome::NackedMaxRetx => {
                self.stats.nof_dl_nacks += 1;
                if is_conres {
                    self.stats.nof_conres_failed += 1;
                    self.remove_ue(ue_index, "failed contention resolution");
                } else {
                    warn!("{} DL HARQ {} discarded after maximum retransmissions", ue_index, harq_id);
                }
            }
            HarqAckOutcome::Ignored => debug!("{} stale HARQ-ACK for DL HARQ {}", ue_index, harq_id),
        }
    }

    fn handle_ul_crc(&mut self, ue_index: DuUeIndex, crc: UlCrcIndication) {
        let ue = match self.ues.get_mut(&ue_index) {
            Some(ue) => ue,
            None => return,
        };
        let h = match ue.ul_harq.get_mut(crc.harq_id) {
            Some(h) if h.ack_slot() == Some(crc.slot_rx) => h,
            _ => {
                debug!("{} stale CRC for UL HARQ {} slot={}", ue_index, crc.harq_id, crc.slot_rx);
                return;
            }
        };
        match h.ack_info(crc.tb_crc_ok) {
            HarqAckOutcome::Acked => self.stats.nof_ul_crc_ok += 1,
            HarqAckOutcome::Nacked => self.stats.nof_ul_crc_ko += 1,
            HarqAckOutcome::NackedMaxRetx => {
                self.stats.nof_ul_crc_ko += 1;
                warn!("{} UL HARQ {} failed after maximum retransmissions", ue_index, crc.harq_id);
            }
            HarqAckOutcome::Ignored => {}
        }
    }

    /// HARQ feedback timeouts and contention resolution expiry
    fn slot_indication(&mut self, slot: SlotPoint) {
        let mut conres_failed = Vec::new();
        let mut expired = Vec::new();
        for (ue_index, ue) in self.ues.iter_mut() {
            let stats = &mut self.stats;
            let mut ce_lost = false;
            ue.dl_harq.slot_indication(slot, |h, outcome| {
                stats.nof_dl_nacks += 1;
                let is_conres = matches!(h.params().map(|p| &p.content), Some(DlContent::ConRes));
                if outcome == HarqAckOutcome::NackedMaxRetx {
                    if is_conres {
                        ce_lost = true;
                    } else {
                        warn!("{} DL HARQ {} timed out after maximum retransmissions", ue_index, h.id());
                    }
                }
            });
            ue.ul_harq.slot_indication(slot, |h, outcome| {
                stats.nof_ul_crc_ko += 1;
                if outcome == HarqAckOutcome::NackedMaxRetx {
                    warn!("{} UL HARQ {} timed out after maximum retransmissions", ue_index, h.id());
                }
            });
            if ce_lost {
                conres_failed.push(*ue_index);
            } else if let ConResState::AwaitingCe { deadline } = ue.conres {
                if slot >= deadline {
                    expired.push(*ue_index);
                }
            }
        }

        for ue_index in conres_failed {
            self.stats.nof_conres_failed += 1;
            self.remove_ue(ue_index, "failed contention resolution");
        }
        for ue_index in expired {
            self.stats.nof_conres_expired += 1;
            warn!("{} contention resolution timer expired in {}", ue_index, slot);
            self.remove_ue(ue_index, "removed after contention resolution timeout");
        }
        let ue_indexes: Vec<DuUeIndex> = self.ues.keys().copied().collect();
        for ue_index in ue_indexes {
            self.refresh_lists(ue_index);
        }
    }

    fn refresh_lists(&mut self, ue_index: DuUeIndex) {
        let (dl, ul, ongoing) = match self.ues.get(&ue_index) {
            Some(ue) => (ue.has_pending_dl_newtx(), ue.has_pending_ul(), ue.has_dl_harq_in_flight()),
            None => (false, false, false),
        };
        update_membership(&mut self.pending_dl, ue_index, dl);
        update_membership(&mut self.pending_ul, ue_index, ul);
        update_membership(&mut self.ongoing_dl, ue_index, ongoing);
    }

    fn schedule_sr_opportunities(&mut self, res_grid: &mut CellResourceAllocator) {
        let sr_slot = res_grid.slot_tx() + SR_SCHEDULE_AHEAD_SLOTS;
        if !self.cell.is_ul_enabled(sr_slot) {
            return;
        }
        for ue in self.ues.values() {
            let sr = match ue.sr_config {
                Some(sr) if sr.is_sr_slot(sr_slot) => sr,
                _ => continue,
            };
            if self
                .pucch
                .alloc_sr_opportunity(&mut res_grid[SR_SCHEDULE_AHEAD_SLOTS], ue.crnti, sr.pucch_resource_id)
            {
                self.stats.nof_sr_opportunities += 1;
            } else {
                warn!("{} no PUCCH room for SR opportunity in {}", ue.ue_index, sr_slot);
            }
        }
    }

    /// Returns false when DL scheduling must stop for this slot
    fn schedule_dl_retxs(
        &mut self,
        res_grid: &mut CellResourceAllocator,
        reserved: &dyn Fn(SlotPoint) -> bool,
        budget: &mut BoundedRetry,
    ) -> bool {
        let candidates = self.ongoing_dl.clone();
        for ue_index in candidates {
            let retx = self.ues.get(&ue_index).and_then(|ue| {
                let harq_id = ue.dl_harq.find_pending_retx()?;
                let params = ue.dl_harq.get(harq_id)?.params()?;
                Some((
                    harq_id,
                    DlSizing::Retx {
                        nof_prbs: params.prbs.length(),
                        mcs: params.mcs,
                        nof_symbols: params.symbols.length(),
                        tbs_bytes: params.tbs_bytes,
                    },
                ))
            });
            let (harq_id, sizing) = match retx {
                Some(retx) => retx,
                None => continue,
            };
            if !budget.try_consume() {
                self.stats.dl_failures.record(FailureCause::AttemptBudget);
                return false;
            }
            match self.try_dl(res_grid, reserved, ue_index, sizing, DlTx::Retx(harq_id)) {
                Ok(plan) => {
                    self.stats.nof_dl_retx += 1;
                    debug!("{} DL retx HARQ {} in {}", ue_index, harq_id, res_grid.slot_tx() + plan.pdsch_offset);
                }
                Err(cause) => {
                    self.stats.dl_failures.record(cause);
                    debug!("{} DL retx postponed: {}", ue_index, cause);
                    if cause == FailureCause::NoPdcch {
                        return false;
                    }
                }
            }
            self.refresh_lists(ue_index);
        }
        true
    }

    fn schedule_dl_newtxs(
        &mut self,
        res_grid: &mut CellResourceAllocator,
        reserved: &dyn Fn(SlotPoint) -> bool,
        budget: &mut BoundedRetry,
    ) {
        let mut candidates: Vec<(DlNewTxKind, DuUeIndex)> = self
            .pending_dl
            .iter()
            .filter_map(|ue_index| {
                let ue = self.ues.get(ue_index)?;
                Some((ue.next_dl_newtx()?, *ue_index))
            })
            .collect();
        // Stable: FIFO order kept within each content class
        candidates.sort_by_key(|(kind, _)| *kind);

        for (kind, ue_index) in candidates {
            let sizing = match self.ues.get(&ue_index) {
                Some(ue) if ue.dl_harq.find_empty().is_some() => match dl_payload_bytes(ue, kind) {
                    (bytes, false) => DlSizing::Mandatory { bytes },
                    (bytes, true) => DlSizing::Segmentable {
                        bytes,
                        min_bytes: MIN_SRB1_SEGMENT_BYTES,
                    },
                },
                _ => continue,
            };
            if !budget.try_consume() {
                self.stats.dl_failures.record(FailureCause::AttemptBudget);
                return;
            }
            match self.try_dl(res_grid, reserved, ue_index, sizing, DlTx::NewTx(kind)) {
                Ok(plan) => {
                    self.stats.nof_dl_newtx += 1;
                    debug!(
                        "{} DL {:?} tbs={} in {}",
                        ue_index,
                        kind,
                        plan.tbs_bytes,
                        res_grid.slot_tx() + plan.pdsch_offset
                    );
                }
                Err(cause) => {
                    self.stats.dl_failures.record(cause);
                    debug!("{} DL {:?} postponed: {}", ue_index, kind, cause);
                    if cause == FailureCause::NoPdcch {
                        return;
                    }
                }
            }
            self.refresh_lists(ue_index);
        }
    }

    fn try_dl(
        &mut self,
        res_grid: &mut CellResourceAllocator,
        reserved: &dyn Fn(SlotPoint) -> bool,
        ue_index: DuUeIndex,
        sizing: DlSizing,
        tx: DlTx,
    ) -> Result<DlPlan, FailureCause> {
        let ue = self.ues.get(&ue_index).ok_or(FailureCause::SlotUnavailable)?;
        let plan = plan_dl(&self.cell, &self.pucch, &mut self.neg_cache, res_grid, reserved, ue, sizing)?;
        self.commit_dl(res_grid, ue_index, &plan, tx)?;
        Ok(plan)
    }

    fn commit_dl(
        &mut self,
        res_grid: &mut CellResourceAllocator,
        ue_index: DuUeIndex,
        plan: &DlPlan,
        tx: DlTx,
    ) -> Result<(), FailureCause> {
        let slot = res_grid.slot_tx();
        let cfg = &self.cell.params.fallback;
        let ue = self.ues.get_mut(&ue_index).ok_or(FailureCause::SlotUnavailable)?;
        let harq_id = match tx {
            DlTx::NewTx(_) => ue.dl_harq.find_empty(),
            DlTx::Retx(harq_id) => Some(harq_id),
        }
        .ok_or(FailureCause::SlotUnavailable)?;
        let retx_content = match tx {
            DlTx::Retx(_) => Some(
                ue.dl_harq
                    .get(harq_id)
                    .and_then(|h| h.params())
                    .map(|p| p.content.clone())
                    .ok_or(FailureCause::SlotUnavailable)?,
            ),
            DlTx::NewTx(_) => None,
        };
        let rnti = ue.crnti;
        let rnti_type = if ue.is_conres_complete() { RntiType::C } else { RntiType::Tc };

        let pdcch_idx = alloc_ue_dl_pdcch(&self.pdcch, &self.cell, &mut res_grid[plan.pdcch_offset], rnti, rnti_type)
            .ok_or(FailureCause::NoPdcch)?;
        let ack_offset = plan.pdsch_offset + plan.k1 as u32;
        let pucch_resource = match self.pucch.alloc_common_harq_ack(&mut res_grid[ack_offset], rnti) {
            Some(resource) => resource,
            None => {
                self.pdcch.cancel_last_dl_pdcch(&mut res_grid[plan.pdcch_offset]);
                return Err(FailureCause::NoPucch);
            }
        };

        let pdsch_slot = slot + plan.pdsch_offset;
        let ack_slot = slot + ack_offset;
        let (content, is_retx) = match (retx_content, tx) {
            (Some(content), _) => (content, true),
            (None, DlTx::NewTx(kind)) => (ue.consume_dl(kind, plan.tbs_bytes), false),
            (None, DlTx::Retx(_)) => return Err(FailureCause::SlotUnavailable),
        };
        let harq = ue.dl_harq.get_mut(harq_id).ok_or(FailureCause::SlotUnavailable)?;
        let params = DlHarqParams {
            content: content.clone(),
            prbs: plan.prbs,
            symbols: plan.symbols,
            nof_dmrs_symbols: plan.nof_dmrs_symbols,
            td_index: plan.td_index,
            mcs: plan.mcs,
            tbs_bytes: plan.tbs_bytes,
        };
        if is_retx {
            harq.new_retx_with(ack_slot, params);
        } else {
            harq.new_tx(ack_slot, cfg.max_dl_harq_retxs, params);
        }
        let dci_harq = harq.dci_harq();

        res_grid[plan.pdcch_offset].result.dl.pdcchs[pdcch_idx].dci = Some(DlDci {
            prbs: plan.prbs,
            time_resource: plan.td_index,
            mcs: plan.mcs,
            harq: Some(dci_harq),
            k1: Some(plan.k1),
            pucch_resource: Some(pucch_resource),
        });
        let pdsch_alloc = &mut res_grid[plan.pdsch_offset];
        pdsch_alloc.dl_grid.fill(plan.symbols, plan.prbs);
        pdsch_alloc.result.dl.ue_grants.push(UeDlGrant {
            ue_index,
            pdsch: PdschInfo {
                rnti,
                prbs: plan.prbs,
                symbols: plan.symbols,
                nof_dmrs_symbols: plan.nof_dmrs_symbols,
                mcs: plan.mcs,
                tbs_bytes: plan.tbs_bytes,
            },
            harq: dci_harq,
            content: content.clone(),
            is_retx,
            ack_slot,
        });

        ue.last_pdsch_slot = Some(pdsch_slot);
        ue.last_ack_slot = Some(ack_slot);
        if !is_retx {
            match content {
                DlContent::ConRes => {
                    if let ConResState::AwaitingCe { deadline } = ue.conres {
                        ue.conres = ConResState::CeSent { deadline, harq_id };
                    }
                    info!("{} rnti={} Contention Resolution CE in {}", ue_index, rnti, pdsch_slot);
                }
                DlContent::Srb0 { bytes } | DlContent::Srb1 { bytes } => self.stats.nof_dl_bytes += bytes as u64,
            }
        }
        Ok(())
    }

    fn schedule_ul(&mut self, res_grid: &mut CellResourceAllocator) {
        let mut budget = BoundedRetry::new(self.fallback_cfg().max_sched_attempts_per_slot);
        let candidates = self.pending_ul.clone();
        for ue_index in candidates {
            let req = match self.ues.get(&ue_index) {
                Some(ue) => match next_ul_tx(ue) {
                    Some(req) => req,
                    None => continue,
                },
                None => continue,
            };
            if !budget.try_consume() {
                self.stats.ul_failures.record(FailureCause::AttemptBudget);
                break;
            }
            match self.try_ul(res_grid, ue_index, req) {
                Ok(plan) => {
                    match req {
                        UlTx::NewTx { .. } => self.stats.nof_ul_newtx += 1,
                        UlTx::Retx { .. } => self.stats.nof_ul_retx += 1,
                    }
                    debug!(
                        "{} PUSCH tbs={} prbs={:?} in {}",
                        ue_index,
                        plan.tbs_bytes,
                        plan.prbs,
                        res_grid.slot_tx() + plan.offset
                    );
                }
                Err(cause) => {
                    self.stats.ul_failures.record(cause);
                    debug!("{} UL grant postponed: {}", ue_index, cause);
                    if cause == FailureCause::NoPdcch {
                        break;
                    }
                }
            }
            self.refresh_lists(ue_index);
        }
    }

    fn try_ul(&mut self, res_grid: &mut CellResourceAllocator, ue_index: DuUeIndex, req: UlTx) -> Result<UlPlan, FailureCause> {
        let ue = self.ues.get(&ue_index).ok_or(FailureCause::SlotUnavailable)?;
        let plan = plan_ul(&self.cell, res_grid, ue, req)?;

        let slot = res_grid.slot_tx();
        let cfg = &self.cell.params.fallback;
        let ue = self.ues.get_mut(&ue_index).ok_or(FailureCause::SlotUnavailable)?;
        let rnti = ue.crnti;
        let rnti_type = if ue.is_conres_complete() { RntiType::C } else { RntiType::Tc };
        let (harq_id, is_retx) = match req {
            UlTx::NewTx { harq_id, .. } => (harq_id, false),
            UlTx::Retx { harq_id, .. } => (harq_id, true),
        };
        let harq = ue.ul_harq.get_mut(harq_id).ok_or(FailureCause::SlotUnavailable)?;
        let pdcch_idx =
            alloc_ue_ul_pdcch(&self.pdcch, &self.cell, &mut res_grid[0], rnti, rnti_type).ok_or(FailureCause::NoPdcch)?;

        let pusch_slot = slot + plan.offset;
        let params = UlHarqParams {
            prbs: plan.prbs,
            symbols: plan.symbols,
            nof_dmrs_symbols: plan.nof_dmrs_symbols,
            td_index: plan.td_index,
            mcs: plan.mcs,
            tbs_bytes: plan.tbs_bytes,
        };
        if is_retx {
            harq.new_retx_with(pusch_slot, params);
        } else {
            harq.new_tx(pusch_slot, cfg.max_ul_harq_retxs, params);
        }
        let dci_harq = harq.dci_harq();

        res_grid[0].result.ul.pdcchs[pdcch_idx].dci = Some(UlDci {
            prbs: plan.prbs,
            time_resource: plan.td_index,
            mcs: plan.mcs,
            harq: dci_harq,
        });
        let pusch_alloc = &mut res_grid[plan.offset];
        pusch_alloc.ul_grid.fill(plan.symbols, plan.prbs);
        pusch_alloc.result.ul.puschs.push(PuschGrant {
            kind: PuschKind::Ue(ue_index),
            pusch: PuschInfo {
                rnti,
                prbs: plan.prbs,
                symbols: plan.symbols,
                nof_dmrs_symbols: plan.nof_dmrs_symbols,
                mcs: plan.mcs,
                tbs_bytes: plan.tbs_bytes,
                harq: dci_harq,
            },
            is_retx,
        });
        if self.pucch.remove_sr_only(pusch_alloc, rnti) {
            trace!("{} SR-only PUCCH dropped in {}", ue_index, pusch_slot);
        }

        ue.last_pusch_slot = Some(pusch_slot);
        ue.sr_pending = false;
        if !is_retx {
            ue.ul_pending_bytes = ue.ul_pending_bytes.saturating_sub(plan.tbs_bytes);
        }
        Ok(plan)
    }
}

fn update_membership(list: &mut Vec<DuUeIndex>, ue_index: DuUeIndex, present: bool) {
    match (list.iter().position(|i| *i == ue_index), present) {
        (None, true) => list.push(ue_index),
        (Some(pos), false) => {
            list.remove(pos);
        }
        _ => {}
    }
}

fn next_ul_tx(ue: &FallbackUe) -> Option<UlTx> {
    if let Some(harq_id) = ue.ul_harq.find_pending_retx() {
        let params = *ue.ul_harq.get(harq_id)?.params()?;
        return Some(UlTx::Retx { harq_id, params });
    }
    if ue.ul_pending_bytes > 0 || ue.sr_pending {
        let harq_id = ue.ul_harq.find_empty()?;
        return Some(UlTx::NewTx {
            harq_id,
            bytes: ue.ul_pending_bytes.max(MIN_UL_GRANT_BYTES),
        });
    }
    None
}

fn alloc_ue_dl_pdcch(
    pdcch: &PdcchAllocator,
    cell: &CellConfiguration,
    slot_alloc: &mut SlotAllocator,
    rnti: Rnti,
    rnti_type: RntiType,
) -> Option<usize> {
    let al = cell.params.common_aggregation_level;
    cell.params
        .fallback
        .ue_search_space_ids
        .iter()
        .filter_map(|id| cell.search_space(*id))
        .find_map(|ss| pdcch.alloc_dl_pdcch(slot_alloc, rnti, rnti_type, ss, al))
}

fn alloc_ue_ul_pdcch(
    pdcch: &PdcchAllocator,
    cell: &CellConfiguration,
    slot_alloc: &mut SlotAllocator,
    rnti: Rnti,
    rnti_type: RntiType,
) -> Option<usize> {
    let al = cell.params.common_aggregation_level;
    cell.params
        .fallback
        .ue_search_space_ids
        .iter()
        .filter_map(|id| cell.search_space(*id))
        .find_map(|ss| pdcch.alloc_ul_pdcch(slot_alloc, rnti, rnti_type, ss, al))
}

/// PRB count, MCS and TBS of a DL grant limited to `max_prbs`
fn size_dl(cfg: &FallbackConfig, sizing: DlSizing, nof_symbols: u8, nof_dmrs: u8, max_prbs: u16) -> Option<(u16, u8, u32)> {
    match sizing {
        DlSizing::Mandatory { bytes } => (cfg.dl_mcs..=cfg.max_dl_mcs.max(cfg.dl_mcs)).find_map(|mcs| {
            prbs_for_payload(bytes, mcs, nof_symbols, nof_dmrs, max_prbs).map(|s| (s.nof_prbs, mcs, s.tbs_bytes))
        }),
        DlSizing::Segmentable { bytes, min_bytes } => {
            let mcs = cfg.dl_mcs;
            if let Some(s) = prbs_for_payload(bytes, mcs, nof_symbols, nof_dmrs, max_prbs) {
                return Some((s.nof_prbs, mcs, s.tbs_bytes));
            }
            let tbs = tbs_bytes(TbsParams {
                mcs,
                nof_prbs: max_prbs,
                nof_symbols,
                nof_dmrs_symbols: nof_dmrs,
            });
            (tbs >= min_bytes).then_some((max_prbs, mcs, tbs))
        }
        DlSizing::Retx {
            nof_prbs,
            mcs,
            nof_symbols: orig_symbols,
            tbs_bytes: orig_tbs,
        } => {
            if nof_prbs > max_prbs || orig_symbols != nof_symbols {
                return None;
            }
            let tbs = tbs_bytes(TbsParams {
                mcs,
                nof_prbs,
                nof_symbols,
                nof_dmrs_symbols: nof_dmrs,
            });
            (tbs == orig_tbs).then_some((nof_prbs, mcs, tbs))
        }
    }
}

/// Largest k1 whose HARQ-ACK slot is UL, has a free common PUCCH and comes
/// after the last scheduled HARQ-ACK of the UE
fn select_k1(
    cell: &CellConfiguration,
    pucch: &PucchAllocator,
    res_grid: &CellResourceAllocator,
    ue: &FallbackUe,
    pdsch_offset: u32,
) -> Option<u8> {
    let slot = res_grid.slot_tx();
    cell.params.fallback.k1_candidates.iter().copied().find(|k1| {
        let ack_offset = pdsch_offset + *k1 as u32;
        if ack_offset as usize >= RING_ALLOCATOR_SIZE {
            return false;
        }
        let ack_slot = slot + ack_offset;
        ue.last_ack_slot.map_or(true, |last| ack_slot > last)
            && cell.is_ul_enabled(ack_slot)
            && pucch.can_alloc_harq_ack(&res_grid[ack_offset], ue.crnti)
    })
}

/// Search the DL lookahead for a PDSCH slot, time-domain resource, PRBs and k1
fn plan_dl(
    cell: &CellConfiguration,
    pucch: &PucchAllocator,
    neg_cache: &mut SlotNegativeCache,
    res_grid: &CellResourceAllocator,
    reserved: &dyn Fn(SlotPoint) -> bool,
    ue: &FallbackUe,
    sizing: DlSizing,
) -> Result<DlPlan, FailureCause> {
    let slot = res_grid.slot_tx();
    let cfg = &cell.params.fallback;
    let first_offset = match ue.last_pdsch_slot {
        Some(last) => ((last - slot) + 1).max(0) as u32,
        None => 0,
    };
    let mut last_err = FailureCause::SlotUnavailable;

    for pdsch_offset in first_offset..=cfg.max_dl_lookahead_slots {
        let pdsch_slot = slot + pdsch_offset;
        if neg_cache.is_marked(pdsch_slot) {
            last_err = FailureCause::NoPdsch;
            continue;
        }
        if !cell.is_dl_enabled(pdsch_slot) || cell.is_csi_rs_slot(pdsch_slot) {
            continue;
        }
        if pdsch_offset > 0 && reserved(pdsch_slot) {
            last_err = FailureCause::SlotUnavailable;
            continue;
        }
        let slot_alloc = &res_grid[pdsch_offset];
        if slot_alloc.result.dl.ue_grants.len() >= MAX_UE_PDUS_PER_SLOT {
            last_err = FailureCause::ResultListFull;
            continue;
        }

        let mut nof_fitting = 0;
        let mut has_space = false;
        for (td_index, td) in cell.params.pdsch_time_domain.iter().enumerate() {
            let symbols = td.symbols();
            if td.k0 as u32 > pdsch_offset || !cell.pdsch_fits(pdsch_slot, symbols) {
                continue;
            }
            let pdcch_offset = pdsch_offset - td.k0 as u32;
            if pdcch_offset > 0 && reserved(slot + pdcch_offset) {
                continue;
            }
            nof_fitting += 1;
            let free = slot_alloc.dl_grid.largest_free_interval(symbols, cell.dl_bwp_prbs());
            if free.is_empty() {
                last_err = FailureCause::NoPdsch;
                continue;
            }
            has_space = true;
            let nof_dmrs = nof_dmrs_symbols(symbols.stop);
            let (nof_prbs, mcs, tbs) = match size_dl(cfg, sizing, symbols.length(), nof_dmrs, free.length()) {
                Some(sized) => sized,
                None => {
                    last_err = FailureCause::NoPdsch;
                    continue;
                }
            };
            let k1 = match select_k1(cell, pucch, res_grid, ue, pdsch_offset) {
                Some(k1) => k1,
                None => {
                    last_err = FailureCause::NoPucch;
                    continue;
                }
            };
            return Ok(DlPlan {
                pdcch_offset,
                pdsch_offset,
                td_index: td_index as u8,
                symbols,
                nof_dmrs_symbols: nof_dmrs,
                prbs: PrbInterval::new(free.start, free.start + nof_prbs),
                mcs,
                tbs_bytes: tbs,
                k1,
            });
        }
        if nof_fitting > 0 && !has_space {
            neg_cache.mark(pdsch_slot);
        }
    }
    Err(last_err)
}

/// Pick a k2 time-domain resource and PRBs for a PUSCH granted in the current slot
fn plan_ul(
    cell: &CellConfiguration,
    res_grid: &CellResourceAllocator,
    ue: &FallbackUe,
    req: UlTx,
) -> Result<UlPlan, FailureCause> {
    let slot = res_grid.slot_tx();
    if !cell.is_dl_enabled(slot) {
        return Err(FailureCause::SlotUnavailable);
    }
    let cfg = &cell.params.fallback;
    let limits = cell.pusch_prbs();
    let mut last_err = FailureCause::NoPusch;

    for (td_index, td) in cell.params.pusch_time_domain.iter().enumerate() {
        let offset = td.k2 as u32;
        let pusch_slot = slot + offset;
        if ue.last_pusch_slot.map_or(false, |last| pusch_slot <= last) {
            continue;
        }
        let symbols = td.symbols();
        if !cell.pusch_fits(pusch_slot, symbols) {
            last_err = FailureCause::SlotUnavailable;
            continue;
        }
        let slot_alloc = &res_grid[offset];
        if slot_alloc.result.ul.puschs.len() >= MAX_PUSCH_PER_SLOT {
            last_err = FailureCause::ResultListFull;
            continue;
        }
        let nof_dmrs = nof_dmrs_symbols(symbols.length());
        let (prbs, mcs, tbs) = match req {
            UlTx::Retx { params, .. } => {
                if symbols.length() != params.symbols.length() {
                    continue;
                }
                match slot_alloc.ul_grid.find_free_prbs(symbols, limits, params.prbs.length()) {
                    Some(prbs) => (prbs, params.mcs, params.tbs_bytes),
                    None => {
                        last_err = FailureCause::NoPusch;
                        continue;
                    }
                }
            }
            UlTx::NewTx { bytes, .. } => {
                let free = slot_alloc.ul_grid.largest_free_interval(symbols, limits);
                let max_prbs = free.length().min(cfg.max_ul_prbs);
                if max_prbs == 0 {
                    last_err = FailureCause::NoPusch;
                    continue;
                }
                let nof_prbs = prbs_for_payload(bytes, cfg.ul_mcs, symbols.length(), nof_dmrs, max_prbs)
                    .map(|s| s.nof_prbs)
                    .unwrap_or(max_prbs);
                let tbs = tbs_bytes(TbsParams {
                    mcs: cfg.ul_mcs,
                    nof_prbs,
                    nof_symbols: symbols.length(),
                    nof_dmrs_symbols: nof_dmrs,
                });
                if tbs < MIN_UL_GRANT_BYTES {
                    last_err = FailureCause::NoPusch;
                    continue;
                }
                (PrbInterval::new(free.start, free.start + nof_prbs), cfg.ul_mcs, tbs)
            }
        };
        return Ok(UlPlan {
            offset,
            td_index: td_index as u8,
            symbols,
            nof_dmrs_symbols: nof_dmrs,
            prbs,
            mcs,
            tbs_bytes: tbs,
        });
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::config::{CellSchedConfig, CsiRsConfig};
    use crate::mac::indications::{FallbackLcid, SrConfig};

    const UE: DuUeIndex = DuUeIndex(0);
    const CRNTI: Rnti = Rnti(0x4601);

    fn setup_with(cfg: CellSchedConfig) -> (UeFallbackScheduler, CellResourceAllocator) {
        let cell = Arc::new(CellConfiguration::new(cfg).unwrap());
        let res_grid = CellResourceAllocator::new(&cell);
        (UeFallbackScheduler::new(cell), res_grid)
    }

    fn setup() -> (UeFallbackScheduler, CellResourceAllocator) {
        setup_with(CellSchedConfig::default())
    }

    fn run(sched: &mut UeFallbackScheduler, res_grid: &mut CellResourceAllocator, slot: SlotPoint) {
        res_grid.slot_indication(slot);
        sched.run_slot(res_grid, &|_| false);
    }

    fn add_ue(sched: &UeFallbackScheduler, slot: SlotPoint, sr_config: Option<SrConfig>) {
        sched
            .sender()
            .push(FallbackEvent::AddUe {
                ue_index: UE,
                crnti: CRNTI,
                msg3_slot: slot,
                sr_config,
            })
            .unwrap();
    }

    /// Send the CE at `start` and acknowledge it; returns the next free slot
    fn resolve(sched: &mut UeFallbackScheduler, res_grid: &mut CellResourceAllocator, start: SlotPoint) -> SlotPoint {
        add_ue(sched, start, None);
        sched.sender().push(FallbackEvent::ConResPending { ue_index: UE }).unwrap();
        run(sched, res_grid, start);
        let harq_id = res_grid[0].result.dl.ue_grants[0].harq.harq_id;
        sched
            .sender()
            .push(FallbackEvent::DlHarqAck { ue_index: UE, harq_id, ack: true })
            .unwrap();
        start + 1
    }

    #[test]
    fn test_conres_ce_then_srb0() {
        let (mut sched, mut res_grid) = setup();
        let s = SlotPoint::new(0, 10, 0);
        add_ue(&sched, s, None);
        sched.sender().push(FallbackEvent::ConResPending { ue_index: UE }).unwrap();
        run(&mut sched, &mut res_grid, s);

        let grants = &res_grid[0].result.dl.ue_grants;
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].content, DlContent::ConRes);
        assert_eq!(grants[0].ack_slot, s + 8);
        assert_eq!(res_grid[0].result.dl.pdcchs[0].rnti_type, RntiType::Tc);
        assert!(res_grid[8].result.ul.pucchs.iter().any(|p| p.rnti == CRNTI && p.common));
        let harq_id = grants[0].harq.harq_id;
        assert!(matches!(sched.ue(UE).unwrap().conres, ConResState::CeSent { .. }));

        sched
            .sender()
            .push(FallbackEvent::DlHarqAck { ue_index: UE, harq_id, ack: true })
            .unwrap();
        sched
            .sender()
            .push(FallbackEvent::DlBufferState {
                ue_index: UE,
                lcid: FallbackLcid::Srb0,
                bytes: 40,
            })
            .unwrap();
        run(&mut sched, &mut res_grid, s + 1);
        let grants = &res_grid[0].result.dl.ue_grants;
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].content, DlContent::Srb0 { bytes: 40 });
        assert_eq!(grants[0].ack_slot, s + 9);
        assert_eq!(res_grid[0].result.dl.pdcchs[0].rnti_type, RntiType::C);
        assert_eq!(sched.stats().nof_conres_resolved, 1);
    }

    #[test]
    fn test_conres_timer_expiry_removes_ue() {
        let (mut sched, mut res_grid) = setup();
        let s = SlotPoint::new(0, 0, 0);
        add_ue(&sched, s, None);
        for i in 0..64 {
            run(&mut sched, &mut res_grid, s + i);
            assert!(res_grid[0].result.dl.ue_grants.is_empty());
        }
        assert_eq!(sched.nof_ues(), 1);
        run(&mut sched, &mut res_grid, s + 64);
        assert_eq!(sched.nof_ues(), 0);
        assert_eq!(sched.stats().nof_conres_expired, 1);
    }

    #[test]
    fn test_oversized_srb0_is_postponed() {
        let (mut sched, mut res_grid) = setup();
        let s = resolve(&mut sched, &mut res_grid, SlotPoint::new(0, 0, 0));
        sched
            .sender()
            .push(FallbackEvent::DlBufferState {
                ue_index: UE,
                lcid: FallbackLcid::Srb0,
                bytes: 4000,
            })
            .unwrap();
        run(&mut sched, &mut res_grid, s);
        for offset in 0..=10 {
            assert!(res_grid[offset].result.dl.ue_grants.is_empty());
        }
        assert_eq!(sched.ue(UE).unwrap().srb0_bytes, 4000);
        assert!(sched.stats().dl_failures.no_pdsch > 0);
    }

    #[test]
    fn test_nack_triggers_retx_with_same_tbs() {
        let (mut sched, mut res_grid) = setup();
        let s = SlotPoint::new(0, 3, 0);
        add_ue(&sched, s, None);
        sched.sender().push(FallbackEvent::ConResPending { ue_index: UE }).unwrap();
        run(&mut sched, &mut res_grid, s);
        let first = res_grid[0].result.dl.ue_grants[0].clone();

        sched
            .sender()
            .push(FallbackEvent::DlHarqAck {
                ue_index: UE,
                harq_id: first.harq.harq_id,
                ack: false,
            })
            .unwrap();
        run(&mut sched, &mut res_grid, s + 1);
        let retx = &res_grid[0].result.dl.ue_grants[0];
        assert!(retx.is_retx);
        assert_eq!(retx.content, DlContent::ConRes);
        assert_eq!(retx.pdsch.tbs_bytes, first.pdsch.tbs_bytes);
        assert_eq!(retx.pdsch.prbs.length(), first.pdsch.prbs.length());
        assert_eq!(retx.harq.rv, 2);
        assert_eq!(retx.harq.ndi, first.harq.ndi);
        assert!(retx.ack_slot > first.ack_slot);
    }

    #[test]
    fn test_conres_failure_after_max_retx() {
        let mut cfg = CellSchedConfig::default();
        cfg.fallback.max_dl_harq_retxs = 0;
        let (mut sched, mut res_grid) = setup_with(cfg);
        let s = SlotPoint::new(0, 0, 0);
        add_ue(&sched, s, None);
        sched.sender().push(FallbackEvent::ConResPending { ue_index: UE }).unwrap();
        run(&mut sched, &mut res_grid, s);
        let harq_id = res_grid[0].result.dl.ue_grants[0].harq.harq_id;
        sched
            .sender()
            .push(FallbackEvent::DlHarqAck { ue_index: UE, harq_id, ack: false })
            .unwrap();
        run(&mut sched, &mut res_grid, s + 1);
        assert_eq!(sched.nof_ues(), 0);
        assert_eq!(sched.stats().nof_conres_failed, 1);
    }

    #[test]
    fn test_ack_slots_strictly_increase() {
        let (mut sched, mut res_grid) = setup();
        let s = resolve(&mut sched, &mut res_grid, SlotPoint::new(0, 0, 0));
        sched
            .sender()
            .push(FallbackEvent::DlBufferState {
                ue_index: UE,
                lcid: FallbackLcid::Srb1,
                bytes: 20_000,
            })
            .unwrap();
        let mut grants = Vec::new();
        for i in 0..6 {
            run(&mut sched, &mut res_grid, s + i);
            grants.extend(res_grid[0].result.dl.ue_grants.iter().cloned().map(|g| (s + i, g)));
        }
        assert!(grants.len() >= 2);
        for pair in grants.windows(2) {
            assert!(pair[1].0 > pair[0].0);
            assert!(pair[1].1.ack_slot > pair[0].1.ack_slot);
        }
        assert!(grants.iter().all(|(_, g)| matches!(g.content, DlContent::Srb1 { .. })));
    }

    #[test]
    fn test_pusch_grant_drops_sr_only_pucch() {
        let (mut sched, mut res_grid) = setup();
        let s = SlotPoint::new(0, 20, 0);
        let sr = SrConfig {
            period_slots: 1,
            offset_slots: 0,
            pucch_resource_id: 3,
        };
        add_ue(&sched, s, Some(sr));
        for i in 0..12 {
            run(&mut sched, &mut res_grid, s + i);
        }
        // SR of slot s + 16, placed while running s
        assert!(res_grid[5].result.ul.pucchs.iter().any(|p| p.rnti == CRNTI && p.sr));

        sched.sender().push(FallbackEvent::SchedulingRequest { ue_index: UE }).unwrap();
        run(&mut sched, &mut res_grid, s + 12);
        assert_eq!(res_grid[0].result.ul.pdcchs.len(), 1);
        let puschs = &res_grid[4].result.ul.puschs;
        assert_eq!(puschs.len(), 1);
        assert_eq!(puschs[0].kind, PuschKind::Ue(UE));
        assert!(!res_grid[4].result.ul.pucchs.iter().any(|p| p.rnti == CRNTI));
        assert!(!sched.ue(UE).unwrap().sr_pending);
    }

    #[test]
    fn test_bsr_grant_and_crc() {
        let (mut sched, mut res_grid) = setup();
        let s = SlotPoint::new(0, 7, 0);
        add_ue(&sched, s, None);
        sched
            .sender()
            .push(FallbackEvent::UlBsr {
                ue_index: UE,
                lcg_bytes: vec![50, 30],
            })
            .unwrap();
        run(&mut sched, &mut res_grid, s);
        let pusch = res_grid[4].result.ul.puschs[0].pusch.clone();
        assert!(pusch.tbs_bytes >= 80);
        assert!(sched.cell.pusch_prbs().contains(&pusch.prbs));
        assert!(sched.pending_ul_ues().is_empty());

        sched
            .sender()
            .push(FallbackEvent::UlCrc(UlCrcIndication {
                slot_rx: s + 4,
                rnti: CRNTI,
                ue_index: Some(UE),
                harq_id: pusch.harq.harq_id,
                tb_crc_ok: true,
            }))
            .unwrap();
        run(&mut sched, &mut res_grid, s + 1);
        assert_eq!(sched.stats().nof_ul_crc_ok, 1);
        assert!(sched.ue(UE).unwrap().ul_harq.all_empty());
    }

    #[test]
    fn test_negative_cache_entries() {
        let mut cache = SlotNegativeCache::new();
        let s = SlotPoint::new(0, 5, 3);
        cache.mark(s);
        assert!(cache.is_marked(s));
        assert!(!cache.is_marked(s + 1));
        // Same index one window later
        assert!(!cache.is_marked(s + NEG_CACHE_WINDOW as u32));
        cache.mark(s + NEG_CACHE_WINDOW as u32);
        assert!(!cache.is_marked(s));
    }

    #[test]
    fn test_marked_slot_is_skipped() {
        let (mut sched, mut res_grid) = setup();
        let s = resolve(&mut sched, &mut res_grid, SlotPoint::new(0, 0, 0));
        sched
            .sender()
            .push(FallbackEvent::DlBufferState {
                ue_index: UE,
                lcid: FallbackLcid::Srb1,
                bytes: 300,
            })
            .unwrap();
        // Free slot already marked, next slot saturated
        sched.neg_cache.mark(s);
        res_grid.slot_indication(s);
        let bwp = sched.cell.dl_bwp_prbs();
        res_grid[1].dl_grid.fill(OfdmSymbolRange::new(2, 14), bwp);
        run(&mut sched, &mut res_grid, s);

        assert!(res_grid[0].result.dl.ue_grants.is_empty());
        assert!(res_grid[1].result.dl.ue_grants.is_empty());
        let grants = &res_grid[2].result.dl.ue_grants;
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].content, DlContent::Srb1 { bytes: 300 });
        assert!(sched.neg_cache.is_marked(s + 1));
        assert!(!sched.neg_cache.is_marked(s + 2));
    }

    #[test]
    fn test_csi_rs_slots_carry_no_pdsch() {
        let mut cfg = CellSchedConfig::default();
        cfg.csi_rs = Some(CsiRsConfig { period_slots: 5, offset_slots: 2 });
        let (mut sched, mut res_grid) = setup_with(cfg);
        let s = resolve(&mut sched, &mut res_grid, SlotPoint::new(0, 0, 0));
        sched
            .sender()
            .push(FallbackEvent::DlBufferState {
                ue_index: UE,
                lcid: FallbackLcid::Srb1,
                bytes: 50_000,
            })
            .unwrap();
        let mut nof_grants = 0;
        for i in 0..20 {
            run(&mut sched, &mut res_grid, s + i);
            let slot = res_grid[0].slot;
            let grants = res_grid[0].result.dl.ue_grants.len();
            if slot.count() % 5 == 2 {
                assert_eq!(grants, 0, "PDSCH in CSI-RS slot {}", slot);
            }
            nof_grants += grants;
        }
        assert!(nof_grants >= 8);
    }

    #[test]
    fn test_reserved_slots_skipped_ahead_only() {
        let (mut sched, mut res_grid) = setup();
        let s = resolve(&mut sched, &mut res_grid, SlotPoint::new(0, 0, 0));
        sched
            .sender()
            .push(FallbackEvent::DlBufferState {
                ue_index: UE,
                lcid: FallbackLcid::Srb1,
                bytes: 300,
            })
            .unwrap();
        res_grid.slot_indication(s);
        let bwp = sched.cell.dl_bwp_prbs();
        res_grid[0].dl_grid.fill(OfdmSymbolRange::new(2, 14), bwp);
        let reserved = |slot: SlotPoint| slot == s + 1;
        sched.run_slot(&mut res_grid, &reserved);
        assert!(res_grid[1].result.dl.ue_grants.is_empty());
        assert!(res_grid[1].result.dl.pdcchs.is_empty());
        assert_eq!(res_grid[2].result.dl.ue_grants.len(), 1);
        assert!(!sched.neg_cache.is_marked(s + 1));

        // A reserved current slot is still usable
        sched
            .sender()
            .push(FallbackEvent::DlBufferState {
                ue_index: UE,
                lcid: FallbackLcid::Srb1,
                bytes: 300,
            })
            .unwrap();
        let slot = s + 3;
        res_grid.slot_indication(slot);
        sched.run_slot(&mut res_grid, &|sl| sl == slot);
        assert_eq!(res_grid[0].result.dl.ue_grants.len(), 1);
    }

    #[test]
    fn test_exit_fallback_drops_ue() {
        let (mut sched, mut res_grid) = setup();
        let s = resolve(&mut sched, &mut res_grid, SlotPoint::new(0, 0, 0));
        sched.sender().push(FallbackEvent::ExitFallback { ue_index: UE }).unwrap();
        run(&mut sched, &mut res_grid, s);
        assert_eq!(sched.nof_ues(), 0);
        assert!(sched.ongoing_dl_ues().is_empty());
        assert_eq!(sched.stats().nof_exits, 1);
    }
}
