//! Random Access Scheduler
//!
//! Turns detected PRACH preambles into RAR grants carrying Msg3 UL grants,
//! inside the RAR window of 3GPP TS 38.321 clause 5.1.4, and owns the Msg3
//! HARQ processes. Msg3 state lives in a fixed ring indexed by
//! `TC-RNTI mod MAX_NOF_MSG3`; a preamble whose ring entry is busy is dropped.

use super::common_pdsch::{alloc_common_grant, eligible_pdsch_td, find_pdsch_candidate, PdschCandidate};
use super::config::CellConfiguration;
use super::harq::{HarqAckOutcome, HarqProcess};
use super::indications::{indication_queue, DetectedPreamble, IndicationReceiver, IndicationSender, RachIndication, UlCrcIndication};
use super::pdcch::PdcchAllocator;
use super::resource_grid::{find_free_run, CellResourceAllocator, RING_ALLOCATOR_SIZE};
use super::retry::{AllocOutcome, BoundedRetry, CauseCounters, FailureCause};
use super::sched_result::{
    OfdmSymbolRange, PrbInterval, PuschGrant, PuschInfo, PuschKind, RarGrant, RarUlGrant, RntiType, UlDci,
    MAX_GRANTS_PER_RAR, MAX_PUSCH_PER_SLOT, MAX_RAR_PDUS_PER_SLOT,
};
use super::tbs::{nof_dmrs_symbols, prbs_for_payload};
use common::types::Rnti;
use common::SlotPoint;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Size of the Msg3 ring
pub const MAX_NOF_MSG3: usize = 1024;

/// MAC subheader plus MAC RAR
pub const RAR_BYTES_PER_GRANT: u32 = 8;

/// Smallest Msg3 transport block (CCCH SDU of 48 bits plus subheader)
pub const MSG3_MIN_BYTES: u32 = 7;

/// RA-RNTI of a PRACH occasion (TS 38.321 clause 5.1.3)
pub fn get_ra_rnti(start_symbol: u8, slot_index: u8, frequency_index: u8, is_sul: bool) -> Rnti {
    debug_assert!(start_symbol < 14 && slot_index < 80 && frequency_index < 8);
    let value = 1
        + start_symbol as u32
        + 14 * slot_index as u32
        + 14 * 80 * frequency_index as u32
        + 14 * 80 * 8 * is_sul as u32;
    Rnti(value as u16)
}

/// Transmission parameters of a Msg3 PUSCH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg3Params {
    pub prbs: PrbInterval,
    pub symbols: OfdmSymbolRange,
    pub nof_dmrs_symbols: u8,
    pub td_index: u8,
    pub mcs: u8,
    pub tbs_bytes: u32,
}

#[derive(Debug)]
struct PendingMsg3 {
    preamble: DetectedPreamble,
    harq: HarqProcess<Msg3Params>,
}

#[derive(Debug)]
struct PendingRar {
    ra_rnti: Rnti,
    prach_slot: SlotPoint,
    /// RAR window `[start, stop)`
    window_start: SlotPoint,
    window_stop: SlotPoint,
    tc_rntis: Vec<Rnti>,
    failures: CauseCounters,
    last_attempt: Option<SlotPoint>,
}

/// Msg3 successfully decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg3Reception {
    pub tc_rnti: Rnti,
    pub slot_rx: SlotPoint,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RaStats {
    pub nof_preambles: u64,
    pub nof_preambles_dropped: u64,
    /// PRACH occasions dropped for an out of range s_id, t_id or f_id
    pub nof_invalid_occasions: u64,
    pub nof_rars: u64,
    pub nof_msg3_grants: u64,
    pub nof_msg3_retxs: u64,
    pub nof_msg3_ok: u64,
    pub nof_msg3_failed: u64,
    pub nof_rar_windows_expired: u64,
    pub nof_stale_crcs: u64,
    pub failures: CauseCounters,
}

/// Candidate position of one Msg3 PUSCH
#[derive(Debug, Clone, Copy)]
struct Msg3Candidate {
    /// Slot offset from the current slot
    offset: u32,
    params: Msg3Params,
}

/// RA scheduler
pub struct RaScheduler {
    cell: Arc<CellConfiguration>,
    pdcch: PdcchAllocator,
    rach_tx: IndicationSender<RachIndication>,
    rach_rx: IndicationReceiver<RachIndication>,
    crc_tx: IndicationSender<UlCrcIndication>,
    crc_rx: IndicationReceiver<UlCrcIndication>,
    pending_rars: VecDeque<PendingRar>,
    msg3s: Vec<Option<PendingMsg3>>,
    receptions: Vec<Msg3Reception>,
    stats: RaStats,
}

impl RaScheduler {
    pub fn new(cell: Arc<CellConfiguration>) -> Self {
        let (rach_tx, rach_rx) = indication_queue("RACH", cell.params.ra.rach_queue_size);
        let (crc_tx, crc_rx) = indication_queue("Msg3 CRC", cell.params.ra.crc_queue_size);
        Self {
            pdcch: PdcchAllocator::new(cell.clone()),
            cell,
            rach_tx,
            rach_rx,
            crc_tx,
            crc_rx,
            pending_rars: VecDeque::new(),
            msg3s: (0..MAX_NOF_MSG3).map(|_| None).collect(),
            receptions: Vec::new(),
            stats: RaStats::default(),
        }
    }

    pub fn rach_sender(&self) -> IndicationSender<RachIndication> {
        self.rach_tx.clone()
    }

    pub fn crc_sender(&self) -> IndicationSender<UlCrcIndication> {
        self.crc_tx.clone()
    }

    pub fn stats(&self) -> &RaStats {
        &self.stats
    }

    pub fn nof_pending_rars(&self) -> usize {
        self.pending_rars.len()
    }

    /// Whether the Msg3 ring entry of `tc_rnti` is in use
    pub fn is_msg3_busy(&self, tc_rnti: Rnti) -> bool {
        self.msg3s[ring_index(tc_rnti)].is_some()
    }

    /// Msg3s decoded since the last call
    pub fn take_msg3_receptions(&mut self) -> Vec<Msg3Reception> {
        std::mem::take(&mut self.receptions)
    }

    /// Schedule the current slot of `res_grid`. RARs placed ahead of the
    /// current slot avoid the slots for which `reserved` holds.
    pub fn run_slot(&mut self, res_grid: &mut CellResourceAllocator, reserved: &dyn Fn(SlotPoint) -> bool) {
        let slot = res_grid.slot_tx();

        for crc in self.crc_rx.drain() {
            self.handle_crc(crc);
        }
        self.handle_msg3_timeouts(slot);
        self.schedule_msg3_retxs(res_grid);

        for rach in self.rach_rx.drain() {
            self.handle_rach(rach);
        }
        self.expire_rar_windows(slot);
        self.schedule_pending_rars(res_grid, reserved);
    }

    fn handle_crc(&mut self, crc: UlCrcIndication) {
        assert_eq!(crc.harq_id, 0, "Msg3 CRC for {} with HARQ id {}", crc.rnti, crc.harq_id);
        let idx = ring_index(crc.rnti);
        let entry = match self.msg3s[idx].as_mut() {
            Some(entry) if entry.preamble.tc_rnti == crc.rnti => entry,
            _ => {
                self.stats.nof_stale_crcs += 1;
                warn!("Discarding stale Msg3 CRC for tc-rnti={} slot={}", crc.rnti, crc.slot_rx);
                return;
            }
        };
        match entry.harq.ack_info(crc.tb_crc_ok) {
            HarqAckOutcome::Acked => {
                info!("Msg3 received tc-rnti={} in {}", crc.rnti, crc.slot_rx);
                self.stats.nof_msg3_ok += 1;
                self.receptions.push(Msg3Reception { tc_rnti: crc.rnti, slot_rx: crc.slot_rx });
                self.msg3s[idx] = None;
            }
            HarqAckOutcome::NackedMaxRetx => {
                warn!("Msg3 for tc-rnti={} failed after maximum retransmissions", crc.rnti);
                self.stats.nof_msg3_failed += 1;
                self.msg3s[idx] = None;
            }
            HarqAckOutcome::Nacked => debug!("Msg3 NACK tc-rnti={}, retransmission pending", crc.rnti),
            HarqAckOutcome::Ignored => debug!("Msg3 CRC tc-rnti={} ignored, no pending transmission", crc.rnti),
        }
    }

    fn handle_msg3_timeouts(&mut self, slot: SlotPoint) {
        for entry in self.msg3s.iter_mut() {
            let outcome = match entry.as_mut() {
                Some(msg3) => msg3.harq.slot_indication(slot),
                None => None,
            };
            if outcome == Some(HarqAckOutcome::NackedMaxRetx) {
                if let Some(msg3) = entry.take() {
                    warn!("Msg3 for tc-rnti={} timed out after maximum retransmissions", msg3.preamble.tc_rnti);
                    self.stats.nof_msg3_failed += 1;
                }
            }
        }
    }

    fn schedule_msg3_retxs(&mut self, res_grid: &mut CellResourceAllocator) {
        let pending: Vec<usize> = self
            .msg3s
            .iter()
            .enumerate()
            .filter(|(_, e)| e.as_ref().map(|m| m.harq.has_pending_retx()).unwrap_or(false))
            .map(|(i, _)| i)
            .collect();
        for idx in pending {
            match self.schedule_msg3_retx(res_grid, idx) {
                AllocOutcome::Allocated => self.stats.nof_msg3_retxs += 1,
                AllocOutcome::Postponed(cause) => {
                    self.stats.failures.record(cause);
                    debug!("Msg3 retransmission postponed in {}: {}", res_grid.slot_tx(), cause);
                }
            }
        }
    }

    fn schedule_msg3_retx(&mut self, res_grid: &mut CellResourceAllocator, idx: usize) -> AllocOutcome {
        let slot = res_grid.slot_tx();
        let ra = &self.cell.params.ra;
        let (tc_rnti, params) = match self.msg3s[idx].as_ref().and_then(|m| m.harq.params().map(|p| (m.preamble.tc_rnti, *p))) {
            Some(v) => v,
            None => return AllocOutcome::Postponed(FailureCause::SlotUnavailable),
        };
        if !self.cell.is_dl_enabled(slot) {
            return AllocOutcome::Postponed(FailureCause::SlotUnavailable);
        }
        let ss = match self.cell.search_space(ra.ra_search_space_id) {
            Some(ss) => ss,
            None => return AllocOutcome::Postponed(FailureCause::NoPdcch),
        };

        for (td_index, td) in self.cell.params.pusch_time_domain.iter().enumerate() {
            let symbols = td.symbols();
            if symbols.length() != params.symbols.length() {
                continue;
            }
            let offset = td.k2 as u32;
            let pusch_slot = slot + offset;
            if offset as usize >= RING_ALLOCATOR_SIZE
                || !self.cell.pusch_fits(pusch_slot, symbols)
                || res_grid[offset].ul_grid.collides(symbols, params.prbs)
                || res_grid[offset].result.ul.puschs.len() >= MAX_PUSCH_PER_SLOT
            {
                continue;
            }
            let pdcch_idx = match self.pdcch.alloc_ul_pdcch(
                &mut res_grid[0],
                tc_rnti,
                RntiType::Tc,
                ss,
                self.cell.params.common_aggregation_level,
            ) {
                Some(i) => i,
                None => return AllocOutcome::Postponed(FailureCause::NoPdcch),
            };

            let msg3 = match self.msg3s[idx].as_mut() {
                Some(m) => m,
                None => return AllocOutcome::Postponed(FailureCause::SlotUnavailable),
            };
            let new_params = Msg3Params { symbols, td_index: td_index as u8, ..params };
            msg3.harq.new_retx_with(pusch_slot, new_params);
            let harq = msg3.harq.dci_harq();
            res_grid[0].result.ul.pdcchs[pdcch_idx].dci = Some(UlDci {
                prbs: params.prbs,
                time_resource: td_index as u8,
                mcs: params.mcs,
                harq,
            });
            let pusch_alloc = &mut res_grid[offset];
            pusch_alloc.ul_grid.fill(symbols, params.prbs);
            pusch_alloc.result.ul.puschs.push(PuschGrant {
                kind: PuschKind::Msg3,
                pusch: PuschInfo {
                    rnti: tc_rnti,
                    prbs: params.prbs,
                    symbols,
                    nof_dmrs_symbols: params.nof_dmrs_symbols,
                    mcs: params.mcs,
                    tbs_bytes: params.tbs_bytes,
                    harq,
                },
                is_retx: true,
            });
            info!("Msg3 retransmission tc-rnti={} rv={} scheduled for {}", tc_rnti, harq.rv, pusch_slot);
            return AllocOutcome::Allocated;
        }
        AllocOutcome::Postponed(FailureCause::NoPusch)
    }

    /// First slot of the RAR window: next slot for FDD, first DL slot within
    /// one TDD period for TDD
    fn rar_window_start(&self, prach_slot: SlotPoint) -> SlotPoint {
        match &self.cell.params.tdd {
            None => prach_slot + 1,
            Some(tdd) => (1..=tdd.period_slots)
                .map(|i| prach_slot + i)
                .find(|sl| self.cell.is_dl_enabled(*sl))
                .unwrap_or(prach_slot + 1),
        }
    }

    fn handle_rach(&mut self, rach: RachIndication) {
        for occasion in &rach.occasions {
            if occasion.start_symbol >= 14 || occasion.slot_index >= 80 || occasion.frequency_index >= 8 {
                self.stats.nof_invalid_occasions += 1;
                warn!(
                    "Dropping PRACH occasion s_id={} t_id={} f_id={} in {} with {} preambles",
                    occasion.start_symbol,
                    occasion.slot_index,
                    occasion.frequency_index,
                    rach.slot_rx,
                    occasion.preambles.len()
                );
                continue;
            }
            let ra_rnti = get_ra_rnti(
                occasion.start_symbol,
                occasion.slot_index,
                occasion.frequency_index,
                rach.is_sul,
            );
            for preamble in &occasion.preambles {
                self.stats.nof_preambles += 1;
                let idx = ring_index(preamble.tc_rnti);
                if self.msg3s[idx].is_some() {
                    self.stats.nof_preambles_dropped += 1;
                    error!(
                        "Dropping preamble {} ra-rnti={}: Msg3 ring entry of tc-rnti={} busy",
                        preamble.preamble_id, ra_rnti, preamble.tc_rnti
                    );
                    continue;
                }
                self.msg3s[idx] = Some(PendingMsg3 {
                    preamble: preamble.clone(),
                    harq: HarqProcess::new(0, self.cell.params.ra.msg3_crc_timeout_slots),
                });
                self.add_to_rar(ra_rnti, rach.slot_rx, preamble.tc_rnti);
                debug!(
                    "PRACH preamble {} ra-rnti={} tc-rnti={} in {}",
                    preamble.preamble_id, ra_rnti, preamble.tc_rnti, rach.slot_rx
                );
            }
        }
    }

    fn add_to_rar(&mut self, ra_rnti: Rnti, prach_slot: SlotPoint, tc_rnti: Rnti) {
        if let Some(rar) = self
            .pending_rars
            .iter_mut()
            .find(|r| r.ra_rnti == ra_rnti && r.prach_slot == prach_slot)
        {
            rar.tc_rntis.push(tc_rnti);
            return;
        }
        let window_start = self.rar_window_start(prach_slot);
        let rar = PendingRar {
            ra_rnti,
            prach_slot,
            window_start,
            window_stop: window_start + self.cell.params.ra.ra_resp_window_slots,
            tc_rntis: vec![tc_rnti],
            failures: CauseCounters::default(),
            last_attempt: None,
        };
        let pos = self
            .pending_rars
            .iter()
            .position(|r| r.window_start > window_start)
            .unwrap_or(self.pending_rars.len());
        self.pending_rars.insert(pos, rar);
    }

    fn expire_rar_windows(&mut self, slot: SlotPoint) {
        while self
            .pending_rars
            .front()
            .map(|rar| slot >= rar.window_stop)
            .unwrap_or(false)
        {
            let Some(rar) = self.pending_rars.pop_front() else { break };
            for tc_rnti in &rar.tc_rntis {
                self.msg3s[ring_index(*tc_rnti)] = None;
            }
            self.stats.nof_rar_windows_expired += 1;
            warn!(
                "RAR window [{}, {}) of ra-rnti={} expired with {} unserved preambles (failures: pdcch={} pdsch={} pusch={}, last attempt {:?})",
                rar.window_start,
                rar.window_stop,
                rar.ra_rnti,
                rar.tc_rntis.len(),
                rar.failures.no_pdcch,
                rar.failures.no_pdsch,
                rar.failures.no_pusch,
                rar.last_attempt.map(|s| s.to_string()),
            );
        }
    }

    fn schedule_pending_rars(&mut self, res_grid: &mut CellResourceAllocator, reserved: &dyn Fn(SlotPoint) -> bool) {
        if self.pending_rars.is_empty() {
            return;
        }
        let slot = res_grid.slot_tx();
        let ra = self.cell.params.ra.clone();
        for offset in 0..=ra.max_rar_lookahead_slots {
            let pdsch_slot = slot + offset;
            if !self.cell.is_dl_enabled(pdsch_slot) || (offset > 0 && reserved(pdsch_slot)) {
                continue;
            }
            let mut budget = BoundedRetry::new(ra.max_rar_attempts_per_slot);
            for rar_idx in 0..self.pending_rars.len() {
                let rar = &self.pending_rars[rar_idx];
                if rar.tc_rntis.is_empty() || pdsch_slot < rar.window_start || pdsch_slot >= rar.window_stop {
                    continue;
                }
                if !budget.try_consume() {
                    self.stats.failures.record(FailureCause::AttemptBudget);
                    break;
                }
                let outcome = self.schedule_rar(res_grid, offset, rar_idx);
                let rar = &mut self.pending_rars[rar_idx];
                rar.last_attempt = Some(pdsch_slot);
                match outcome {
                    Ok(nof_grants) => {
                        let served: Vec<Rnti> = rar.tc_rntis.drain(..nof_grants).collect();
                        self.stats.nof_rars += 1;
                        self.stats.nof_msg3_grants += nof_grants as u64;
                        info!(
                            "RAR ra-rnti={} in {} with {} Msg3 grants {:?}, {} pending",
                            rar.ra_rnti,
                            pdsch_slot,
                            nof_grants,
                            served,
                            rar.tc_rntis.len()
                        );
                    }
                    Err(cause) => {
                        rar.failures.record(cause);
                        self.stats.failures.record(cause);
                        debug!("RAR ra-rnti={} postponed in {}: {}", rar.ra_rnti, pdsch_slot, cause);
                    }
                }
            }
        }
        self.pending_rars.retain(|rar| !rar.tc_rntis.is_empty());
    }

    /// Search Msg3 PUSCH space for up to `max_grants` grants for a RAR sent
    /// at `pdsch_offset`
    fn find_msg3_candidates(
        &self,
        res_grid: &CellResourceAllocator,
        pdsch_offset: u32,
        max_grants: usize,
    ) -> Vec<Msg3Candidate> {
        let ra = &self.cell.params.ra;
        let delta = self.cell.params.msg3_delta();
        let limits = self.cell.pusch_prbs();
        let mut cands: Vec<Msg3Candidate> = Vec::new();

        for (td_index, td) in self.cell.params.pusch_time_domain.iter().enumerate() {
            if cands.len() >= max_grants {
                break;
            }
            let offset = pdsch_offset + td.k2 as u32 + delta;
            if offset as usize >= RING_ALLOCATOR_SIZE {
                continue;
            }
            let symbols = td.symbols();
            let slot_alloc = &res_grid[offset];
            if !self.cell.pusch_fits(slot_alloc.slot, symbols) {
                continue;
            }
            let nof_dmrs = nof_dmrs_symbols(symbols.length());
            let sizing = match prbs_for_payload(MSG3_MIN_BYTES, ra.msg3_mcs, symbols.length(), nof_dmrs, limits.length()) {
                Some(s) => s,
                None => continue,
            };

            let mut used = slot_alloc.ul_grid.used_prbs(symbols);
            for c in cands.iter().filter(|c| c.offset == offset) {
                if c.params.symbols.start < symbols.stop && symbols.start < c.params.symbols.stop {
                    used[c.params.prbs.start as usize..c.params.prbs.stop as usize]
                        .iter_mut()
                        .for_each(|u| *u = true);
                }
            }
            let mut room = MAX_PUSCH_PER_SLOT
                .saturating_sub(slot_alloc.result.ul.puschs.len() + cands.iter().filter(|c| c.offset == offset).count());
            while cands.len() < max_grants && room > 0 {
                let Some(prbs) = find_free_run(&used, limits, sizing.nof_prbs) else { break };
                used[prbs.start as usize..prbs.stop as usize].iter_mut().for_each(|u| *u = true);
                cands.push(Msg3Candidate {
                    offset,
                    params: Msg3Params {
                        prbs,
                        symbols,
                        nof_dmrs_symbols: nof_dmrs,
                        td_index: td_index as u8,
                        mcs: ra.msg3_mcs,
                        tbs_bytes: sizing.tbs_bytes,
                    },
                });
                room -= 1;
            }
        }
        cands
    }

    /// PDSCH time-domain resource carrying the most RAR grants
    fn select_rar_pdsch(
        &self,
        res_grid: &CellResourceAllocator,
        pdsch_offset: u32,
        nof_grants: usize,
    ) -> Option<(usize, PdschCandidate)> {
        let slot_alloc = &res_grid[pdsch_offset];
        let mcs = self.cell.params.ra.rar_mcs;
        let mut best: Option<(usize, PdschCandidate)> = None;
        for (td_index, _) in eligible_pdsch_td(&self.cell, slot_alloc) {
            for n in (1..=nof_grants).rev() {
                if best.as_ref().map(|(b, _)| *b >= n).unwrap_or(false) {
                    break;
                }
                let payload = n as u32 * RAR_BYTES_PER_GRANT;
                if let Ok(cand) = find_pdsch_candidate(&self.cell, slot_alloc, td_index, payload, mcs, self.cell.dl_bwp_prbs()) {
                    best = Some((n, cand));
                    break;
                }
            }
        }
        best
    }

    /// Try one RAR for `pending_rars[rar_idx]` at slot offset `pdsch_offset`;
    /// returns the number of Msg3 grants committed
    fn schedule_rar(
        &mut self,
        res_grid: &mut CellResourceAllocator,
        pdsch_offset: u32,
        rar_idx: usize,
    ) -> Result<usize, FailureCause> {
        let ra = self.cell.params.ra.clone();
        let rar = &self.pending_rars[rar_idx];
        let ra_rnti = rar.ra_rnti;
        if res_grid[pdsch_offset].result.dl.rar_grants.len() >= MAX_RAR_PDUS_PER_SLOT {
            return Err(FailureCause::ResultListFull);
        }
        let max_grants = rar.tc_rntis.len().min(MAX_GRANTS_PER_RAR);

        let msg3_cands = self.find_msg3_candidates(res_grid, pdsch_offset, max_grants);
        if msg3_cands.is_empty() {
            return Err(FailureCause::NoPusch);
        }
        let (nof_grants, pdsch_cand) = self
            .select_rar_pdsch(res_grid, pdsch_offset, msg3_cands.len())
            .ok_or(FailureCause::NoPdsch)?;

        let pdsch = alloc_common_grant(
            &self.cell,
            &self.pdcch,
            &mut res_grid[pdsch_offset],
            ra_rnti,
            RntiType::Ra,
            ra.ra_search_space_id,
            &pdsch_cand,
            ra.rar_mcs,
        )?;

        let tc_rntis: Vec<Rnti> = self.pending_rars[rar_idx].tc_rntis[..nof_grants].to_vec();
        let mut grants = Vec::with_capacity(nof_grants);
        for (tc_rnti, cand) in tc_rntis.iter().zip(msg3_cands.iter()) {
            let msg3_alloc = &mut res_grid[cand.offset];
            let msg3_slot = msg3_alloc.slot;
            let Some(msg3) = self.msg3s[ring_index(*tc_rnti)].as_mut() else { continue };
            msg3.harq.new_tx(msg3_slot, ra.max_msg3_harq_retxs, cand.params);
            let harq = msg3.harq.dci_harq();
            msg3_alloc.ul_grid.fill(cand.params.symbols, cand.params.prbs);
            msg3_alloc.result.ul.puschs.push(PuschGrant {
                kind: PuschKind::Msg3,
                pusch: PuschInfo {
                    rnti: *tc_rnti,
                    prbs: cand.params.prbs,
                    symbols: cand.params.symbols,
                    nof_dmrs_symbols: cand.params.nof_dmrs_symbols,
                    mcs: cand.params.mcs,
                    tbs_bytes: cand.params.tbs_bytes,
                    harq,
                },
                is_retx: false,
            });
            grants.push(RarUlGrant {
                preamble_id: msg3.preamble.preamble_id,
                timing_advance: msg3.preamble.timing_advance,
                tc_rnti: *tc_rnti,
                prbs: cand.params.prbs,
                time_resource: cand.params.td_index,
                mcs: cand.params.mcs,
            });
            debug!("Msg3 tc-rnti={} prbs={:?} in {}", tc_rnti, cand.params.prbs, msg3_slot);
        }

        res_grid[pdsch_offset]
            .result
            .dl
            .rar_grants
            .push(RarGrant { ra_rnti, pdsch, grants });
        Ok(nof_grants)
    }
}

fn ring_index(tc_rnti: Rnti) -> usize {
    tc_rnti.value() as usize % MAX_NOF_MSG3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::config::{CellSchedConfig, TddPattern};
    use crate::mac::indications::RachOccasion;
    use common::types::{Bandwidth, SubcarrierSpacing};

    fn rach(slot: SlotPoint, tc_rntis: &[u16]) -> RachIndication {
        RachIndication {
            slot_rx: slot,
            is_sul: false,
            occasions: vec![RachOccasion {
                start_symbol: 3,
                slot_index: 5,
                frequency_index: 0,
                preambles: tc_rntis
                    .iter()
                    .enumerate()
                    .map(|(i, rnti)| DetectedPreamble {
                        preamble_id: i as u8,
                        timing_advance: 10,
                        tc_rnti: Rnti(*rnti),
                    })
                    .collect(),
            }],
        }
    }

    fn setup() -> (Arc<CellConfiguration>, RaScheduler, CellResourceAllocator) {
        let cell = Arc::new(CellConfiguration::new(CellSchedConfig::default()).unwrap());
        let sched = RaScheduler::new(cell.clone());
        let res_grid = CellResourceAllocator::new(&cell);
        (cell, sched, res_grid)
    }

    fn run(sched: &mut RaScheduler, res_grid: &mut CellResourceAllocator, slot: SlotPoint) {
        res_grid.slot_indication(slot);
        sched.run_slot(res_grid, &|_| false);
    }

    #[test]
    fn test_ra_rnti_formula() {
        assert_eq!(get_ra_rnti(3, 5, 0, false), Rnti(74));
        assert_eq!(get_ra_rnti(0, 0, 0, false), Rnti(1));
        assert_eq!(get_ra_rnti(13, 79, 7, true), Rnti(1 + 13 + 14 * 79 + 14 * 80 * 7 + 14 * 80 * 8));
    }

    #[test]
    fn test_rar_with_msg3_grants() {
        let (cell, mut sched, mut res_grid) = setup();
        let prach = SlotPoint::from_count(0, 100);
        sched.rach_sender().push(rach(prach, &[0x4601, 0x4602])).unwrap();
        run(&mut sched, &mut res_grid, prach + 1);

        let rar = &res_grid[0].result.dl.rar_grants[0];
        assert_eq!(rar.ra_rnti, Rnti(74));
        assert_eq!(rar.grants.len(), 2);
        assert_eq!(res_grid[0].result.dl.pdcchs[0].rnti_type, RntiType::Ra);

        let k2 = cell.params.pusch_time_domain[0].k2 as u32;
        let msg3_offset = k2 + cell.params.msg3_delta();
        let puschs = &res_grid[msg3_offset].result.ul.puschs;
        assert_eq!(puschs.len(), 2);
        assert!(puschs.iter().all(|p| cell.pusch_prbs().contains(&p.pusch.prbs)));
        assert!(!puschs[0].pusch.prbs.overlaps(&puschs[1].pusch.prbs));
        assert_eq!(sched.nof_pending_rars(), 0);
        assert!(sched.is_msg3_busy(Rnti(0x4601)));
    }

    #[test]
    fn test_out_of_range_occasion_dropped() {
        let (_, mut sched, mut res_grid) = setup();
        let prach = SlotPoint::from_count(0, 150);
        let mut ind = rach(prach, &[0x4650]);
        let mut bad = ind.occasions[0].clone();
        bad.frequency_index = 8;
        bad.preambles[0].tc_rnti = Rnti(0x4651);
        ind.occasions.push(bad);
        sched.rach_sender().push(ind).unwrap();
        run(&mut sched, &mut res_grid, prach + 1);

        assert_eq!(sched.stats().nof_invalid_occasions, 1);
        assert_eq!(sched.stats().nof_preambles, 1);
        assert!(!sched.is_msg3_busy(Rnti(0x4651)));
        assert_eq!(res_grid[0].result.dl.rar_grants.len(), 1);
        assert_eq!(res_grid[0].result.dl.rar_grants[0].ra_rnti, Rnti(74));
    }

    #[test]
    fn test_tdd_rar_window_starts_at_first_dl_slot() {
        let cfg = CellSchedConfig {
            scs: SubcarrierSpacing::Scs30,
            bandwidth: Bandwidth::Bw40,
            tdd: Some(TddPattern {
                period_slots: 10,
                nof_dl_slots: 6,
                nof_dl_symbols: 8,
                nof_ul_slots: 3,
                nof_ul_symbols: 0,
            }),
            ..Default::default()
        };
        let cell = Arc::new(CellConfiguration::new(cfg).unwrap());
        let mut sched = RaScheduler::new(cell.clone());
        // Slot 7 of the pattern is UL, followed by UL slots 8 and 9
        let prach = SlotPoint::new(1, 4, 7);
        sched.handle_rach(rach(prach, &[0x4660]));

        let rar = &sched.pending_rars[0];
        assert_eq!(rar.window_start, prach + 3);
        assert!(cell.is_dl_enabled(rar.window_start));
        assert!(!cell.is_dl_enabled(prach + 1) && !cell.is_dl_enabled(prach + 2));
        assert_eq!(rar.window_stop, prach + 3 + cell.params.ra.ra_resp_window_slots);

        // A PRACH in a DL slot opens its window in the next slot
        let prach = SlotPoint::new(1, 4, 2);
        sched.handle_rach(rach(prach, &[0x4661]));
        assert!(sched.pending_rars.iter().any(|r| r.prach_slot == prach && r.window_start == prach + 1));
    }

    #[test]
    fn test_ring_collision_drops_preamble() {
        let (_, mut sched, mut res_grid) = setup();
        let prach = SlotPoint::from_count(0, 200);
        // 0x4601 and 0x4601 + 1024 share a ring entry
        sched.rach_sender().push(rach(prach, &[0x4601, 0x4601 + 1024])).unwrap();
        run(&mut sched, &mut res_grid, prach + 1);
        assert_eq!(sched.stats().nof_preambles_dropped, 1);
        assert_eq!(res_grid[0].result.dl.rar_grants[0].grants.len(), 1);
    }

    #[test]
    fn test_window_expiry_releases_msg3() {
        let (cell, mut sched, mut res_grid) = setup();
        let prach = SlotPoint::from_count(0, 300);
        sched.rach_sender().push(rach(prach, &[0x4610])).unwrap();
        let window = cell.params.ra.ra_resp_window_slots;
        for i in 1..=window + 1 {
            res_grid.slot_indication(prach + i);
            // Block the whole DL BWP so no RAR fits
            res_grid[0].dl_grid.fill(OfdmSymbolRange::new(2, 14), cell.dl_bwp_prbs());
            sched.run_slot(&mut res_grid, &|_| false);
            assert!(res_grid[0].result.dl.rar_grants.is_empty());
        }
        assert_eq!(sched.stats().nof_rar_windows_expired, 1);
        assert!(!sched.is_msg3_busy(Rnti(0x4610)));
        assert_eq!(sched.nof_pending_rars(), 0);
        assert_eq!(sched.stats().failures.no_pdsch, window as u64);
    }

    #[test]
    fn test_msg3_retx_reuses_prbs() {
        let (cell, mut sched, mut res_grid) = setup();
        let prach = SlotPoint::from_count(0, 400);
        sched.rach_sender().push(rach(prach, &[0x4620])).unwrap();
        run(&mut sched, &mut res_grid, prach + 1);
        let msg3_offset = cell.params.pusch_time_domain[0].k2 as u32 + cell.params.msg3_delta();
        let first = res_grid[msg3_offset].result.ul.puschs[0].clone();
        let msg3_slot = res_grid[msg3_offset].slot;

        for sl in 2..=(1 + msg3_offset) {
            run(&mut sched, &mut res_grid, prach + sl);
        }
        let crc = UlCrcIndication {
            slot_rx: msg3_slot,
            rnti: Rnti(0x4620),
            ue_index: None,
            harq_id: 0,
            tb_crc_ok: false,
        };
        sched.crc_sender().push(crc.clone()).unwrap();
        // Duplicate NACK changes nothing
        sched.crc_sender().push(crc).unwrap();
        run(&mut sched, &mut res_grid, msg3_slot + 1);

        let retx: Vec<&PuschGrant> = (0..10u32)
            .flat_map(|o| res_grid[o].result.ul.puschs.iter())
            .filter(|p| p.is_retx)
            .collect();
        assert_eq!(retx.len(), 1);
        assert_eq!(retx[0].pusch.prbs, first.pusch.prbs);
        assert_eq!(retx[0].pusch.harq.rv, 2);
        assert_eq!(sched.stats().nof_msg3_retxs, 1);
        assert_eq!(res_grid[0].result.ul.pdcchs[0].rnti_type, RntiType::Tc);
    }

    #[test]
    fn test_msg3_ack_reports_reception() {
        let (_, mut sched, mut res_grid) = setup();
        let prach = SlotPoint::from_count(0, 500);
        sched.rach_sender().push(rach(prach, &[0x4630])).unwrap();
        run(&mut sched, &mut res_grid, prach + 1);
        sched
            .crc_sender()
            .push(UlCrcIndication {
                slot_rx: prach + 7,
                rnti: Rnti(0x4630),
                ue_index: None,
                harq_id: 0,
                tb_crc_ok: true,
            })
            .unwrap();
        run(&mut sched, &mut res_grid, prach + 8);
        assert!(!sched.is_msg3_busy(Rnti(0x4630)));
        assert_eq!(
            sched.take_msg3_receptions(),
            vec![Msg3Reception { tc_rnti: Rnti(0x4630), slot_rx: prach + 7 }]
        );
    }

    #[test]
    #[should_panic]
    fn test_msg3_crc_with_wrong_harq_id() {
        let (_, mut sched, mut res_grid) = setup();
        sched
            .crc_sender()
            .push(UlCrcIndication {
                slot_rx: SlotPoint::from_count(0, 10),
                rnti: Rnti(0x4640),
                ue_index: None,
                harq_id: 3,
                tb_crc_ok: true,
            })
            .unwrap();
        run(&mut sched, &mut res_grid, SlotPoint::from_count(0, 11));
    }
}
