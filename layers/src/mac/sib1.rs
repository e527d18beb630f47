//! System Information Block 1 (SIB1) Scheduling
//!
//! Implements SIB1 broadcast according to 3GPP TS 38.213 clause 13: one
//! Type0-PDCCH occasion per active SSB beam, repeating every SIB1 period.
//! A missed occasion is not retried inside the period.

use super::common_pdsch::{alloc_common_grant, eligible_pdsch_td, find_pdsch_candidate};
use super::config::CellConfiguration;
use super::pdcch::PdcchAllocator;
use super::resource_grid::SlotAllocator;
use super::retry::{CauseCounters, FailureCause};
use super::sched_result::{RntiType, SiGrant, SiKind, MAX_SI_PDUS_PER_SLOT};
use super::ssb::MAX_SSB_BEAMS;
use common::types::Rnti;
use common::utils::time;
use common::SlotPoint;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// SIB1 broadcast statistics
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Sib1Stats {
    pub nof_tx: u64,
    pub nof_misses: u64,
    /// Misses since the last successful transmission
    pub consecutive_misses: u32,
    pub failures: CauseCounters,
}

/// Slot of the Type0-PDCCH occasion of `beam` relative to the start of an
/// even frame: n0 = (O * 2^mu + floor(i * M)) mod N, frame parity from the
/// integer division.
pub fn type0_pdcch_slot_offset(beam: u8, offset_o: u32, m_x2: u32, numerology: u8, slots_per_frame: u32) -> u32 {
    let value = (offset_o << numerology) + (beam as u32 * m_x2) / 2;
    let n0 = value % slots_per_frame;
    let odd_frame = (value / slots_per_frame) % 2;
    odd_frame * slots_per_frame + n0
}

/// SIB1 period in slots: max(SSB period, SIB1 repetition period), 20 ms minimum
pub fn sib1_period_slots(cell: &CellConfiguration) -> u32 {
    let period_ms = cell
        .params
        .ssb
        .period_ms
        .max(cell.params.si.sib1.retx_period_ms)
        .max(20);
    time::ms_to_slots(period_ms, cell.params.scs)
}

/// SIB1 scheduler
pub struct Sib1Scheduler {
    cell: Arc<CellConfiguration>,
    pdcch: PdcchAllocator,
    period_slots: u32,
    /// (beam, slot offset inside the SIB1 period)
    occasions: Vec<(u8, u32)>,
    stats: Sib1Stats,
}

impl Sib1Scheduler {
    pub fn new(cell: Arc<CellConfiguration>) -> Self {
        let sib1 = &cell.params.si.sib1;
        let occasions = (0..MAX_SSB_BEAMS)
            .filter(|beam| cell.params.ssb.beam_bitmap & (1 << beam) != 0)
            .map(|beam| {
                let offset = type0_pdcch_slot_offset(
                    beam,
                    sib1.ss0_offset,
                    sib1.ss0_m_x2,
                    cell.numerology(),
                    cell.slots_per_frame(),
                );
                (beam, offset)
            })
            .collect::<Vec<_>>();
        let period_slots = sib1_period_slots(&cell);
        info!(
            "SIB1 scheduler: period {} slots, occasions {:?}",
            period_slots, occasions
        );
        Self {
            pdcch: PdcchAllocator::new(cell.clone()),
            cell,
            period_slots,
            occasions,
            stats: Sib1Stats::default(),
        }
    }

    pub fn stats(&self) -> &Sib1Stats {
        &self.stats
    }

    /// Beams with a SIB1 occasion in the slot
    pub fn beams_in_slot(&self, slot: SlotPoint) -> Vec<u8> {
        let slot_in_period = slot.count() % self.period_slots;
        self.occasions
            .iter()
            .filter(|(_, offset)| *offset == slot_in_period)
            .map(|(beam, _)| *beam)
            .collect()
    }

    pub fn has_occasion(&self, slot: SlotPoint) -> bool {
        let slot_in_period = slot.count() % self.period_slots;
        self.occasions.iter().any(|(_, offset)| *offset == slot_in_period)
    }

    /// Schedule SIB1 in the current slot
    pub fn run_slot(&mut self, slot_alloc: &mut SlotAllocator) {
        for beam in self.beams_in_slot(slot_alloc.slot) {
            match self.schedule_beam(slot_alloc, beam) {
                Ok(()) => {
                    self.stats.nof_tx += 1;
                    self.stats.consecutive_misses = 0;
                    debug!("Scheduled SIB1 beam {} in {}", beam, slot_alloc.slot);
                }
                Err(cause) => {
                    self.stats.nof_misses += 1;
                    self.stats.consecutive_misses += 1;
                    self.stats.failures.record(cause);
                    warn!(
                        "SIB1 beam {} not scheduled in {}: {} ({} consecutive misses)",
                        beam, slot_alloc.slot, cause, self.stats.consecutive_misses
                    );
                }
            }
        }
    }

    fn schedule_beam(&self, slot_alloc: &mut SlotAllocator, beam: u8) -> Result<(), FailureCause> {
        if !self.cell.is_dl_enabled(slot_alloc.slot) {
            return Err(FailureCause::SlotUnavailable);
        }
        if slot_alloc.result.dl.si_grants.len() >= MAX_SI_PDUS_PER_SLOT {
            return Err(FailureCause::ResultListFull);
        }
        let sib1 = &self.cell.params.si.sib1;
        let td_index = eligible_pdsch_td(&self.cell, slot_alloc)
            .map(|(i, _)| i)
            .next()
            .ok_or(FailureCause::SlotUnavailable)?;
        let cand = find_pdsch_candidate(
            &self.cell,
            slot_alloc,
            td_index,
            sib1.payload_bytes,
            sib1.mcs,
            self.cell.coreset0_prbs(),
        )?;
        let pdsch = alloc_common_grant(
            &self.cell,
            &self.pdcch,
            slot_alloc,
            Rnti::SI_RNTI,
            RntiType::Si,
            0,
            &cand,
            sib1.mcs,
        )?;
        slot_alloc.result.dl.si_grants.push(SiGrant {
            kind: SiKind::Sib1,
            beam: Some(beam),
            pdsch,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::config::CellSchedConfig;
    use crate::mac::resource_grid::CellResourceAllocator;
    use crate::mac::sched_result::{OfdmSymbolRange, PrbInterval};

    #[test]
    fn test_type0_pdcch_slot() {
        // O = 0, M = 1, mu = 0: beam i at slot i of the even frame
        assert_eq!(type0_pdcch_slot_offset(0, 0, 2, 0, 10), 0);
        assert_eq!(type0_pdcch_slot_offset(3, 0, 2, 0, 10), 3);
        // O = 5, mu = 1, M = 2: 10 + 2*i slots
        assert_eq!(type0_pdcch_slot_offset(1, 5, 4, 1, 20), 12);
        // O = 7, mu = 0, M = 1/2, beam 7: 7 + 3 = 10 -> slot 0 of the odd frame
        assert_eq!(type0_pdcch_slot_offset(7, 7, 1, 0, 10), 10);
    }

    #[test]
    fn test_sib1_period() {
        let mut cfg = CellSchedConfig::default();
        cfg.ssb.period_ms = 5;
        cfg.si.sib1.retx_period_ms = 20;
        let cell = CellConfiguration::new(cfg.clone()).unwrap();
        assert_eq!(sib1_period_slots(&cell), 20);
        cfg.ssb.period_ms = 80;
        let cell = CellConfiguration::new(cfg).unwrap();
        assert_eq!(sib1_period_slots(&cell), 80);
    }

    #[test]
    fn test_sib1_scheduled_once_per_period() {
        let cell = Arc::new(CellConfiguration::new(CellSchedConfig::default()).unwrap());
        let mut sched = Sib1Scheduler::new(cell.clone());
        let mut res_grid = CellResourceAllocator::new(&cell);
        let start = SlotPoint::new(0, 0, 0);
        let mut tx_slots = Vec::new();
        for i in 0..60 {
            res_grid.slot_indication(start + i);
            sched.run_slot(&mut res_grid[0]);
            if !res_grid[0].result.dl.si_grants.is_empty() {
                let grant = &res_grid[0].result.dl.si_grants[0];
                assert_eq!(grant.kind, SiKind::Sib1);
                assert!(cell.coreset0_prbs().contains(&grant.pdsch.prbs));
                assert_eq!(res_grid[0].result.dl.pdcchs[0].rnti, Rnti::SI_RNTI);
                tx_slots.push(i);
            }
        }
        assert_eq!(tx_slots, vec![0, 20, 40]);
        assert_eq!(sched.stats().nof_tx, 3);
    }

    #[test]
    fn test_sib1_miss_is_counted() {
        let cell = Arc::new(CellConfiguration::new(CellSchedConfig::default()).unwrap());
        let mut sched = Sib1Scheduler::new(cell.clone());
        let mut res_grid = CellResourceAllocator::new(&cell);
        res_grid.slot_indication(SlotPoint::new(0, 0, 0));
        res_grid[0].dl_grid.fill(OfdmSymbolRange::new(2, 14), cell.coreset0_prbs());
        sched.run_slot(&mut res_grid[0]);
        assert!(res_grid[0].result.dl.si_grants.is_empty());
        assert_eq!(sched.stats().consecutive_misses, 1);
        assert_eq!(sched.stats().failures.no_pdsch, 1);

        res_grid.slot_indication(SlotPoint::new(0, 2, 0));
        sched.run_slot(&mut res_grid[0]);
        assert_eq!(sched.stats().consecutive_misses, 0);
        assert!(!res_grid[0].dl_grid.collides(OfdmSymbolRange::new(0, 1), PrbInterval::new(0, 1)));
    }
}
