//! Cell Scheduler
//!
//! Owns the resource grid of one cell and runs the common-channel schedulers
//! on it once per slot, in a fixed order: SSB, SIB1, other SI, random access,
//! paging and fallback UEs. Producers reach the cell through a cloneable
//! handle that only enqueues indications.

use super::config::{CellConfiguration, CellSchedConfig};
use super::indications::{FallbackEvent, IndicationSender, PagingInformation, RachIndication, UlCrcIndication};
use super::paging::{PagingScheduler, PagingStats};
use super::ra_scheduler::{Msg3Reception, RaScheduler, RaStats};
use super::resource_grid::CellResourceAllocator;
use super::sched_result::SlotResult;
use super::si_messages::{SiMessageScheduler, SiMessageStats};
use super::sib1::{Sib1Scheduler, Sib1Stats};
use super::ssb::{is_ssb_slot, schedule_ssb};
use super::ue_fallback::{FallbackStats, UeFallbackScheduler};
use crate::LayerError;
use common::SlotPoint;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, trace, warn};

/// Producer side of the cell scheduler
#[derive(Debug, Clone)]
pub struct CellSchedulerHandle {
    rach: IndicationSender<RachIndication>,
    msg3_crc: IndicationSender<UlCrcIndication>,
    paging: IndicationSender<PagingInformation>,
    fallback: IndicationSender<FallbackEvent>,
}

impl CellSchedulerHandle {
    pub fn handle_rach_indication(&self, rach: RachIndication) -> Result<(), LayerError> {
        self.rach.push(rach)
    }

    /// CRCs without a UE index belong to Msg3
    pub fn handle_crc_indication(&self, crc: UlCrcIndication) -> Result<(), LayerError> {
        match crc.ue_index {
            None => self.msg3_crc.push(crc),
            Some(_) => self.fallback.push(FallbackEvent::UlCrc(crc)),
        }
    }

    pub fn handle_paging_information(&self, info: PagingInformation) -> Result<(), LayerError> {
        self.paging.push(info)
    }

    pub fn handle_fallback_event(&self, event: FallbackEvent) -> Result<(), LayerError> {
        self.fallback.push(event)
    }
}

/// Snapshot of all scheduler counters
#[derive(Debug, Clone, Serialize)]
pub struct CellSchedulerStats {
    pub nof_slots: u64,
    pub sib1: Sib1Stats,
    pub si_messages: Vec<SiMessageStats>,
    pub ra: RaStats,
    pub paging: PagingStats,
    pub fallback: FallbackStats,
}

pub struct CellScheduler {
    cell: Arc<CellConfiguration>,
    res_grid: CellResourceAllocator,
    sib1: Sib1Scheduler,
    si: SiMessageScheduler,
    ra: RaScheduler,
    paging: PagingScheduler,
    fallback: UeFallbackScheduler,
    last_slot: Option<SlotPoint>,
    nof_slots: u64,
}

impl CellScheduler {
    pub fn new(params: CellSchedConfig) -> Result<Self, LayerError> {
        let cell = Arc::new(CellConfiguration::new(params)?);
        info!(
            "Cell {} scheduler: {} PRBs, {:?}, {:?}, {} SI messages",
            cell.params.cell_id.0,
            cell.nof_prbs,
            cell.params.scs,
            cell.params.duplex_mode(),
            cell.params.si.messages.len()
        );
        Ok(Self {
            res_grid: CellResourceAllocator::new(&cell),
            sib1: Sib1Scheduler::new(cell.clone()),
            si: SiMessageScheduler::new(cell.clone()),
            ra: RaScheduler::new(cell.clone()),
            paging: PagingScheduler::new(cell.clone()),
            fallback: UeFallbackScheduler::new(cell.clone()),
            cell,
            last_slot: None,
            nof_slots: 0,
        })
    }

    pub fn cell(&self) -> &CellConfiguration {
        &self.cell
    }

    pub fn handle(&self) -> CellSchedulerHandle {
        CellSchedulerHandle {
            rach: self.ra.rach_sender(),
            msg3_crc: self.ra.crc_sender(),
            paging: self.paging.sender(),
            fallback: self.fallback.sender(),
        }
    }

    /// Schedule `slot` and return its result
    pub fn run_slot(&mut self, slot: SlotPoint) -> &SlotResult {
        debug_assert_eq!(slot.numerology(), self.cell.numerology());
        if let Some(last) = self.last_slot {
            if slot - last != 1 {
                warn!("Slot indication jumped from {} to {}", last, slot);
            }
        }
        self.last_slot = Some(slot);
        self.nof_slots += 1;

        self.res_grid.slot_indication(slot);
        schedule_ssb(&self.cell, &mut self.res_grid[0]);
        self.sib1.run_slot(&mut self.res_grid[0]);
        self.si.run_slot(&mut self.res_grid[0]);
        // Lookahead allocations stay clear of slots owned by earlier channels
        let (cell, sib1, si) = (&self.cell, &self.sib1, &self.si);
        self.ra
            .run_slot(&mut self.res_grid, &|s| is_broadcast_slot(cell, sib1, si, s));
        self.paging.run_slot(&mut self.res_grid[0]);
        let paging = &self.paging;
        self.fallback.run_slot(&mut self.res_grid, &|s| {
            is_broadcast_slot(cell, sib1, si, s) || paging.has_occasion(s)
        });

        let result = &self.res_grid[0].result;
        if !result.is_empty() {
            trace!(
                "{}: {} DL PDCCHs, {} UL PDCCHs, {} PUSCHs",
                slot,
                result.dl.pdcchs.len(),
                result.ul.pdcchs.len(),
                result.ul.puschs.len()
            );
        }
        result
    }

    /// Result of the slot `offset` slots after the current one, as scheduled so far
    pub fn slot_result(&self, offset: u32) -> &SlotResult {
        &self.res_grid[offset].result
    }

    pub fn take_msg3_receptions(&mut self) -> Vec<Msg3Reception> {
        self.ra.take_msg3_receptions()
    }

    pub fn ra(&self) -> &RaScheduler {
        &self.ra
    }

    pub fn paging(&self) -> &PagingScheduler {
        &self.paging
    }

    pub fn si(&self) -> &SiMessageScheduler {
        &self.si
    }

    pub fn sib1(&self) -> &Sib1Scheduler {
        &self.sib1
    }

    pub fn fallback(&self) -> &UeFallbackScheduler {
        &self.fallback
    }

    pub fn stats(&self) -> CellSchedulerStats {
        CellSchedulerStats {
            nof_slots: self.nof_slots,
            sib1: *self.sib1.stats(),
            si_messages: (0..self.si.nof_messages())
                .filter_map(|i| self.si.stats(i).copied())
                .collect(),
            ra: *self.ra.stats(),
            paging: *self.paging.stats(),
            fallback: *self.fallback.stats(),
        }
    }
}

/// Slot carrying SSB, a SIB1 occasion or part of an SI window
fn is_broadcast_slot(cell: &CellConfiguration, sib1: &Sib1Scheduler, si: &SiMessageScheduler, slot: SlotPoint) -> bool {
    is_ssb_slot(cell, slot) || sib1.has_occasion(slot) || si.is_window_slot(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::indications::{DetectedPreamble, DuUeIndex, RachOccasion};
    use crate::mac::sched_result::RntiType;
    use common::types::Rnti;

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = CellSchedConfig::default();
        cfg.coreset0_index = 20;
        assert!(CellScheduler::new(cfg).is_err());
    }

    #[test]
    fn test_crc_routing() {
        let mut sched = CellScheduler::new(CellSchedConfig::default()).unwrap();
        let handle = sched.handle();
        let s = SlotPoint::new(0, 0, 0);
        handle
            .handle_rach_indication(RachIndication {
                slot_rx: s,
                is_sul: false,
                occasions: vec![RachOccasion {
                    start_symbol: 0,
                    slot_index: 0,
                    frequency_index: 0,
                    preambles: vec![DetectedPreamble {
                        preamble_id: 5,
                        timing_advance: 10,
                        tc_rnti: Rnti(0x4601),
                    }],
                }],
            })
            .unwrap();
        // Misrouted UE CRC must not reach the Msg3 HARQ
        handle
            .handle_crc_indication(UlCrcIndication {
                slot_rx: s,
                rnti: Rnti(0x4601),
                ue_index: Some(DuUeIndex(9)),
                harq_id: 3,
                tb_crc_ok: true,
            })
            .unwrap();
        let result = sched.run_slot(s + 1);
        assert_eq!(result.dl.rar_grants.len(), 1);
        assert!(result.dl.pdcchs.iter().any(|p| p.rnti_type == RntiType::Ra));
        assert_eq!(sched.ra().stats().nof_msg3_ok, 0);
        assert_eq!(sched.stats().nof_slots, 1);
    }

    #[test]
    fn test_ssb_and_sib1_share_first_slot() {
        let mut sched = CellScheduler::new(CellSchedConfig::default()).unwrap();
        let result = sched.run_slot(SlotPoint::new(0, 0, 0));
        assert_eq!(result.dl.ssbs.len(), 1);
        assert_eq!(result.dl.si_grants.len(), 1);
        let ssb = &result.dl.ssbs[0];
        let sib1 = &result.dl.si_grants[0].pdsch;
        assert!(!ssb.prbs.overlaps(&sib1.prbs) || ssb.symbols.stop <= sib1.symbols.start);
    }
}
