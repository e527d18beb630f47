//! PDCCH Resource Allocation
//!
//! CORESET#0 geometry (3GPP TS 38.213 Table 13-1) and CCE allocation over the
//! common search space candidates of TS 38.213 clause 10.1.

use super::config::{AggregationLevel, CellConfiguration, SearchSpaceConfig};
use super::resource_grid::SlotAllocator;
use super::sched_result::{
    OfdmSymbolRange, PdcchDlInfo, PdcchUlInfo, RntiType, MAX_DL_PDCCH_PER_SLOT, MAX_UL_PDCCH_PER_SLOT,
};
use crate::LayerError;
use common::types::Rnti;
use std::sync::Arc;
use tracing::trace;

/// Number of REGs per CCE
const REGS_PER_CCE: u32 = 6;

/// CORESET#0 configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coreset0Config {
    /// Number of resource blocks
    pub num_rbs: u32,
    /// Number of symbols
    pub num_symbols: u32,
    /// RB offset from point A
    pub rb_offset: u32,
}

impl Coreset0Config {
    /// Get CORESET#0 configuration from table index
    /// Based on 3GPP TS 38.213 Table 13-1 for {15, 15} kHz SCS
    pub fn from_index(index: u8) -> Result<Self, LayerError> {
        let config = match index {
            0 => Self { num_rbs: 24, num_symbols: 2, rb_offset: 0 },
            1 => Self { num_rbs: 24, num_symbols: 2, rb_offset: 2 },
            2 => Self { num_rbs: 24, num_symbols: 2, rb_offset: 4 },
            3 => Self { num_rbs: 24, num_symbols: 3, rb_offset: 0 },
            4 => Self { num_rbs: 24, num_symbols: 3, rb_offset: 2 },
            5 => Self { num_rbs: 24, num_symbols: 3, rb_offset: 4 },
            6 => Self { num_rbs: 48, num_symbols: 1, rb_offset: 12 },
            7 => Self { num_rbs: 48, num_symbols: 1, rb_offset: 16 },
            8 => Self { num_rbs: 48, num_symbols: 2, rb_offset: 12 },
            9 => Self { num_rbs: 48, num_symbols: 2, rb_offset: 16 },
            10 => Self { num_rbs: 48, num_symbols: 3, rb_offset: 12 },
            11 => Self { num_rbs: 48, num_symbols: 3, rb_offset: 16 },
            12 => Self { num_rbs: 96, num_symbols: 1, rb_offset: 38 },
            13 => Self { num_rbs: 96, num_symbols: 2, rb_offset: 38 },
            14 => Self { num_rbs: 96, num_symbols: 3, rb_offset: 38 },
            _ => return Err(LayerError::InvalidConfiguration(
                format!("Invalid CORESET#0 index: {}", index)
            )),
        };
        Ok(config)
    }

    /// Number of CCEs in the CORESET
    pub fn nof_cces(&self) -> u32 {
        self.num_rbs * self.num_symbols / REGS_PER_CCE
    }
}

/// First CCE of candidate `m` out of `nof_candidates` at aggregation level `al`
/// (common search space, Y = 0)
pub fn css_candidate_cce(nof_cces: u32, al: AggregationLevel, m: u32, nof_candidates: u32) -> u32 {
    let l = al.nof_cces() as u32;
    let nof_positions = nof_cces / l;
    l * ((m * nof_positions / nof_candidates) % nof_positions)
}

/// Allocates PDCCH candidates in CORESET#0
#[derive(Debug, Clone)]
pub struct PdcchAllocator {
    cell: Arc<CellConfiguration>,
}

impl PdcchAllocator {
    pub fn new(cell: Arc<CellConfiguration>) -> Self {
        Self { cell }
    }

    fn find_candidate(
        &self,
        slot_alloc: &SlotAllocator,
        ss: &SearchSpaceConfig,
        al: AggregationLevel,
    ) -> Option<u32> {
        if !ss.is_monitoring_active(slot_alloc.slot)
            || (self.cell.nof_dl_symbols(slot_alloc.slot) as u32) < self.cell.coreset0.num_symbols
        {
            return None;
        }
        let nof_cces = slot_alloc.cces.len() as u32;
        let l = al.nof_cces() as u32;
        let nof_candidates = ss.nof_candidates(al) as u32;
        if nof_candidates == 0 || l > nof_cces {
            return None;
        }
        (0..nof_candidates)
            .map(|m| css_candidate_cce(nof_cces, al, m, nof_candidates))
            .find(|cce| slot_alloc.cces[*cce as usize..(*cce + l) as usize].iter().all(|used| !used))
    }

    fn reserve(&self, slot_alloc: &mut SlotAllocator, cce: u32, al: AggregationLevel) {
        let first_use = slot_alloc.cces.iter().all(|used| !used);
        slot_alloc.cces[cce as usize..(cce + al.nof_cces() as u32) as usize]
            .iter_mut()
            .for_each(|used| *used = true);
        if first_use {
            let symbols = OfdmSymbolRange::new(0, self.cell.coreset0.num_symbols as u8);
            let prbs = self.cell.coreset0_prbs();
            if !slot_alloc.dl_grid.collides(symbols, prbs) {
                slot_alloc.dl_grid.fill(symbols, prbs);
            }
        }
    }

    /// Allocate a DL PDCCH; returns its position in the slot's DL PDCCH list
    pub fn alloc_dl_pdcch(
        &self,
        slot_alloc: &mut SlotAllocator,
        rnti: Rnti,
        rnti_type: RntiType,
        ss: &SearchSpaceConfig,
        al: AggregationLevel,
    ) -> Option<usize> {
        if slot_alloc.result.dl.pdcchs.len() >= MAX_DL_PDCCH_PER_SLOT {
            return None;
        }
        let cce = self.find_candidate(slot_alloc, ss, al)?;
        self.reserve(slot_alloc, cce, al);
        trace!("DL PDCCH rnti={} ss={} cce={} al={:?} in {}", rnti, ss.id, cce, al, slot_alloc.slot);
        slot_alloc.result.dl.pdcchs.push(PdcchDlInfo {
            rnti,
            rnti_type,
            ss_id: ss.id,
            aggregation_level: al,
            cce_index: cce as u8,
            dci: None,
        });
        Some(slot_alloc.result.dl.pdcchs.len() - 1)
    }

    /// Allocate a UL PDCCH; returns its position in the slot's UL PDCCH list
    pub fn alloc_ul_pdcch(
        &self,
        slot_alloc: &mut SlotAllocator,
        rnti: Rnti,
        rnti_type: RntiType,
        ss: &SearchSpaceConfig,
        al: AggregationLevel,
    ) -> Option<usize> {
        if slot_alloc.result.ul.pdcchs.len() >= MAX_UL_PDCCH_PER_SLOT {
            return None;
        }
        let cce = self.find_candidate(slot_alloc, ss, al)?;
        self.reserve(slot_alloc, cce, al);
        trace!("UL PDCCH rnti={} ss={} cce={} al={:?} in {}", rnti, ss.id, cce, al, slot_alloc.slot);
        slot_alloc.result.ul.pdcchs.push(PdcchUlInfo {
            rnti,
            rnti_type,
            ss_id: ss.id,
            aggregation_level: al,
            cce_index: cce as u8,
            dci: None,
        });
        Some(slot_alloc.result.ul.pdcchs.len() - 1)
    }

    fn release(slot_alloc: &mut SlotAllocator, cce: u8, al: AggregationLevel) {
        let start = cce as usize;
        slot_alloc.cces[start..start + al.nof_cces() as usize]
            .iter_mut()
            .for_each(|used| *used = false);
    }

    /// Undo the most recent DL PDCCH allocation
    pub fn cancel_last_dl_pdcch(&self, slot_alloc: &mut SlotAllocator) {
        if let Some(pdcch) = slot_alloc.result.dl.pdcchs.pop() {
            Self::release(slot_alloc, pdcch.cce_index, pdcch.aggregation_level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::config::CellSchedConfig;
    use crate::mac::resource_grid::CellResourceAllocator;
    use common::SlotPoint;

    #[test]
    fn test_coreset0_config() {
        let config = Coreset0Config::from_index(1).unwrap();
        assert_eq!(config.num_rbs, 24);
        assert_eq!(config.num_symbols, 2);
        assert_eq!(config.rb_offset, 2);
        assert_eq!(config.nof_cces(), 8);
        assert_eq!(Coreset0Config::from_index(8).unwrap().nof_cces(), 16);

        assert!(Coreset0Config::from_index(20).is_err());
    }

    #[test]
    fn test_css_candidates() {
        // 16 CCEs, AL4, 4 candidates -> 0, 4, 8, 12
        let cces: Vec<u32> = (0..4).map(|m| css_candidate_cce(16, AggregationLevel::N4, m, 4)).collect();
        assert_eq!(cces, vec![0, 4, 8, 12]);
        // 16 CCEs, AL8, 2 candidates -> 0, 8
        assert_eq!(css_candidate_cce(16, AggregationLevel::N8, 1, 2), 8);
    }

    #[test]
    fn test_pdcch_exhaustion_and_cancel() {
        let cell = Arc::new(CellConfiguration::new(CellSchedConfig::default()).unwrap());
        let pdcch = PdcchAllocator::new(cell.clone());
        let mut res_grid = CellResourceAllocator::new(&cell);
        res_grid.slot_indication(SlotPoint::new(0, 10, 0));
        let ss = cell.search_space(1).unwrap().clone();
        let al = AggregationLevel::N4;

        for i in 0..4u16 {
            assert_eq!(pdcch.alloc_dl_pdcch(&mut res_grid[0], Rnti(0x4601 + i), RntiType::C, &ss, al), Some(i as usize));
        }
        assert!(pdcch.alloc_ul_pdcch(&mut res_grid[0], Rnti(0x4700), RntiType::C, &ss, al).is_none());

        pdcch.cancel_last_dl_pdcch(&mut res_grid[0]);
        assert_eq!(res_grid[0].result.dl.pdcchs.len(), 3);
        assert_eq!(pdcch.alloc_ul_pdcch(&mut res_grid[0], Rnti(0x4700), RntiType::C, &ss, al), Some(0));
        assert_eq!(res_grid[0].result.ul.pdcchs[0].cce_index, 12);
    }
}
