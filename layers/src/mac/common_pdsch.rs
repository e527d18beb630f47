//! Common PDSCH Allocation
//!
//! Shared steps of the broadcast and common-RNTI DL grants (SI, paging, RAR):
//! picking a k0 = 0 time-domain resource, sizing the PRB allocation from the
//! payload, and committing PDCCH plus PDSCH into a slot.

use super::config::{CellConfiguration, PdschTimeDomainResource};
use super::pdcch::PdcchAllocator;
use super::resource_grid::SlotAllocator;
use super::retry::FailureCause;
use super::sched_result::{DlDci, OfdmSymbolRange, PdschInfo, PrbInterval, RntiType};
use super::tbs::{nof_dmrs_symbols, prbs_for_payload};
use common::types::Rnti;

/// PDSCH placement that passed the grid check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdschCandidate {
    pub td_index: u8,
    pub symbols: OfdmSymbolRange,
    pub nof_dmrs_symbols: u8,
    pub prbs: PrbInterval,
    pub tbs_bytes: u32,
}

/// Time-domain resources with k0 = 0 that fit the DL part of `slot_alloc`
pub fn eligible_pdsch_td<'a>(
    cell: &'a CellConfiguration,
    slot_alloc: &'a SlotAllocator,
) -> impl Iterator<Item = (u8, &'a PdschTimeDomainResource)> + 'a {
    cell.params
        .pdsch_time_domain
        .iter()
        .enumerate()
        .filter(move |(_, td)| td.k0 == 0 && cell.pdsch_fits(slot_alloc.slot, td.symbols()))
        .map(|(i, td)| (i as u8, td))
}

/// Size and place a PDSCH carrying `payload_bytes` inside `limits`
pub fn find_pdsch_candidate(
    cell: &CellConfiguration,
    slot_alloc: &SlotAllocator,
    td_index: u8,
    payload_bytes: u32,
    mcs: u8,
    limits: PrbInterval,
) -> Result<PdschCandidate, FailureCause> {
    let td = cell
        .params
        .pdsch_time_domain
        .get(td_index as usize)
        .ok_or(FailureCause::SlotUnavailable)?;
    let symbols = td.symbols();
    let nof_dmrs = nof_dmrs_symbols(symbols.stop);
    let sizing = prbs_for_payload(payload_bytes, mcs, symbols.length(), nof_dmrs, limits.length())
        .ok_or(FailureCause::NoPdsch)?;
    let prbs = slot_alloc
        .dl_grid
        .find_free_prbs(symbols, limits, sizing.nof_prbs)
        .ok_or(FailureCause::NoPdsch)?;
    Ok(PdschCandidate {
        td_index,
        symbols,
        nof_dmrs_symbols: nof_dmrs,
        prbs,
        tbs_bytes: sizing.tbs_bytes,
    })
}

/// Allocate the PDCCH for `rnti` and commit the PDSCH candidate
pub fn alloc_common_grant(
    cell: &CellConfiguration,
    pdcch: &PdcchAllocator,
    slot_alloc: &mut SlotAllocator,
    rnti: Rnti,
    rnti_type: RntiType,
    ss_id: u8,
    cand: &PdschCandidate,
    mcs: u8,
) -> Result<PdschInfo, FailureCause> {
    let ss = cell.search_space(ss_id).ok_or(FailureCause::NoPdcch)?;
    let pdcch_idx = pdcch
        .alloc_dl_pdcch(slot_alloc, rnti, rnti_type, ss, cell.params.common_aggregation_level)
        .ok_or(FailureCause::NoPdcch)?;
    slot_alloc.dl_grid.fill(cand.symbols, cand.prbs);
    slot_alloc.result.dl.pdcchs[pdcch_idx].dci = Some(DlDci {
        prbs: cand.prbs,
        time_resource: cand.td_index,
        mcs,
        harq: None,
        k1: None,
        pucch_resource: None,
    });
    Ok(PdschInfo {
        rnti,
        prbs: cand.prbs,
        symbols: cand.symbols,
        nof_dmrs_symbols: cand.nof_dmrs_symbols,
        mcs,
        tbs_bytes: cand.tbs_bytes,
    })
}
