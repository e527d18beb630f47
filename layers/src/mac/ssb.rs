//! SSB Resource Reservation
//!
//! Reserves the SS/PBCH block symbols and PRBs in the DL grid following the
//! Case A candidate pattern of 3GPP TS 38.213 clause 4.1: beam `i` starts at
//! symbol 2 or 8 of slot `i / 2` of the SSB period.

use super::config::CellConfiguration;
use super::resource_grid::SlotAllocator;
use super::sched_result::{OfdmSymbolRange, PrbInterval, SsbInfo};
use common::utils::time;
use common::SlotPoint;
use tracing::{debug, warn};

/// Bandwidth of an SS/PBCH block in PRBs
pub const SSB_NOF_PRBS: u16 = 20;

/// Duration of an SS/PBCH block in OFDM symbols
pub const SSB_NOF_SYMBOLS: u8 = 4;

/// Maximum number of beams of the Case A pattern
pub const MAX_SSB_BEAMS: u8 = 8;

/// First symbol of beam `beam` within its slot
fn ssb_start_symbol(beam: u8) -> u8 {
    if beam % 2 == 0 {
        2
    } else {
        8
    }
}

/// SSB period in slots
pub fn ssb_period_slots(cell: &CellConfiguration) -> u32 {
    time::ms_to_slots(cell.params.ssb.period_ms, cell.params.scs)
}

/// Slot offset of `beam` inside the SSB period
pub fn ssb_slot_offset(beam: u8) -> u32 {
    beam as u32 / 2
}

/// Active beams transmitted in `slot`
pub fn ssb_beams_in_slot(cell: &CellConfiguration, slot: SlotPoint) -> Vec<u8> {
    let slot_in_period = slot.count() % ssb_period_slots(cell);
    (0..MAX_SSB_BEAMS)
        .filter(|beam| cell.params.ssb.beam_bitmap & (1 << beam) != 0)
        .filter(|beam| ssb_slot_offset(*beam) == slot_in_period)
        .collect()
}

/// Check if this slot should contain SSB
pub fn is_ssb_slot(cell: &CellConfiguration, slot: SlotPoint) -> bool {
    !ssb_beams_in_slot(cell, slot).is_empty()
}

/// Reserve the SSBs of the slot in the DL grid
pub fn schedule_ssb(cell: &CellConfiguration, slot_alloc: &mut SlotAllocator) {
    let slot = slot_alloc.slot;
    let start_prb = cell.params.ssb.start_prb;
    let prbs = PrbInterval::new(start_prb, start_prb + SSB_NOF_PRBS);
    for beam in ssb_beams_in_slot(cell, slot) {
        let start = ssb_start_symbol(beam);
        let symbols = OfdmSymbolRange::new(start, start + SSB_NOF_SYMBOLS);
        if symbols.stop > cell.nof_dl_symbols(slot) || slot_alloc.dl_grid.collides(symbols, prbs) {
            warn!("Cannot place SSB beam {} in {}", beam, slot);
            continue;
        }
        slot_alloc.dl_grid.fill(symbols, prbs);
        slot_alloc.result.dl.ssbs.push(SsbInfo { ssb_index: beam, symbols, prbs });
        debug!("Scheduled SSB beam {} in {}", beam, slot);
    }
}
