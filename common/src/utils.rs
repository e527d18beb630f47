//! Common Utilities
//!
//! Provides utility functions used across the GNodeB implementation

use crate::types::SubcarrierSpacing;
use tracing::trace;

/// Integer division rounding up
pub fn divide_ceil(num: u32, den: u32) -> u32 {
    (num + den - 1) / den
}

/// Calculate resource blocks from bandwidth and subcarrier spacing
pub fn calculate_nrb(bandwidth_hz: u32, scs_khz: u16) -> u16 {
    // Each RB has 12 subcarriers
    const SUBCARRIERS_PER_RB: u32 = 12;

    let scs_hz = scs_khz as u32 * 1000;
    let total_subcarriers = bandwidth_hz / scs_hz;
    let nrb = total_subcarriers / SUBCARRIERS_PER_RB;

    trace!("Calculated {} RBs for {}Hz bandwidth with {}kHz SCS",
           nrb, bandwidth_hz, scs_khz);

    nrb as u16
}

/// Time utilities for slot/frame calculations
pub mod time {
    use super::SubcarrierSpacing;

    /// Slot duration in microseconds for different SCS
    pub fn slot_duration_us(scs: SubcarrierSpacing) -> u32 {
        match scs {
            SubcarrierSpacing::Scs15 => 1000,    // 1 ms
            SubcarrierSpacing::Scs30 => 500,     // 0.5 ms
            SubcarrierSpacing::Scs60 => 250,     // 0.25 ms
            SubcarrierSpacing::Scs120 => 125,    // 0.125 ms
            SubcarrierSpacing::Scs240 => 62,     // 0.0625 ms (approximated)
        }
    }

    /// Number of slots per frame (10ms)
    pub fn slots_per_frame(scs: SubcarrierSpacing) -> u32 {
        10 << scs.numerology()
    }

    /// Number of slots per subframe (1ms)
    pub fn slots_per_subframe(scs: SubcarrierSpacing) -> u32 {
        1 << scs.numerology()
    }

    /// Convert a duration in milliseconds into slots
    pub fn ms_to_slots(ms: u32, scs: SubcarrierSpacing) -> u32 {
        ms * slots_per_subframe(scs)
    }
}
