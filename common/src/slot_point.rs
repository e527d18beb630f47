//! Slot Point Arithmetic
//!
//! A slot point identifies one slot inside the 1024-frame SFN cycle for a
//! given numerology. Arithmetic wraps at the end of the cycle and comparisons
//! are made over the shortest modular distance, so a slot shortly after the
//! SFN wrap still compares as later than one shortly before it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of system frames in one SFN cycle
pub const NOF_SFNS: u32 = 1024;

/// Number of subframes in one radio frame
pub const NOF_SUBFRAMES_PER_FRAME: u32 = 10;

/// Slot within the SFN cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPoint {
    numerology: u8,
    count: u32,
}

impl SlotPoint {
    /// Create a slot point from SFN and slot index within the frame
    pub fn new(numerology: u8, sfn: u32, slot_index: u32) -> Self {
        debug_assert!(numerology <= 4, "invalid numerology {}", numerology);
        let slots_per_frame = NOF_SUBFRAMES_PER_FRAME << numerology;
        debug_assert!(slot_index < slots_per_frame, "slot index {} out of range", slot_index);
        Self {
            numerology,
            count: (sfn % NOF_SFNS) * slots_per_frame + slot_index % slots_per_frame,
        }
    }

    /// Create a slot point from the absolute slot count inside the SFN cycle
    pub fn from_count(numerology: u8, count: u32) -> Self {
        let cycle = NOF_SFNS * (NOF_SUBFRAMES_PER_FRAME << numerology);
        Self { numerology, count: count % cycle }
    }

    /// Numerology (mu)
    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    /// Absolute slot count inside the SFN cycle
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn nof_slots_per_frame(&self) -> u32 {
        NOF_SUBFRAMES_PER_FRAME << self.numerology
    }

    pub fn nof_slots_per_subframe(&self) -> u32 {
        1 << self.numerology
    }

    /// Number of slots in a full SFN cycle
    pub fn nof_slots_per_cycle(&self) -> u32 {
        NOF_SFNS * self.nof_slots_per_frame()
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.count / self.nof_slots_per_frame()
    }

    /// Slot index within the frame
    pub fn slot_index(&self) -> u32 {
        self.count % self.nof_slots_per_frame()
    }

    /// Subframe index within the frame
    pub fn subframe_index(&self) -> u32 {
        self.slot_index() / self.nof_slots_per_subframe()
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: u32) -> SlotPoint {
        let cycle = self.nof_slots_per_cycle();
        SlotPoint {
            numerology: self.numerology,
            count: (self.count + rhs % cycle) % cycle,
        }
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, rhs: u32) -> SlotPoint {
        let cycle = self.nof_slots_per_cycle();
        SlotPoint {
            numerology: self.numerology,
            count: (self.count + cycle - rhs % cycle) % cycle,
        }
    }
}

/// Signed distance in slots, taken over the shortest way round the SFN cycle
impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    fn sub(self, rhs: SlotPoint) -> i32 {
        debug_assert_eq!(self.numerology, rhs.numerology, "numerology mismatch");
        let cycle = self.nof_slots_per_cycle();
        let diff = (self.count + cycle - rhs.count) % cycle;
        if diff >= cycle / 2 {
            diff as i32 - cycle as i32
        } else {
            diff as i32
        }
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some((*self - *other).cmp(&0))
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sfn_and_slot_index() {
        let sl = SlotPoint::new(1, 7, 13);
        assert_eq!(sl.sfn(), 7);
        assert_eq!(sl.slot_index(), 13);
        assert_eq!(sl.subframe_index(), 6);
        assert_eq!(sl.count(), 7 * 20 + 13);
    }

    #[test]
    fn test_wraparound_addition() {
        let last = SlotPoint::new(0, 1023, 9);
        let next = last + 1;
        assert_eq!(next.sfn(), 0);
        assert_eq!(next.slot_index(), 0);
        assert_eq!(next - 1, last);
    }

    #[test]
    fn test_ordering_across_wrap() {
        let before = SlotPoint::new(0, 1023, 5);
        let after = before + 10;
        assert!(after > before);
        assert!(before < after);
        assert_eq!(after - before, 10);
        assert_eq!(before - after, -10);
    }

    #[test]
    fn test_from_count_reduces_modulo_cycle() {
        let sl = SlotPoint::from_count(0, 10240 + 100);
        assert_eq!(sl.count(), 100);
        assert_eq!(sl.sfn(), 10);
    }
}
