//! Cell Resource Grid
//!
//! Per-slot occupancy of PRBs and OFDM symbols for DL and UL, the CORESET#0
//! CCE usage and the grant lists already built for the slot. A ring of slot
//! allocators covers the current slot and the lookahead horizon used by the
//! schedulers that allocate ahead (RAR/Msg3, fallback PDSCH/PUCCH/PUSCH).

use super::config::{CellConfiguration, NOF_OFDM_SYMBOLS_PER_SLOT};
use super::sched_result::{OfdmSymbolRange, PrbInterval, SlotResult};
use common::SlotPoint;
use ndarray::{s, Array2, Axis};
use std::ops::{Index, IndexMut};
use tracing::trace;

/// Number of slots tracked by the ring, current slot included
pub const RING_ALLOCATOR_SIZE: usize = 80;

/// PRB x symbol occupancy bitmap
#[derive(Debug, Clone)]
pub struct RbGrid {
    grid: Array2<bool>,
}

impl RbGrid {
    pub fn new(nof_prbs: u16) -> Self {
        Self {
            grid: Array2::from_elem((nof_prbs as usize, NOF_OFDM_SYMBOLS_PER_SLOT as usize), false),
        }
    }

    pub fn nof_prbs(&self) -> u16 {
        self.grid.nrows() as u16
    }

    pub fn clear(&mut self) {
        self.grid.fill(false);
    }

    /// Whether any RE of the region is already claimed
    pub fn collides(&self, symbols: OfdmSymbolRange, prbs: PrbInterval) -> bool {
        if prbs.stop > self.nof_prbs() || symbols.stop > NOF_OFDM_SYMBOLS_PER_SLOT {
            return true;
        }
        self.grid
            .slice(s![prbs.start as usize..prbs.stop as usize, symbols.start as usize..symbols.stop as usize])
            .iter()
            .any(|used| *used)
    }

    /// Mark the region as used
    pub fn fill(&mut self, symbols: OfdmSymbolRange, prbs: PrbInterval) {
        debug_assert!(!self.collides(symbols, prbs), "grid collision at {:?} {:?}", symbols, prbs);
        self.grid
            .slice_mut(s![prbs.start as usize..prbs.stop as usize, symbols.start as usize..symbols.stop as usize])
            .fill(true);
    }

    /// Per-PRB occupancy over the given symbols
    pub fn used_prbs(&self, symbols: OfdmSymbolRange) -> Vec<bool> {
        self.grid
            .slice(s![.., symbols.start as usize..symbols.stop as usize])
            .map_axis(Axis(1), |row| row.iter().any(|used| *used))
            .to_vec()
    }

    /// First free interval of exactly `nof_prbs` PRBs inside `limits`
    pub fn find_free_prbs(
        &self,
        symbols: OfdmSymbolRange,
        limits: PrbInterval,
        nof_prbs: u16,
    ) -> Option<PrbInterval> {
        let used = self.used_prbs(symbols);
        find_free_run(&used, limits, nof_prbs)
    }

    /// Largest free interval inside `limits`
    pub fn largest_free_interval(&self, symbols: OfdmSymbolRange, limits: PrbInterval) -> PrbInterval {
        let used = self.used_prbs(symbols);
        largest_free_run(&used, limits)
    }
}

/// First run of `nof_prbs` free entries inside `limits`
pub fn find_free_run(used: &[bool], limits: PrbInterval, nof_prbs: u16) -> Option<PrbInterval> {
    if nof_prbs == 0 {
        return None;
    }
    let stop = (limits.stop as usize).min(used.len());
    let mut run_start = limits.start as usize;
    for prb in limits.start as usize..stop {
        if used[prb] {
            run_start = prb + 1;
        } else if prb + 1 - run_start == nof_prbs as usize {
            return Some(PrbInterval::new(run_start as u16, (prb + 1) as u16));
        }
    }
    None
}

/// Largest run of free entries inside `limits`, earliest one on ties
pub fn largest_free_run(used: &[bool], limits: PrbInterval) -> PrbInterval {
    let stop = (limits.stop as usize).min(used.len());
    let mut best = PrbInterval::new(limits.start, limits.start);
    let mut run_start = limits.start as usize;
    for prb in limits.start as usize..stop {
        if used[prb] {
            run_start = prb + 1;
        } else if (prb + 1 - run_start) as u16 > best.length() {
            best = PrbInterval::new(run_start as u16, (prb + 1) as u16);
        }
    }
    best
}

/// Resources and results of one slot
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    pub slot: SlotPoint,
    pub dl_grid: RbGrid,
    pub ul_grid: RbGrid,
    /// CORESET#0 CCE occupancy
    pub cces: Vec<bool>,
    pub result: SlotResult,
}

impl SlotAllocator {
    fn new(slot: SlotPoint, nof_prbs: u16, nof_cces: usize) -> Self {
        Self {
            slot,
            dl_grid: RbGrid::new(nof_prbs),
            ul_grid: RbGrid::new(nof_prbs),
            cces: vec![false; nof_cces],
            result: SlotResult::new(slot),
        }
    }

    fn reset(&mut self, slot: SlotPoint) {
        self.slot = slot;
        self.dl_grid.clear();
        self.ul_grid.clear();
        self.cces.iter_mut().for_each(|cce| *cce = false);
        self.result = SlotResult::new(slot);
    }
}

/// Ring of slot allocators indexed by offset from the current slot
#[derive(Debug)]
pub struct CellResourceAllocator {
    slots: Vec<SlotAllocator>,
    last_slot: Option<SlotPoint>,
}

impl CellResourceAllocator {
    pub fn new(cell: &CellConfiguration) -> Self {
        let nof_cces = cell.coreset0.nof_cces() as usize;
        let origin = SlotPoint::new(cell.numerology(), 0, 0);
        let slots = (0..RING_ALLOCATOR_SIZE as u32)
            .map(|i| SlotAllocator::new(origin + i, cell.nof_prbs, nof_cces))
            .collect();
        Self { slots, last_slot: None }
    }

    /// Advance the ring so that `slot` is at offset 0
    pub fn slot_indication(&mut self, slot: SlotPoint) {
        for offset in 0..RING_ALLOCATOR_SIZE as u32 {
            let target = slot + offset;
            let idx = target.count() as usize % RING_ALLOCATOR_SIZE;
            if self.slots[idx].slot != target {
                self.slots[idx].reset(target);
            }
        }
        if let Some(last) = self.last_slot {
            if slot - last != 1 {
                trace!("Resource grid jumped from {} to {}", last, slot);
            }
        }
        self.last_slot = Some(slot);
    }

    /// Current slot
    pub fn slot_tx(&self) -> SlotPoint {
        self.last_slot.unwrap_or_else(|| self.slots[0].slot)
    }

    fn index_of(&self, offset: u32) -> usize {
        debug_assert!((offset as usize) < RING_ALLOCATOR_SIZE, "slot offset {} beyond ring", offset);
        (self.slot_tx() + offset).count() as usize % RING_ALLOCATOR_SIZE
    }
}

impl Index<u32> for CellResourceAllocator {
    type Output = SlotAllocator;

    fn index(&self, offset: u32) -> &SlotAllocator {
        &self.slots[self.index_of(offset)]
    }
}

impl IndexMut<u32> for CellResourceAllocator {
    fn index_mut(&mut self, offset: u32) -> &mut SlotAllocator {
        let idx = self.index_of(offset);
        &mut self.slots[idx]
    }
}
