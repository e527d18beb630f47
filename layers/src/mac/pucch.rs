//! PUCCH Resource Allocation
//!
//! Common PUCCH resources (TS 38.213 clause 9.2.1) carry HARQ-ACK for UEs
//! without a dedicated configuration. Dedicated SR opportunities are tracked
//! next to them so an SR-only PUCCH can be dropped once the UE gets a PUSCH.

use super::resource_grid::SlotAllocator;
use super::sched_result::{PucchInfo, MAX_PUCCH_PER_SLOT};
use common::types::Rnti;
use tracing::trace;

/// Size of the common PUCCH resource set
pub const NOF_COMMON_PUCCH_RESOURCES: u8 = 16;

#[derive(Debug, Clone)]
pub struct PucchAllocator {
    nof_common_resources: u8,
}

impl Default for PucchAllocator {
    fn default() -> Self {
        Self::new(NOF_COMMON_PUCCH_RESOURCES)
    }
}

impl PucchAllocator {
    pub fn new(nof_common_resources: u8) -> Self {
        Self { nof_common_resources }
    }

    fn free_common_resource(&self, slot_alloc: &SlotAllocator) -> Option<u8> {
        (0..self.nof_common_resources).find(|r| {
            !slot_alloc
                .result
                .ul
                .pucchs
                .iter()
                .any(|p| p.common && p.resource_id == *r)
        })
    }

    /// Whether a HARQ-ACK for `rnti` can still be placed in the slot
    pub fn can_alloc_harq_ack(&self, slot_alloc: &SlotAllocator, rnti: Rnti) -> bool {
        slot_alloc.result.ul.pucchs.len() < MAX_PUCCH_PER_SLOT
            && !self.has_harq_ack(slot_alloc, rnti)
            && self.free_common_resource(slot_alloc).is_some()
    }

    /// Reserve a common PUCCH resource for one HARQ-ACK bit
    pub fn alloc_common_harq_ack(&self, slot_alloc: &mut SlotAllocator, rnti: Rnti) -> Option<u8> {
        if !self.can_alloc_harq_ack(slot_alloc, rnti) {
            return None;
        }
        let resource_id = self.free_common_resource(slot_alloc)?;
        trace!("Common PUCCH {} for rnti={} in {}", resource_id, rnti, slot_alloc.slot);
        slot_alloc.result.ul.pucchs.push(PucchInfo {
            rnti,
            resource_id,
            common: true,
            harq_ack_bits: 1,
            sr: false,
        });
        Some(resource_id)
    }

    pub fn has_harq_ack(&self, slot_alloc: &SlotAllocator, rnti: Rnti) -> bool {
        slot_alloc
            .result
            .ul
            .pucchs
            .iter()
            .any(|p| p.rnti == rnti && p.harq_ack_bits > 0)
    }

    /// Add an SR opportunity for `rnti`
    pub fn alloc_sr_opportunity(&self, slot_alloc: &mut SlotAllocator, rnti: Rnti, resource_id: u8) -> bool {
        let pucchs = &mut slot_alloc.result.ul.pucchs;
        if pucchs.iter().any(|p| p.rnti == rnti && p.sr) {
            return true;
        }
        if pucchs.len() >= MAX_PUCCH_PER_SLOT {
            return false;
        }
        pucchs.push(PucchInfo {
            rnti,
            resource_id,
            common: false,
            harq_ack_bits: 0,
            sr: true,
        });
        true
    }

    /// Drop the PUCCH of `rnti` if it is its only one and carries SR alone
    pub fn remove_sr_only(&self, slot_alloc: &mut SlotAllocator, rnti: Rnti) -> bool {
        let pucchs = &mut slot_alloc.result.ul.pucchs;
        let mut ue_pucchs = pucchs.iter().enumerate().filter(|(_, p)| p.rnti == rnti);
        let (idx, only) = match (ue_pucchs.next(), ue_pucchs.next()) {
            (Some((idx, p)), None) => (idx, p),
            _ => return false,
        };
        if !only.sr || only.harq_ack_bits > 0 || only.common {
            return false;
        }
        pucchs.remove(idx);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::config::{CellConfiguration, CellSchedConfig};
    use crate::mac::resource_grid::CellResourceAllocator;
    use common::SlotPoint;

    fn grid() -> CellResourceAllocator {
        let cell = CellConfiguration::new(CellSchedConfig::default()).unwrap();
        let mut res_grid = CellResourceAllocator::new(&cell);
        res_grid.slot_indication(SlotPoint::new(0, 0, 0));
        res_grid
    }

    #[test]
    fn test_one_harq_ack_per_rnti() {
        let mut res_grid = grid();
        let pucch = PucchAllocator::default();
        assert_eq!(pucch.alloc_common_harq_ack(&mut res_grid[4], Rnti(0x4601)), Some(0));
        assert_eq!(pucch.alloc_common_harq_ack(&mut res_grid[4], Rnti(0x4601)), None);
        assert_eq!(pucch.alloc_common_harq_ack(&mut res_grid[4], Rnti(0x4602)), Some(1));
        assert_eq!(pucch.alloc_common_harq_ack(&mut res_grid[4], Rnti(0x4603)), Some(2));
        assert!(pucch.has_harq_ack(&res_grid[4], Rnti(0x4601)));
    }

    #[test]
    fn test_common_resources_exhausted() {
        let mut res_grid = grid();
        let pucch = PucchAllocator::new(2);
        assert!(pucch.alloc_common_harq_ack(&mut res_grid[1], Rnti(1)).is_some());
        assert!(pucch.alloc_common_harq_ack(&mut res_grid[1], Rnti(2)).is_some());
        assert!(!pucch.can_alloc_harq_ack(&res_grid[1], Rnti(3)));
    }

    #[test]
    fn test_sr_only_removal() {
        let mut res_grid = grid();
        let pucch = PucchAllocator::default();
        let rnti = Rnti(0x4601);
        assert!(pucch.alloc_sr_opportunity(&mut res_grid[2], rnti, 3));
        assert!(pucch.remove_sr_only(&mut res_grid[2], rnti));
        assert!(res_grid[2].result.ul.pucchs.is_empty());

        // SR next to a HARQ-ACK is kept
        pucch.alloc_sr_opportunity(&mut res_grid[3], rnti, 3);
        pucch.alloc_common_harq_ack(&mut res_grid[3], rnti);
        assert!(!pucch.remove_sr_only(&mut res_grid[3], rnti));
        assert_eq!(res_grid[3].result.ul.pucchs.len(), 2);
    }
}
