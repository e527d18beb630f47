//! Slot Scheduling Result
//!
//! Grants produced for one slot: PDCCH entries tagged by RNTI type, PDSCH
//! lists (SSB, SI, RAR, paging, fallback UE) and the UL counterparts (Msg3 and
//! fallback PUSCH, PUCCH resources).

use super::config::AggregationLevel;
use super::indications::DuUeIndex;
use common::types::Rnti;
use common::SlotPoint;
use serde::Serialize;

/// Maximum PDCCHs per slot and direction
pub const MAX_DL_PDCCH_PER_SLOT: usize = 16;
pub const MAX_UL_PDCCH_PER_SLOT: usize = 16;
/// Maximum grants per PDSCH list
pub const MAX_SI_PDUS_PER_SLOT: usize = 8;
pub const MAX_RAR_PDUS_PER_SLOT: usize = 16;
pub const MAX_PAGING_PDUS_PER_SLOT: usize = 8;
pub const MAX_UE_PDUS_PER_SLOT: usize = 16;
/// Maximum Msg3 grants carried by one RAR
pub const MAX_GRANTS_PER_RAR: usize = 16;
/// Maximum PUSCH grants per slot
pub const MAX_PUSCH_PER_SLOT: usize = 16;
/// Maximum PUCCH resources per slot
pub const MAX_PUCCH_PER_SLOT: usize = 32;

/// Contiguous PRB interval `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PrbInterval {
    pub start: u16,
    pub stop: u16,
}

impl PrbInterval {
    pub fn new(start: u16, stop: u16) -> Self {
        debug_assert!(start <= stop, "invalid PRB interval [{}, {})", start, stop);
        Self { start, stop }
    }

    pub fn length(&self) -> u16 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    pub fn overlaps(&self, other: &PrbInterval) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    pub fn contains(&self, other: &PrbInterval) -> bool {
        other.start >= self.start && other.stop <= self.stop
    }
}

/// OFDM symbol range `[start, stop)` within a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OfdmSymbolRange {
    pub start: u8,
    pub stop: u8,
}

impl OfdmSymbolRange {
    pub fn new(start: u8, stop: u8) -> Self {
        debug_assert!(start <= stop, "invalid symbol range [{}, {})", start, stop);
        Self { start, stop }
    }

    pub fn length(&self) -> u8 {
        self.stop - self.start
    }
}

/// RNTI type a PDCCH is scrambled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RntiType {
    P,
    Si,
    Ra,
    Tc,
    C,
}

/// HARQ fields of a DCI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DciHarq {
    pub harq_id: u8,
    pub ndi: bool,
    pub rv: u8,
}

/// DL assignment (DCI 1_0)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlDci {
    pub prbs: PrbInterval,
    pub time_resource: u8,
    pub mcs: u8,
    pub harq: Option<DciHarq>,
    /// PDSCH to HARQ-ACK delay
    pub k1: Option<u8>,
    /// Common PUCCH resource indicator
    pub pucch_resource: Option<u8>,
}

/// UL grant (DCI 0_0)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UlDci {
    pub prbs: PrbInterval,
    pub time_resource: u8,
    pub mcs: u8,
    pub harq: DciHarq,
}

/// DL PDCCH entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdcchDlInfo {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub ss_id: u8,
    pub aggregation_level: AggregationLevel,
    pub cce_index: u8,
    /// Filled once the PDSCH is committed
    pub dci: Option<DlDci>,
}

/// UL PDCCH entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdcchUlInfo {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub ss_id: u8,
    pub aggregation_level: AggregationLevel,
    pub cce_index: u8,
    pub dci: Option<UlDci>,
}

/// PDSCH allocation metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdschInfo {
    pub rnti: Rnti,
    pub prbs: PrbInterval,
    pub symbols: OfdmSymbolRange,
    pub nof_dmrs_symbols: u8,
    pub mcs: u8,
    pub tbs_bytes: u32,
}

/// PUSCH allocation metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PuschInfo {
    pub rnti: Rnti,
    pub prbs: PrbInterval,
    pub symbols: OfdmSymbolRange,
    pub nof_dmrs_symbols: u8,
    pub mcs: u8,
    pub tbs_bytes: u32,
    pub harq: DciHarq,
}

/// SSB transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SsbInfo {
    pub ssb_index: u8,
    pub symbols: OfdmSymbolRange,
    pub prbs: PrbInterval,
}

/// System information content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SiKind {
    Sib1,
    /// SI message index, 1-based
    SiMessage(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiGrant {
    pub kind: SiKind,
    /// SSB beam the SIB1 occasion belongs to
    pub beam: Option<u8>,
    pub pdsch: PdschInfo,
}

/// Msg3 grant carried inside a RAR
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RarUlGrant {
    pub preamble_id: u8,
    pub timing_advance: u16,
    pub tc_rnti: Rnti,
    pub prbs: PrbInterval,
    pub time_resource: u8,
    pub mcs: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RarGrant {
    pub ra_rnti: Rnti,
    pub pdsch: PdschInfo,
    pub grants: Vec<RarUlGrant>,
}

/// Paging record identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PagingUeIdentity {
    /// 5G-S-TMSI (48 bits)
    Cn(u64),
    /// Full I-RNTI (40 bits)
    Ran(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PagingGrant {
    pub pdsch: PdschInfo,
    pub records: Vec<PagingUeIdentity>,
}

/// Content of a fallback DL transport block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DlContent {
    /// Contention Resolution CE alone
    ConRes,
    Srb0 { bytes: u32 },
    Srb1 { bytes: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UeDlGrant {
    pub ue_index: DuUeIndex,
    pub pdsch: PdschInfo,
    pub harq: DciHarq,
    pub content: DlContent,
    pub is_retx: bool,
    /// Slot carrying the HARQ-ACK
    pub ack_slot: SlotPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PuschKind {
    Msg3,
    Ue(DuUeIndex),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PuschGrant {
    pub kind: PuschKind,
    pub pusch: PuschInfo,
    pub is_retx: bool,
}

/// PUCCH resource assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PucchInfo {
    pub rnti: Rnti,
    pub resource_id: u8,
    /// Common (pre-RRC) resource set
    pub common: bool,
    pub harq_ack_bits: u8,
    pub sr: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DlSlotResult {
    pub pdcchs: Vec<PdcchDlInfo>,
    pub ssbs: Vec<SsbInfo>,
    pub si_grants: Vec<SiGrant>,
    pub rar_grants: Vec<RarGrant>,
    pub paging_grants: Vec<PagingGrant>,
    pub ue_grants: Vec<UeDlGrant>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UlSlotResult {
    pub pdcchs: Vec<PdcchUlInfo>,
    pub puschs: Vec<PuschGrant>,
    pub pucchs: Vec<PucchInfo>,
}

/// Everything scheduled for one slot
#[derive(Debug, Clone, Serialize)]
pub struct SlotResult {
    pub slot: SlotPoint,
    pub dl: DlSlotResult,
    pub ul: UlSlotResult,
}

impl SlotResult {
    pub fn new(slot: SlotPoint) -> Self {
        Self {
            slot,
            dl: DlSlotResult::default(),
            ul: UlSlotResult::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dl.pdcchs.is_empty()
            && self.dl.ssbs.is_empty()
            && self.dl.si_grants.is_empty()
            && self.dl.rar_grants.is_empty()
            && self.dl.paging_grants.is_empty()
            && self.dl.ue_grants.is_empty()
            && self.ul.pdcchs.is_empty()
            && self.ul.puschs.is_empty()
            && self.ul.pucchs.is_empty()
    }
}
