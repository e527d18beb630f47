//! Cell Scheduling Configuration
//!
//! Static configuration of one cell as seen by the common-channel schedulers,
//! plus the validated `CellConfiguration` wrapper that answers per-slot
//! questions (is this slot DL-enabled, how many UL symbols, ...).

use crate::LayerError;
use super::pdcch::Coreset0Config;
use super::resource_grid::RING_ALLOCATOR_SIZE;
use super::sched_result::{OfdmSymbolRange, PrbInterval};
use common::types::{Bandwidth, CellId, DuplexMode, SubcarrierSpacing};
use common::utils::{calculate_nrb, time};
use common::SlotPoint;
use serde::{Deserialize, Serialize};

/// Number of OFDM symbols in a slot with normal cyclic prefix
pub const NOF_OFDM_SYMBOLS_PER_SLOT: u8 = 14;

/// Paging cycles T allowed in radio frames (PagingCycle of TS 38.331)
pub const PAGING_DRX_CYCLES: [u32; 4] = [32, 64, 128, 256];

/// PDCCH aggregation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationLevel {
    N1,
    N2,
    N4,
    N8,
    N16,
}

impl AggregationLevel {
    /// Number of CCEs
    pub fn nof_cces(&self) -> u8 {
        1 << self.index()
    }

    /// Position in per-level tables
    pub fn index(&self) -> usize {
        match self {
            AggregationLevel::N1 => 0,
            AggregationLevel::N2 => 1,
            AggregationLevel::N4 => 2,
            AggregationLevel::N8 => 3,
            AggregationLevel::N16 => 4,
        }
    }
}

/// TDD UL/DL pattern (TS 38.331 TDD-UL-DL-Pattern)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddPattern {
    /// Pattern periodicity in slots
    pub period_slots: u32,
    /// Full DL slots at the start of the period
    pub nof_dl_slots: u32,
    /// DL symbols in the slot following the last full DL slot
    pub nof_dl_symbols: u8,
    /// Full UL slots at the end of the period
    pub nof_ul_slots: u32,
    /// UL symbols at the end of the slot preceding the first full UL slot
    pub nof_ul_symbols: u8,
}

/// PDCCH search space monitoring configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpaceConfig {
    /// Search space id
    pub id: u8,
    /// Monitoring periodicity in slots
    pub period_slots: u32,
    /// Monitoring offset in slots
    pub offset_slots: u32,
    /// Number of consecutive monitored slots per period
    pub duration_slots: u32,
    /// Number of candidates per aggregation level {1, 2, 4, 8, 16}
    pub nof_candidates: [u8; 5],
}

impl SearchSpaceConfig {
    /// Whether PDCCH monitoring is active in the given slot
    pub fn is_monitoring_active(&self, slot: SlotPoint) -> bool {
        let period = self.period_slots.max(1);
        let offset = self.offset_slots % period;
        (slot.count() + period - offset) % period < self.duration_slots
    }

    pub fn nof_candidates(&self, al: AggregationLevel) -> u8 {
        self.nof_candidates[al.index()]
    }
}

/// Entry of the PDSCH time-domain allocation list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdschTimeDomainResource {
    /// Slot offset between PDCCH and PDSCH
    pub k0: u8,
    pub start_symbol: u8,
    pub nof_symbols: u8,
}

impl PdschTimeDomainResource {
    pub fn symbols(&self) -> OfdmSymbolRange {
        OfdmSymbolRange::new(self.start_symbol, self.start_symbol + self.nof_symbols)
    }
}

/// Entry of the PUSCH time-domain allocation list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuschTimeDomainResource {
    /// Slot offset between PDCCH and PUSCH
    pub k2: u8,
    pub start_symbol: u8,
    pub nof_symbols: u8,
}

impl PuschTimeDomainResource {
    pub fn symbols(&self) -> OfdmSymbolRange {
        OfdmSymbolRange::new(self.start_symbol, self.start_symbol + self.nof_symbols)
    }
}

/// SSB burst configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsbConfig {
    /// SSB periodicity in ms (5, 10, 20, 40, 80, 160)
    pub period_ms: u32,
    /// Active beams, bit i set means SSB index i is transmitted (up to 8 beams)
    pub beam_bitmap: u8,
    /// First PRB occupied by the SSB
    pub start_prb: u16,
}

impl Default for SsbConfig {
    fn default() -> Self {
        Self {
            period_ms: 20,
            beam_bitmap: 0b0000_0001,
            start_prb: 64,
        }
    }
}

/// Periodic CSI-RS slots the fallback scheduler keeps clear of PDSCH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiRsConfig {
    pub period_slots: u32,
    pub offset_slots: u32,
}

/// Random access scheduling parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaConfig {
    /// RAR response window length in slots
    pub ra_resp_window_slots: u32,
    pub ra_search_space_id: u8,
    pub rar_mcs: u8,
    pub msg3_mcs: u8,
    pub max_msg3_harq_retxs: u8,
    /// Slots after the PUSCH slot before a missing Msg3 CRC counts as a NACK
    pub msg3_crc_timeout_slots: u32,
    /// DL slots ahead of the current slot considered for RAR scheduling
    pub max_rar_lookahead_slots: u32,
    pub max_rar_attempts_per_slot: u32,
    pub rach_queue_size: usize,
    pub crc_queue_size: usize,
}

impl Default for RaConfig {
    fn default() -> Self {
        Self {
            ra_resp_window_slots: 10,
            ra_search_space_id: 1,
            rar_mcs: 0,
            msg3_mcs: 0,
            max_msg3_harq_retxs: 4,
            msg3_crc_timeout_slots: 8,
            max_rar_lookahead_slots: 0,
            max_rar_attempts_per_slot: 8,
            rach_queue_size: 64,
            crc_queue_size: 256,
        }
    }
}

/// Paging parameters (TS 38.304 clause 7.1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Default paging cycle T in radio frames (32, 64, 128, 256)
    pub default_drx_cycle: u32,
    /// Divisor of the paging cycle, N = T / nof_pf (1, 2, 4, 8, 16)
    pub nof_pf: u32,
    /// Paging frame offset
    pub pf_offset: u32,
    /// Paging occasions per paging frame Ns (1, 2, 4)
    pub nof_po_per_pf: u32,
    pub max_paging_retries: u32,
    pub paging_mcs: u8,
    pub paging_search_space_id: u8,
    pub queue_size: usize,
    pub max_pending_ues: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_drx_cycle: 128,
            nof_pf: 1,
            pf_offset: 0,
            nof_po_per_pf: 1,
            max_paging_retries: 2,
            paging_mcs: 0,
            paging_search_space_id: 1,
            queue_size: 128,
            max_pending_ues: 256,
        }
    }
}

/// SIB1 broadcast parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sib1Config {
    pub payload_bytes: u32,
    /// SIB1 retransmission periodicity in ms (20, 40, 80, 160)
    pub retx_period_ms: u32,
    pub mcs: u8,
    /// Type0-PDCCH offset O (TS 38.213 Table 13-11)
    pub ss0_offset: u32,
    /// Type0-PDCCH M multiplied by two, so M = 1/2 is expressed as 1
    pub ss0_m_x2: u32,
}

impl Default for Sib1Config {
    fn default() -> Self {
        Self {
            payload_bytes: 100,
            retx_period_ms: 20,
            mcs: 5,
            ss0_offset: 0,
            ss0_m_x2: 2,
        }
    }
}

/// One SI message carrying other SIBs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiMessageConfig {
    /// Periodicity T in radio frames (8 .. 512)
    pub period_frames: u32,
    pub payload_bytes: u32,
}

/// System information parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiConfig {
    pub sib1: Sib1Config,
    /// SI window length W in slots
    pub si_window_len_slots: u32,
    pub si_mcs: u8,
    pub other_si_search_space_id: u8,
    pub messages: Vec<SiMessageConfig>,
}

impl Default for SiConfig {
    fn default() -> Self {
        Self {
            sib1: Sib1Config::default(),
            si_window_len_slots: 20,
            si_mcs: 5,
            other_si_search_space_id: 1,
            messages: Vec::new(),
        }
    }
}

/// Fallback UE scheduling parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// ra-ContentionResolutionTimer in subframes (8 .. 64)
    pub conres_timer_subframes: u32,
    pub dl_mcs: u8,
    /// Highest MCS tried to fit non-segmentable content
    pub max_dl_mcs: u8,
    pub ul_mcs: u8,
    pub max_ul_prbs: u16,
    pub max_dl_harq_retxs: u8,
    pub max_ul_harq_retxs: u8,
    pub nof_harq_processes: usize,
    pub harq_ack_timeout_slots: u32,
    /// Candidate k1 values, tried in the listed (descending) order
    pub k1_candidates: Vec<u8>,
    pub max_dl_lookahead_slots: u32,
    pub max_sched_attempts_per_slot: u32,
    pub ue_search_space_ids: Vec<u8>,
    pub event_queue_size: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            conres_timer_subframes: 64,
            dl_mcs: 5,
            max_dl_mcs: 9,
            ul_mcs: 5,
            max_ul_prbs: 32,
            max_dl_harq_retxs: 4,
            max_ul_harq_retxs: 4,
            nof_harq_processes: 8,
            harq_ack_timeout_slots: 8,
            k1_candidates: vec![8, 7, 6, 5, 4],
            max_dl_lookahead_slots: 10,
            max_sched_attempts_per_slot: 8,
            ue_search_space_ids: vec![1],
            event_queue_size: 512,
        }
    }
}

/// Complete scheduling configuration of one cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellSchedConfig {
    pub cell_id: CellId,
    pub scs: SubcarrierSpacing,
    pub bandwidth: Bandwidth,
    /// Overrides the PRB count derived from bandwidth and SCS
    pub nof_prbs: Option<u16>,
    /// TDD pattern; FDD when absent
    pub tdd: Option<TddPattern>,
    pub coreset0_index: u8,
    pub common_aggregation_level: AggregationLevel,
    pub search_spaces: Vec<SearchSpaceConfig>,
    pub pdsch_time_domain: Vec<PdschTimeDomainResource>,
    pub pusch_time_domain: Vec<PuschTimeDomainResource>,
    /// PRBs reserved for PUCCH at each edge of the UL band
    pub pucch_guard_prbs: u16,
    pub ssb: SsbConfig,
    pub csi_rs: Option<CsiRsConfig>,
    pub ra: RaConfig,
    pub paging: PagingConfig,
    pub si: SiConfig,
    pub fallback: FallbackConfig,
}

impl Default for CellSchedConfig {
    fn default() -> Self {
        Self {
            cell_id: CellId(1),
            scs: SubcarrierSpacing::Scs15,
            bandwidth: Bandwidth::Bw20,
            nof_prbs: None,
            tdd: None,
            coreset0_index: 8,
            common_aggregation_level: AggregationLevel::N4,
            search_spaces: vec![
                SearchSpaceConfig {
                    id: 0,
                    period_slots: 1,
                    offset_slots: 0,
                    duration_slots: 1,
                    nof_candidates: [0, 0, 4, 2, 1],
                },
                SearchSpaceConfig {
                    id: 1,
                    period_slots: 1,
                    offset_slots: 0,
                    duration_slots: 1,
                    nof_candidates: [0, 0, 4, 2, 1],
                },
            ],
            pdsch_time_domain: vec![
                PdschTimeDomainResource { k0: 0, start_symbol: 2, nof_symbols: 12 },
                PdschTimeDomainResource { k0: 0, start_symbol: 2, nof_symbols: 6 },
            ],
            pusch_time_domain: vec![
                PuschTimeDomainResource { k2: 4, start_symbol: 0, nof_symbols: 14 },
                PuschTimeDomainResource { k2: 5, start_symbol: 0, nof_symbols: 14 },
                PuschTimeDomainResource { k2: 6, start_symbol: 0, nof_symbols: 14 },
            ],
            pucch_guard_prbs: 2,
            ssb: SsbConfig::default(),
            csi_rs: None,
            ra: RaConfig::default(),
            paging: PagingConfig::default(),
            si: SiConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> LayerError {
    LayerError::InvalidConfiguration(msg.into())
}

impl CellSchedConfig {
    /// Duplex mode implied by the presence of a TDD pattern
    pub fn duplex_mode(&self) -> DuplexMode {
        if self.tdd.is_some() {
            DuplexMode::Tdd
        } else {
            DuplexMode::Fdd
        }
    }

    /// Number of PRBs of the carrier
    pub fn carrier_nof_prbs(&self) -> u16 {
        self.nof_prbs
            .unwrap_or_else(|| calculate_nrb(self.bandwidth.as_hz(), self.scs.khz()))
    }

    /// Msg3 PUSCH slot delay (TS 38.214 Table 6.1.2.1.1-5)
    pub fn msg3_delta(&self) -> u32 {
        match self.scs.numerology() {
            0 => 2,
            1 => 3,
            2 => 4,
            _ => 6,
        }
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), LayerError> {
        let nof_prbs = self.carrier_nof_prbs();
        let slots_per_frame = time::slots_per_frame(self.scs);
        let ring = RING_ALLOCATOR_SIZE as u32;

        if nof_prbs == 0 || nof_prbs > 275 {
            return Err(invalid(format!("Invalid number of PRBs: {}", nof_prbs)));
        }

        let coreset0 = Coreset0Config::from_index(self.coreset0_index)?;
        if coreset0.rb_offset + coreset0.num_rbs > nof_prbs as u32 {
            return Err(invalid(format!(
                "CORESET#0 index {} does not fit in {} PRBs",
                self.coreset0_index, nof_prbs
            )));
        }

        if let Some(tdd) = &self.tdd {
            if tdd.period_slots == 0 || (2 * slots_per_frame) % tdd.period_slots != 0 {
                return Err(invalid(format!("Invalid TDD period: {} slots", tdd.period_slots)));
            }
            let special = u32::from(tdd.nof_dl_symbols > 0 || tdd.nof_ul_symbols > 0);
            if tdd.nof_dl_slots + tdd.nof_ul_slots + special > tdd.period_slots
                || tdd.nof_dl_symbols + tdd.nof_ul_symbols > NOF_OFDM_SYMBOLS_PER_SLOT
            {
                return Err(invalid("TDD pattern exceeds its period"));
            }
            if tdd.nof_dl_slots == 0 || tdd.nof_ul_slots == 0 {
                return Err(invalid("TDD pattern needs at least one full DL and one full UL slot"));
            }
        }

        for id in [
            self.ra.ra_search_space_id,
            self.paging.paging_search_space_id,
            self.si.other_si_search_space_id,
            0,
        ]
        .iter()
        .chain(self.fallback.ue_search_space_ids.iter())
        {
            if !self.search_spaces.iter().any(|ss| ss.id == *id) {
                return Err(invalid(format!("Unknown search space id {}", id)));
            }
        }
        if self.fallback.ue_search_space_ids.is_empty() {
            return Err(invalid("Fallback scheduler needs at least one search space"));
        }

        if self.pdsch_time_domain.is_empty() || self.pusch_time_domain.is_empty() {
            return Err(invalid("Empty PDSCH or PUSCH time-domain list"));
        }
        for td in &self.pdsch_time_domain {
            if (td.start_symbol as u32) < coreset0.num_symbols
                || td.nof_symbols == 0
                || td.start_symbol + td.nof_symbols > NOF_OFDM_SYMBOLS_PER_SLOT
            {
                return Err(invalid(format!("Invalid PDSCH time-domain resource {:?}", td)));
            }
        }
        if !self.pdsch_time_domain.iter().any(|td| td.k0 == 0) {
            return Err(invalid("Common PDSCH needs a time-domain resource with k0 = 0"));
        }
        for td in &self.pusch_time_domain {
            if td.nof_symbols == 0 || td.start_symbol + td.nof_symbols > NOF_OFDM_SYMBOLS_PER_SLOT {
                return Err(invalid(format!("Invalid PUSCH time-domain resource {:?}", td)));
            }
        }

        let max_k0 = self.pdsch_time_domain.iter().map(|td| td.k0 as u32).max().unwrap_or(0);
        let max_k2 = self.pusch_time_domain.iter().map(|td| td.k2 as u32).max().unwrap_or(0);
        let max_k1 = self.fallback.k1_candidates.iter().map(|k| *k as u32).max().unwrap_or(0);
        if self.ra.max_rar_lookahead_slots + max_k2 + self.msg3_delta() >= ring {
            return Err(invalid("Msg3 slot beyond the resource grid horizon"));
        }
        if self.fallback.max_dl_lookahead_slots + max_k0 + max_k1 >= ring
            || max_k2 >= super::ue_fallback::SR_SCHEDULE_AHEAD_SLOTS
        {
            return Err(invalid("Fallback scheduling beyond the resource grid horizon"));
        }
        if self.fallback.k1_candidates.is_empty() {
            return Err(invalid("Empty k1 candidate list"));
        }
        if self.fallback.max_dl_lookahead_slots as usize >= super::ue_fallback::NEG_CACHE_WINDOW {
            return Err(invalid("DL lookahead exceeds the negative cache window"));
        }

        if self.pucch_guard_prbs == 0 || 2 * self.pucch_guard_prbs >= nof_prbs {
            return Err(invalid(format!("Invalid PUCCH guard: {} PRBs", self.pucch_guard_prbs)));
        }
        if self.ssb.start_prb + super::ssb::SSB_NOF_PRBS > nof_prbs {
            return Err(invalid("SSB does not fit in the carrier"));
        }
        if ![5, 10, 20, 40, 80, 160].contains(&self.ssb.period_ms) {
            return Err(invalid(format!("Invalid SSB period: {} ms", self.ssb.period_ms)));
        }
        if self.ssb.beam_bitmap == 0 {
            return Err(invalid("No active SSB beam"));
        }

        if ![20, 40, 80, 160].contains(&self.si.sib1.retx_period_ms) {
            return Err(invalid(format!("Invalid SIB1 period: {} ms", self.si.sib1.retx_period_ms)));
        }
        if ![1, 2, 4].contains(&self.si.sib1.ss0_m_x2) {
            return Err(invalid("Type0-PDCCH M must be 1/2, 1 or 2"));
        }
        let window = self.si.si_window_len_slots;
        for (index, msg) in self.si.messages.iter().enumerate() {
            if window == 0 || msg.period_frames == 0 {
                return Err(invalid("SI window length and periodicity must be positive"));
            }
            let x = index as u32 * window;
            if x / slots_per_frame >= msg.period_frames || window > msg.period_frames * slots_per_frame {
                return Err(invalid(format!(
                    "SI message {} window does not fit in its period of {} frames",
                    index + 1,
                    msg.period_frames
                )));
            }
        }

        if !PAGING_DRX_CYCLES.contains(&self.paging.default_drx_cycle) {
            return Err(invalid(format!("Invalid paging DRX cycle: {}", self.paging.default_drx_cycle)));
        }
        if ![1, 2, 4, 8, 16].contains(&self.paging.nof_pf)
            || ![1, 2, 4].contains(&self.paging.nof_po_per_pf)
            || self.paging.max_paging_retries == 0
        {
            return Err(invalid("Invalid paging frame/occasion configuration"));
        }
        if slots_per_frame % self.paging.nof_po_per_pf != 0 {
            return Err(invalid("Paging occasions must divide the frame"));
        }

        if self.ra.rach_queue_size == 0
            || self.ra.crc_queue_size == 0
            || self.paging.queue_size == 0
            || self.fallback.event_queue_size == 0
        {
            return Err(invalid("Indication queue sizes must be positive"));
        }
        if self.fallback.max_dl_mcs < self.fallback.dl_mcs {
            return Err(invalid("Maximum fallback DL MCS below the default MCS"));
        }
        Ok(())
    }
}

/// Validated cell configuration with derived values
#[derive(Debug, Clone)]
pub struct CellConfiguration {
    pub params: CellSchedConfig,
    pub nof_prbs: u16,
    pub coreset0: Coreset0Config,
}

impl CellConfiguration {
    pub fn new(params: CellSchedConfig) -> Result<Self, LayerError> {
        params.validate()?;
        let coreset0 = Coreset0Config::from_index(params.coreset0_index)?;
        Ok(Self {
            nof_prbs: params.carrier_nof_prbs(),
            coreset0,
            params,
        })
    }

    pub fn numerology(&self) -> u8 {
        self.params.scs.numerology()
    }

    pub fn slots_per_frame(&self) -> u32 {
        time::slots_per_frame(self.params.scs)
    }

    pub fn slots_per_subframe(&self) -> u32 {
        time::slots_per_subframe(self.params.scs)
    }

    pub fn search_space(&self, id: u8) -> Option<&SearchSpaceConfig> {
        self.params.search_spaces.iter().find(|ss| ss.id == id)
    }

    /// DL symbols available in the slot (counted from symbol 0)
    pub fn nof_dl_symbols(&self, slot: SlotPoint) -> u8 {
        match &self.params.tdd {
            None => NOF_OFDM_SYMBOLS_PER_SLOT,
            Some(tdd) => {
                let idx = slot.count() % tdd.period_slots;
                if idx < tdd.nof_dl_slots {
                    NOF_OFDM_SYMBOLS_PER_SLOT
                } else if idx == tdd.nof_dl_slots {
                    tdd.nof_dl_symbols
                } else {
                    0
                }
            }
        }
    }

    /// UL symbols available in the slot (counted back from the last symbol)
    pub fn nof_ul_symbols(&self, slot: SlotPoint) -> u8 {
        match &self.params.tdd {
            None => NOF_OFDM_SYMBOLS_PER_SLOT,
            Some(tdd) => {
                let idx = slot.count() % tdd.period_slots;
                let first_ul = tdd.period_slots - tdd.nof_ul_slots;
                if idx >= first_ul {
                    NOF_OFDM_SYMBOLS_PER_SLOT
                } else if idx + 1 == first_ul {
                    tdd.nof_ul_symbols
                } else {
                    0
                }
            }
        }
    }

    pub fn is_dl_enabled(&self, slot: SlotPoint) -> bool {
        self.nof_dl_symbols(slot) > 0
    }

    pub fn is_ul_enabled(&self, slot: SlotPoint) -> bool {
        self.nof_ul_symbols(slot) > 0
    }

    pub fn is_fully_ul_enabled(&self, slot: SlotPoint) -> bool {
        self.nof_ul_symbols(slot) == NOF_OFDM_SYMBOLS_PER_SLOT
    }

    /// Whether a PDSCH occupying `symbols` fits the DL part of the slot
    pub fn pdsch_fits(&self, slot: SlotPoint, symbols: OfdmSymbolRange) -> bool {
        symbols.start >= self.coreset0.num_symbols as u8 && symbols.stop <= self.nof_dl_symbols(slot)
    }

    /// Whether a PUSCH occupying `symbols` fits the UL part of the slot
    pub fn pusch_fits(&self, slot: SlotPoint, symbols: OfdmSymbolRange) -> bool {
        let nof_ul = self.nof_ul_symbols(slot);
        nof_ul > 0 && symbols.start >= NOF_OFDM_SYMBOLS_PER_SLOT - nof_ul
    }

    pub fn is_csi_rs_slot(&self, slot: SlotPoint) -> bool {
        match &self.params.csi_rs {
            None => false,
            Some(csi) => {
                let period = csi.period_slots.max(1);
                (slot.count() + period - csi.offset_slots % period) % period == 0
            }
        }
    }

    /// PRBs of the initial DL BWP, which spans CORESET#0
    pub fn dl_bwp_prbs(&self) -> PrbInterval {
        self.coreset0_prbs()
    }

    /// PRBs usable for PUSCH, PUCCH guard bands excluded
    pub fn pusch_prbs(&self) -> PrbInterval {
        let guard = self.params.pucch_guard_prbs;
        PrbInterval::new(guard, self.nof_prbs - guard)
    }

    /// PRBs spanned by CORESET#0
    pub fn coreset0_prbs(&self) -> PrbInterval {
        let start = self.coreset0.rb_offset as u16;
        PrbInterval::new(start, start + self.coreset0.num_rbs as u16)
    }
}
