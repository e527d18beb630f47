//! Fallback UE Context
//!
//! State the UE fallback scheduler keeps per UE between Msg3 reception and
//! the end of fallback mode: contention resolution progress, SRB0/SRB1 DL
//! buffers, UL demand and one HARQ entity per direction.

use super::config::FallbackConfig;
use super::harq::HarqEntity;
use super::indications::{DuUeIndex, FallbackLcid, SrConfig};
use super::sched_result::{DlContent, OfdmSymbolRange, PrbInterval};
use common::types::Rnti;
use common::SlotPoint;
use serde::Serialize;

/// Contention Resolution CE: one-byte subheader plus 48-bit UE identity
pub const CONRES_CE_BYTES: u32 = 7;

/// MAC subheader of an SRB SDU with a 16-bit length field
pub const MAC_SDU_SUBHEADER_BYTES: u32 = 3;

/// Smallest useful SRB1 segment, including RLC and PDCP headers
pub const MIN_SRB1_SEGMENT_BYTES: u32 = 8;

/// Smallest UL grant, enough for a long BSR
pub const MIN_UL_GRANT_BYTES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConResState {
    /// CE not yet transmitted; the UE is dropped at `deadline`
    AwaitingCe { deadline: SlotPoint },
    /// CE transmitted on `harq_id`, waiting for its HARQ-ACK
    CeSent { deadline: SlotPoint, harq_id: u8 },
    Resolved,
}

/// Parameters of a fallback PDSCH transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlHarqParams {
    pub content: DlContent,
    pub prbs: PrbInterval,
    pub symbols: OfdmSymbolRange,
    pub nof_dmrs_symbols: u8,
    pub td_index: u8,
    pub mcs: u8,
    pub tbs_bytes: u32,
}

/// Parameters of a fallback PUSCH transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlHarqParams {
    pub prbs: PrbInterval,
    pub symbols: OfdmSymbolRange,
    pub nof_dmrs_symbols: u8,
    pub td_index: u8,
    pub mcs: u8,
    pub tbs_bytes: u32,
}

/// DL content the UE is eligible for, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DlNewTxKind {
    ConResCe,
    Srb0,
    Srb1,
}

#[derive(Debug)]
pub struct FallbackUe {
    pub ue_index: DuUeIndex,
    pub crnti: Rnti,
    pub conres: ConResState,
    /// Set by the upper layer once the CE content is known
    pub conres_ce_pending: bool,
    pub srb0_bytes: u32,
    pub srb1_bytes: u32,
    pub ul_pending_bytes: u32,
    pub sr_pending: bool,
    pub sr_config: Option<SrConfig>,
    pub dl_harq: HarqEntity<DlHarqParams>,
    pub ul_harq: HarqEntity<UlHarqParams>,
    pub last_pdsch_slot: Option<SlotPoint>,
    pub last_ack_slot: Option<SlotPoint>,
    pub last_pusch_slot: Option<SlotPoint>,
}

impl FallbackUe {
    pub fn new(
        ue_index: DuUeIndex,
        crnti: Rnti,
        conres_deadline: SlotPoint,
        sr_config: Option<SrConfig>,
        cfg: &FallbackConfig,
    ) -> Self {
        Self {
            ue_index,
            crnti,
            conres: ConResState::AwaitingCe { deadline: conres_deadline },
            conres_ce_pending: false,
            srb0_bytes: 0,
            srb1_bytes: 0,
            ul_pending_bytes: 0,
            sr_pending: false,
            sr_config,
            dl_harq: HarqEntity::new(cfg.nof_harq_processes, cfg.harq_ack_timeout_slots),
            ul_harq: HarqEntity::new(cfg.nof_harq_processes, cfg.harq_ack_timeout_slots),
            last_pdsch_slot: None,
            last_ack_slot: None,
            last_pusch_slot: None,
        }
    }

    pub fn is_conres_complete(&self) -> bool {
        self.conres == ConResState::Resolved
    }

    pub fn set_buffer_state(&mut self, lcid: FallbackLcid, bytes: u32) {
        match lcid {
            FallbackLcid::Srb0 => self.srb0_bytes = bytes,
            FallbackLcid::Srb1 => self.srb1_bytes = bytes,
        }
    }

    /// Highest priority DL content waiting for a new transmission
    pub fn next_dl_newtx(&self) -> Option<DlNewTxKind> {
        match self.conres {
            ConResState::AwaitingCe { .. } if self.conres_ce_pending => Some(DlNewTxKind::ConResCe),
            ConResState::Resolved if self.srb0_bytes > 0 => Some(DlNewTxKind::Srb0),
            ConResState::Resolved if self.srb1_bytes > 0 => Some(DlNewTxKind::Srb1),
            _ => None,
        }
    }

    pub fn has_pending_dl_newtx(&self) -> bool {
        self.next_dl_newtx().is_some()
    }

    pub fn has_pending_ul(&self) -> bool {
        self.ul_pending_bytes > 0 || self.sr_pending || self.ul_harq.has_pending_retx()
    }

    pub fn has_dl_harq_in_flight(&self) -> bool {
        !self.dl_harq.all_empty()
    }

    /// Account for content placed in a new transmission of `tbs_bytes`
    pub fn consume_dl(&mut self, kind: DlNewTxKind, tbs_bytes: u32) -> DlContent {
        match kind {
            DlNewTxKind::ConResCe => {
                self.conres_ce_pending = false;
                DlContent::ConRes
            }
            DlNewTxKind::Srb0 => {
                let bytes = std::mem::take(&mut self.srb0_bytes);
                DlContent::Srb0 { bytes }
            }
            DlNewTxKind::Srb1 => {
                let bytes = tbs_bytes.saturating_sub(MAC_SDU_SUBHEADER_BYTES).min(self.srb1_bytes);
                self.srb1_bytes -= bytes;
                DlContent::Srb1 { bytes }
            }
        }
    }
}

/// Bytes a new transmission of `kind` must carry at minimum, and whether the
/// content may be segmented
pub fn dl_payload_bytes(ue: &FallbackUe, kind: DlNewTxKind) -> (u32, bool) {
    match kind {
        DlNewTxKind::ConResCe => (CONRES_CE_BYTES, false),
        DlNewTxKind::Srb0 => (ue.srb0_bytes + MAC_SDU_SUBHEADER_BYTES, false),
        DlNewTxKind::Srb1 => (ue.srb1_bytes + MAC_SDU_SUBHEADER_BYTES, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ue() -> FallbackUe {
        FallbackUe::new(
            DuUeIndex(0),
            Rnti(0x4601),
            SlotPoint::from_count(0, 64),
            None,
            &FallbackConfig::default(),
        )
    }

    #[test]
    fn test_srbs_wait_for_conres() {
        let mut ue = ue();
        ue.set_buffer_state(FallbackLcid::Srb0, 20);
        ue.set_buffer_state(FallbackLcid::Srb1, 100);
        assert_eq!(ue.next_dl_newtx(), None);
        ue.conres_ce_pending = true;
        assert_eq!(ue.next_dl_newtx(), Some(DlNewTxKind::ConResCe));
        ue.conres = ConResState::Resolved;
        assert_eq!(ue.next_dl_newtx(), Some(DlNewTxKind::Srb0));
        assert_eq!(ue.consume_dl(DlNewTxKind::Srb0, 40), DlContent::Srb0 { bytes: 20 });
        assert_eq!(ue.next_dl_newtx(), Some(DlNewTxKind::Srb1));
    }

    #[test]
    fn test_srb1_segmentation() {
        let mut ue = ue();
        ue.conres = ConResState::Resolved;
        ue.set_buffer_state(FallbackLcid::Srb1, 100);
        assert_eq!(dl_payload_bytes(&ue, DlNewTxKind::Srb1), (103, true));
        assert_eq!(ue.consume_dl(DlNewTxKind::Srb1, 43), DlContent::Srb1 { bytes: 40 });
        assert_eq!(ue.srb1_bytes, 60);
        assert_eq!(ue.consume_dl(DlNewTxKind::Srb1, 200), DlContent::Srb1 { bytes: 60 });
        assert!(!ue.has_pending_dl_newtx());
    }
}
