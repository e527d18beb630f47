//! Scheduler Input Indications
//!
//! Events delivered to the cell scheduler from PHY and upper layers, and the
//! bounded queues that carry them. Producers never block: when a queue is full
//! the newest indication is dropped and logged. The scheduler drains each queue
//! at the start of its slot tick.

use super::sched_result::PagingUeIdentity;
use crate::LayerError;
use common::types::Rnti;
use common::SlotPoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// DU-local UE index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DuUeIndex(pub u16);

impl fmt::Display for DuUeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ue{}", self.0)
    }
}

/// Preamble detected in a PRACH occasion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPreamble {
    pub preamble_id: u8,
    /// Timing advance command (TA units)
    pub timing_advance: u16,
    /// TC-RNTI assigned by the DU to this preamble
    pub tc_rnti: Rnti,
}

/// One PRACH occasion with its detected preambles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RachOccasion {
    /// First OFDM symbol of the occasion, s_id in [0, 14)
    pub start_symbol: u8,
    /// Slot index of the occasion within the frame, t_id in [0, 80)
    pub slot_index: u8,
    /// Frequency domain occasion index, f_id in [0, 8)
    pub frequency_index: u8,
    pub preambles: Vec<DetectedPreamble>,
}

/// PRACH detection report for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RachIndication {
    pub slot_rx: SlotPoint,
    /// Occasion on the supplementary UL carrier
    pub is_sul: bool,
    pub occasions: Vec<RachOccasion>,
}

/// CRC result of a PUSCH transport block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlCrcIndication {
    pub slot_rx: SlotPoint,
    pub rnti: Rnti,
    /// Absent for Msg3, whose UE does not exist yet
    pub ue_index: Option<DuUeIndex>,
    pub harq_id: u8,
    pub tb_crc_ok: bool,
}

/// Paging request from the upper layers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingInformation {
    pub identity: PagingUeIdentity,
    /// UE_ID = 5G-S-TMSI mod 1024
    pub ue_identity_index: u32,
    /// UE specific DRX cycle in radio frames
    pub paging_drx: Option<u32>,
}

/// Dedicated SR resource of a fallback UE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrConfig {
    pub period_slots: u32,
    pub offset_slots: u32,
    pub pucch_resource_id: u8,
}

impl SrConfig {
    pub fn is_sr_slot(&self, slot: SlotPoint) -> bool {
        let period = self.period_slots.max(1);
        slot.count() % period == self.offset_slots % period
    }
}

/// Logical channels served in fallback mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackLcid {
    Srb0,
    Srb1,
}

/// Events for the UE fallback scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackEvent {
    /// UE created after Msg3 reception
    AddUe {
        ue_index: DuUeIndex,
        crnti: Rnti,
        msg3_slot: SlotPoint,
        sr_config: Option<SrConfig>,
    },
    /// Contention Resolution CE must be sent
    ConResPending { ue_index: DuUeIndex },
    /// DL buffer occupancy of an SRB
    DlBufferState {
        ue_index: DuUeIndex,
        lcid: FallbackLcid,
        bytes: u32,
    },
    /// Buffer status report, one byte count per logical channel group
    UlBsr {
        ue_index: DuUeIndex,
        lcg_bytes: Vec<u32>,
    },
    SchedulingRequest { ue_index: DuUeIndex },
    /// HARQ-ACK received on PUCCH
    DlHarqAck {
        ue_index: DuUeIndex,
        harq_id: u8,
        ack: bool,
    },
    UlCrc(UlCrcIndication),
    /// Full configuration applied, UE leaves fallback
    ExitFallback { ue_index: DuUeIndex },
    RemoveUe { ue_index: DuUeIndex },
}

impl FallbackEvent {
    pub fn ue_index(&self) -> Option<DuUeIndex> {
        match self {
            FallbackEvent::AddUe { ue_index, .. }
            | FallbackEvent::ConResPending { ue_index }
            | FallbackEvent::DlBufferState { ue_index, .. }
            | FallbackEvent::UlBsr { ue_index, .. }
            | FallbackEvent::SchedulingRequest { ue_index }
            | FallbackEvent::DlHarqAck { ue_index, .. }
            | FallbackEvent::ExitFallback { ue_index }
            | FallbackEvent::RemoveUe { ue_index } => Some(*ue_index),
            FallbackEvent::UlCrc(crc) => crc.ue_index,
        }
    }
}

/// Producer side of an indication queue
#[derive(Debug)]
pub struct IndicationSender<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T> Clone for IndicationSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T> IndicationSender<T> {
    /// Enqueue without blocking; a full queue drops `item`
    pub fn push(&self, item: T) -> Result<(), LayerError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("{} queue full, dropping indication", self.name);
                Err(LayerError::ResourceUnavailable)
            }
            Err(TrySendError::Closed(_)) => {
                Err(LayerError::InvalidState(format!("{} queue closed", self.name)))
            }
        }
    }
}

/// Consumer side of an indication queue
#[derive(Debug)]
pub struct IndicationReceiver<T> {
    name: &'static str,
    capacity: usize,
    rx: mpsc::Receiver<T>,
}

impl<T> IndicationReceiver<T> {
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Pop at most one queue capacity worth of indications
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while items.len() < self.capacity {
            match self.try_next() {
                Some(item) => items.push(item),
                None => return items,
            }
        }
        debug!("{} queue: {} indications taken, rest left for the next slot", self.name, items.len());
        items
    }
}

/// Create a bounded indication queue
pub fn indication_queue<T>(name: &'static str, capacity: usize) -> (IndicationSender<T>, IndicationReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        IndicationSender { name, tx },
        IndicationReceiver { name, capacity: capacity.max(1), rx },
    )
}
