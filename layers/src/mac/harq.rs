//! HARQ Process Ledger
//!
//! Fixed-capacity HARQ entities shared by the Msg3 and fallback UE
//! schedulers. A process remembers the parameters of its last transmission so
//! that retransmissions can reuse them, and a missing feedback past the
//! configured timeout counts as a NACK.

use super::sched_result::DciHarq;
use common::SlotPoint;
use tracing::trace;

/// Redundancy version sequence (TS 38.214 clause 5.1.2.1)
pub const RV_SEQUENCE: [u8; 4] = [0, 2, 3, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqState {
    Empty,
    WaitingAck,
    PendingRetx,
}

/// Result of applying feedback to a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqAckOutcome {
    Acked,
    Nacked,
    /// NACK with the retransmission budget exhausted; process released
    NackedMaxRetx,
    /// No transmission was awaiting feedback
    Ignored,
}

/// One HARQ process carrying parameters `P` of its last transmission
#[derive(Debug, Clone)]
pub struct HarqProcess<P> {
    id: u8,
    state: HarqState,
    ndi: bool,
    nof_retxs: u8,
    max_retxs: u8,
    ack_timeout_slots: u32,
    ack_slot: Option<SlotPoint>,
    params: Option<P>,
}

impl<P> HarqProcess<P> {
    pub fn new(id: u8, ack_timeout_slots: u32) -> Self {
        Self {
            id,
            state: HarqState::Empty,
            ndi: false,
            nof_retxs: 0,
            max_retxs: 0,
            ack_timeout_slots,
            ack_slot: None,
            params: None,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn state(&self) -> HarqState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.state == HarqState::Empty
    }

    pub fn has_pending_retx(&self) -> bool {
        self.state == HarqState::PendingRetx
    }

    pub fn nof_retxs(&self) -> u8 {
        self.nof_retxs
    }

    /// Slot where feedback for the last transmission is expected
    pub fn ack_slot(&self) -> Option<SlotPoint> {
        self.ack_slot
    }

    /// Parameters of the last transmission
    pub fn params(&self) -> Option<&P> {
        self.params.as_ref()
    }

    pub fn rv(&self) -> u8 {
        RV_SEQUENCE[self.nof_retxs as usize % RV_SEQUENCE.len()]
    }

    pub fn dci_harq(&self) -> DciHarq {
        DciHarq {
            harq_id: self.id,
            ndi: self.ndi,
            rv: self.rv(),
        }
    }

    /// Start a new transmission; the process must be empty
    pub fn new_tx(&mut self, ack_slot: SlotPoint, max_retxs: u8, params: P) {
        debug_assert!(self.is_empty(), "new tx on busy HARQ {}", self.id);
        self.state = HarqState::WaitingAck;
        self.ndi = !self.ndi;
        self.nof_retxs = 0;
        self.max_retxs = max_retxs;
        self.ack_slot = Some(ack_slot);
        self.params = Some(params);
    }

    /// Start a retransmission; the process must have a pending NACK
    pub fn new_retx(&mut self, ack_slot: SlotPoint) {
        debug_assert!(self.has_pending_retx(), "retx on HARQ {} without NACK", self.id);
        self.state = HarqState::WaitingAck;
        self.nof_retxs += 1;
        self.ack_slot = Some(ack_slot);
    }

    /// Retransmission with updated transmission parameters
    pub fn new_retx_with(&mut self, ack_slot: SlotPoint, params: P) {
        self.new_retx(ack_slot);
        self.params = Some(params);
    }

    /// Apply HARQ feedback. Feedback arriving while no transmission waits for
    /// it is ignored, so repeated NACKs never change the process twice.
    pub fn ack_info(&mut self, ack: bool) -> HarqAckOutcome {
        if self.state != HarqState::WaitingAck {
            return HarqAckOutcome::Ignored;
        }
        if ack {
            self.reset();
            HarqAckOutcome::Acked
        } else if self.nof_retxs >= self.max_retxs {
            self.reset();
            HarqAckOutcome::NackedMaxRetx
        } else {
            self.state = HarqState::PendingRetx;
            HarqAckOutcome::Nacked
        }
    }

    /// Timeout handling; returns the outcome if feedback was overdue
    pub fn slot_indication(&mut self, slot: SlotPoint) -> Option<HarqAckOutcome> {
        match (self.state, self.ack_slot) {
            (HarqState::WaitingAck, Some(ack_slot)) if slot - ack_slot > self.ack_timeout_slots as i32 => {
                trace!("HARQ {} feedback timeout at {} (expected {})", self.id, slot, ack_slot);
                Some(self.ack_info(false))
            }
            _ => None,
        }
    }

    /// Release the process; the last parameters stay readable until the next
    /// new transmission
    pub fn reset(&mut self) {
        self.state = HarqState::Empty;
        self.ack_slot = None;
    }
}

/// Set of HARQ processes of one UE and direction
#[derive(Debug, Clone)]
pub struct HarqEntity<P> {
    procs: Vec<HarqProcess<P>>,
}

impl<P> HarqEntity<P> {
    pub fn new(nof_procs: usize, ack_timeout_slots: u32) -> Self {
        Self {
            procs: (0..nof_procs)
                .map(|id| HarqProcess::new(id as u8, ack_timeout_slots))
                .collect(),
        }
    }

    pub fn nof_procs(&self) -> usize {
        self.procs.len()
    }

    pub fn find_empty(&self) -> Option<u8> {
        self.procs.iter().find(|h| h.is_empty()).map(|h| h.id)
    }

    pub fn find_pending_retx(&self) -> Option<u8> {
        self.procs.iter().find(|h| h.has_pending_retx()).map(|h| h.id)
    }

    pub fn has_pending_retx(&self) -> bool {
        self.procs.iter().any(|h| h.has_pending_retx())
    }

    pub fn all_empty(&self) -> bool {
        self.procs.iter().all(|h| h.is_empty())
    }

    pub fn get(&self, id: u8) -> Option<&HarqProcess<P>> {
        self.procs.get(id as usize)
    }

    pub fn get_mut(&mut self, id: u8) -> Option<&mut HarqProcess<P>> {
        self.procs.get_mut(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HarqProcess<P>> {
        self.procs.iter()
    }

    /// Run feedback timeouts, reporting each overdue process to `on_timeout`
    pub fn slot_indication<F>(&mut self, slot: SlotPoint, mut on_timeout: F)
    where
        F: FnMut(&HarqProcess<P>, HarqAckOutcome),
    {
        for h in self.procs.iter_mut() {
            if let Some(outcome) = h.slot_indication(slot) {
                on_timeout(h, outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(n: u32) -> SlotPoint {
        SlotPoint::from_count(0, n)
    }

    #[test]
    fn test_rv_sequence_and_ndi() {
        let mut h: HarqProcess<u32> = HarqProcess::new(0, 4);
        h.new_tx(slot(10), 3, 100);
        let first_ndi = h.dci_harq().ndi;
        assert_eq!(h.rv(), 0);
        assert_eq!(h.ack_info(false), HarqAckOutcome::Nacked);
        h.new_retx(slot(20));
        assert_eq!(h.rv(), 2);
        assert_eq!(h.dci_harq().ndi, first_ndi);
        assert_eq!(h.params(), Some(&100));
        assert_eq!(h.ack_info(true), HarqAckOutcome::Acked);
        h.new_tx(slot(30), 3, 5);
        assert_ne!(h.dci_harq().ndi, first_ndi);
    }

    #[test]
    fn test_repeated_nack_is_idempotent() {
        let mut h: HarqProcess<()> = HarqProcess::new(0, 4);
        h.new_tx(slot(10), 4, ());
        assert_eq!(h.ack_info(false), HarqAckOutcome::Nacked);
        assert_eq!(h.ack_info(false), HarqAckOutcome::Ignored);
        assert_eq!(h.nof_retxs(), 0);
        assert!(h.has_pending_retx());
    }

    #[test]
    fn test_max_retx_releases_process() {
        let mut h: HarqProcess<()> = HarqProcess::new(0, 4);
        h.new_tx(slot(0), 1, ());
        assert_eq!(h.ack_info(false), HarqAckOutcome::Nacked);
        h.new_retx(slot(8));
        assert_eq!(h.ack_info(false), HarqAckOutcome::NackedMaxRetx);
        assert!(h.is_empty());
    }

    #[test]
    fn test_timeout_counts_as_nack() {
        let mut entity: HarqEntity<()> = HarqEntity::new(8, 4);
        let id = entity.find_empty().unwrap();
        entity.get_mut(id).unwrap().new_tx(slot(10), 2, ());
        let mut timeouts = Vec::new();
        entity.slot_indication(slot(14), |h, o| timeouts.push((h.id(), o)));
        assert!(timeouts.is_empty());
        entity.slot_indication(slot(15), |h, o| timeouts.push((h.id(), o)));
        assert_eq!(timeouts, vec![(id, HarqAckOutcome::Nacked)]);
        assert_eq!(entity.find_pending_retx(), Some(id));
        assert_eq!(entity.find_empty(), Some(1));
    }
}
