//! Synthetic PHY and Upper-Layer Load
//!
//! Plays the part of the PHY (PRACH detections, CRCs and HARQ-ACKs derived
//! from the scheduled grants) and of RRC (UE creation after Msg3, SRB
//! traffic and fallback exit) around one cell scheduler.

use crate::config::TrafficConfig;
use common::types::Rnti;
use common::SlotPoint;
use layers::mac::sched_result::{DlContent, PagingUeIdentity, PuschKind};
use layers::mac::{
    CellSchedulerHandle, DetectedPreamble, DuUeIndex, FallbackEvent, FallbackLcid, Msg3Reception,
    PagingInformation, RachIndication, RachOccasion, SlotResult, UlCrcIndication,
};
use layers::LayerError;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Indication that reaches the scheduler at `due`
#[derive(Debug)]
enum Feedback {
    Crc(UlCrcIndication),
    Fallback(FallbackEvent),
}

#[derive(Debug)]
struct SimUe {
    ue_index: DuUeIndex,
    created: SlotPoint,
    rrc_setup_sent: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TrafficStats {
    pub nof_prach: u64,
    pub nof_ues_created: u64,
    pub nof_ues_exited: u64,
    pub nof_paging_requests: u64,
    pub nof_dropped: u64,
}

pub struct TrafficGenerator {
    cfg: TrafficConfig,
    handle: CellSchedulerHandle,
    ues: HashMap<Rnti, SimUe>,
    feedback: Vec<(SlotPoint, Feedback)>,
    next_tc_rnti: u16,
    next_ue_index: u16,
    nof_feedbacks: u32,
    nof_pages: u64,
    stats: TrafficStats,
}

impl TrafficGenerator {
    pub fn new(cfg: TrafficConfig, handle: CellSchedulerHandle) -> Self {
        Self {
            next_tc_rnti: cfg.first_tc_rnti,
            cfg,
            handle,
            ues: HashMap::new(),
            feedback: Vec::new(),
            next_ue_index: 0,
            nof_feedbacks: 0,
            nof_pages: 0,
            stats: TrafficStats::default(),
        }
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    /// Indications available before `slot` is scheduled
    pub fn before_slot(&mut self, slot: SlotPoint) {
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.feedback)
            .into_iter()
            .partition(|(at, _)| *at <= slot);
        self.feedback = later;
        for (_, fb) in due {
            let res = match fb {
                Feedback::Crc(crc) => self.handle.handle_crc_indication(crc),
                Feedback::Fallback(event) => self.handle.handle_fallback_event(event),
            };
            self.check(res);
        }

        self.exit_fallback(slot);

        let period = self.cfg.prach_period_slots;
        if period > 0 && slot.count() % period == 0 && self.ues.len() < self.cfg.max_ues {
            self.send_prach(slot);
        }
        let period = self.cfg.paging_period_slots;
        if period > 0 && slot.count() % period == 0 {
            self.send_paging();
        }
    }

    /// Derive PHY feedback from the grants of the slot just scheduled
    pub fn after_slot(&mut self, result: &SlotResult) {
        let slot = result.slot;
        for pusch in &result.ul.puschs {
            let ue_index = match pusch.kind {
                PuschKind::Msg3 => None,
                PuschKind::Ue(ue_index) => Some(ue_index),
            };
            let crc = UlCrcIndication {
                slot_rx: slot,
                rnti: pusch.pusch.rnti,
                ue_index,
                harq_id: pusch.pusch.harq.harq_id,
                tb_crc_ok: self.next_feedback_ok(),
            };
            self.feedback.push((slot + 1, Feedback::Crc(crc)));
        }

        for grant in &result.dl.ue_grants {
            // The Contention Resolution CE is always acknowledged
            let ack = grant.content == DlContent::ConRes || self.next_feedback_ok();
            let event = FallbackEvent::DlHarqAck {
                ue_index: grant.ue_index,
                harq_id: grant.harq.harq_id,
                ack,
            };
            self.feedback.push((grant.ack_slot + 1, Feedback::Fallback(event)));

            let setup_done = matches!(grant.content, DlContent::Srb0 { .. }) && !grant.is_retx;
            if let Some(ue) = self.ues.values_mut().find(|u| u.ue_index == grant.ue_index) {
                if setup_done && !ue.rrc_setup_sent {
                    ue.rrc_setup_sent = true;
                    let ue_index = ue.ue_index;
                    let bsr = FallbackEvent::UlBsr { ue_index, lcg_bytes: vec![self.cfg.ul_bsr_bytes] };
                    let srb1 = FallbackEvent::DlBufferState {
                        ue_index,
                        lcid: FallbackLcid::Srb1,
                        bytes: self.cfg.srb1_bytes,
                    };
                    self.feedback.push((grant.ack_slot + 1, Feedback::Fallback(bsr)));
                    self.feedback.push((grant.ack_slot + 1, Feedback::Fallback(srb1)));
                }
            }
        }
    }

    /// Create fallback UEs for the decoded Msg3s
    pub fn handle_msg3(&mut self, receptions: Vec<Msg3Reception>) {
        for msg3 in receptions {
            let ue_index = DuUeIndex(self.next_ue_index);
            self.next_ue_index = self.next_ue_index.wrapping_add(1);
            let events = [
                FallbackEvent::AddUe {
                    ue_index,
                    crnti: msg3.tc_rnti,
                    msg3_slot: msg3.slot_rx,
                    sr_config: None,
                },
                FallbackEvent::ConResPending { ue_index },
                FallbackEvent::DlBufferState {
                    ue_index,
                    lcid: FallbackLcid::Srb0,
                    bytes: self.cfg.srb0_bytes,
                },
            ];
            for event in events {
                let res = self.handle.handle_fallback_event(event);
                self.check(res);
            }
            info!("Created {} rnti={} from Msg3 in {}", ue_index, msg3.tc_rnti, msg3.slot_rx);
            self.ues.insert(
                msg3.tc_rnti,
                SimUe { ue_index, created: msg3.slot_rx, rrc_setup_sent: false },
            );
            self.stats.nof_ues_created += 1;
        }
    }

    fn exit_fallback(&mut self, slot: SlotPoint) {
        let duration = self.cfg.fallback_duration_slots as i32;
        let expired: Vec<Rnti> = self
            .ues
            .iter()
            .filter(|(_, ue)| slot - ue.created >= duration)
            .map(|(rnti, _)| *rnti)
            .collect();
        for rnti in expired {
            if let Some(ue) = self.ues.remove(&rnti) {
                let res = self
                    .handle
                    .handle_fallback_event(FallbackEvent::ExitFallback { ue_index: ue.ue_index });
                self.check(res);
                self.stats.nof_ues_exited += 1;
                debug!("{} rnti={} leaves fallback", ue.ue_index, rnti);
            }
        }
    }

    fn send_prach(&mut self, slot: SlotPoint) {
        let tc_rnti = Rnti(self.next_tc_rnti);
        self.next_tc_rnti = match self.next_tc_rnti.wrapping_add(1) {
            n if Rnti(n).is_crnti() => n,
            _ => self.cfg.first_tc_rnti,
        };
        let prach_slot = slot - 1;
        let rach = RachIndication {
            slot_rx: prach_slot,
            is_sul: false,
            occasions: vec![RachOccasion {
                start_symbol: 0,
                slot_index: prach_slot.slot_index() as u8,
                frequency_index: 0,
                preambles: vec![DetectedPreamble {
                    preamble_id: (tc_rnti.value() % 64) as u8,
                    timing_advance: 16,
                    tc_rnti,
                }],
            }],
        };
        let res = self.handle.handle_rach_indication(rach);
        self.check(res);
        self.stats.nof_prach += 1;
    }

    fn send_paging(&mut self) {
        let id = self.nof_pages;
        self.nof_pages += 1;
        let info = PagingInformation {
            identity: PagingUeIdentity::Cn(0x00AB_0000_0000 | id),
            ue_identity_index: (id % 1024) as u32,
            paging_drx: None,
        };
        let res = self.handle.handle_paging_information(info);
        self.check(res);
        self.stats.nof_paging_requests += 1;
    }

    fn next_feedback_ok(&mut self) -> bool {
        self.nof_feedbacks = self.nof_feedbacks.wrapping_add(1);
        self.cfg.nack_every == 0 || self.nof_feedbacks % self.cfg.nack_every != 0
    }

    fn check(&mut self, res: Result<(), LayerError>) {
        if let Err(e) = res {
            self.stats.nof_dropped += 1;
            warn!("Indication not delivered: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layers::mac::{CellSchedConfig, CellScheduler};

    #[test]
    fn test_ues_go_through_fallback() {
        let mut sched = CellScheduler::new(CellSchedConfig::default()).unwrap();
        let cfg = TrafficConfig {
            prach_period_slots: 50,
            max_ues: 4,
            fallback_duration_slots: 150,
            nack_every: 0,
            paging_period_slots: 0,
            ..TrafficConfig::default()
        };
        let mut traffic = TrafficGenerator::new(cfg, sched.handle());
        let start = SlotPoint::new(0, 0, 1);
        for i in 0..600 {
            let slot = start + i;
            traffic.before_slot(slot);
            let result = sched.run_slot(slot);
            traffic.after_slot(result);
            let receptions = sched.take_msg3_receptions();
            traffic.handle_msg3(receptions);
        }
        let stats = traffic.stats();
        assert!(stats.nof_prach >= 10);
        assert!(stats.nof_ues_created >= 8);
        assert!(stats.nof_ues_exited >= 4);
        assert_eq!(stats.nof_dropped, 0);
        let fallback = sched.stats().fallback;
        assert!(fallback.nof_conres_resolved >= 8);
        assert_eq!(fallback.nof_conres_expired, 0);
        assert!(fallback.nof_ul_crc_ok > 0);
    }
}
