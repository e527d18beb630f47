//! End-to-end tests of the cell scheduler: indications go in through the
//! producer handle, slot results come out of `run_slot`.

use common::types::Rnti;
use common::SlotPoint;
use layers::mac::config::{SearchSpaceConfig, SiMessageConfig};
use layers::mac::paging::PagingState;
use layers::mac::sched_result::{DlContent, PagingUeIdentity, PuschKind, RntiType};
use layers::mac::{
    CellSchedConfig, CellScheduler, DetectedPreamble, DuUeIndex, FallbackEvent, FallbackLcid, PagingInformation,
    RachIndication, RachOccasion, UlCrcIndication,
};

const TC_RNTI: Rnti = Rnti(0x4601);

fn rach(slot_rx: SlotPoint, start_symbol: u8, slot_index: u8, frequency_index: u8) -> RachIndication {
    RachIndication {
        slot_rx,
        is_sul: false,
        occasions: vec![RachOccasion {
            start_symbol,
            slot_index,
            frequency_index,
            preambles: vec![DetectedPreamble {
                preamble_id: 17,
                timing_advance: 24,
                tc_rnti: TC_RNTI,
            }],
        }],
    }
}

fn paging_config(nof_pf: u32, max_retries: u32) -> CellSchedConfig {
    let mut cfg = CellSchedConfig::default();
    cfg.paging.default_drx_cycle = 128;
    cfg.paging.nof_pf = nof_pf;
    cfg.paging.max_paging_retries = max_retries;
    cfg
}

#[test]
fn test_prach_to_rar_and_msg3_grant() {
    let mut sched = CellScheduler::new(CellSchedConfig::default()).unwrap();
    let handle = sched.handle();
    let window = sched.cell().params.ra.ra_resp_window_slots;
    let prach = SlotPoint::from_count(0, 100);

    sched.run_slot(prach);
    handle.handle_rach_indication(rach(prach, 3, 5, 0)).unwrap();

    let mut rar_slot = None;
    for i in 1..=window {
        let result = sched.run_slot(prach + i).clone();
        let Some(rar) = result.dl.rar_grants.first() else { continue };
        assert_eq!(rar.ra_rnti, Rnti(74));
        assert_eq!(rar.grants.len(), 1);
        assert_eq!(rar.grants[0].tc_rnti, TC_RNTI);
        assert_eq!(rar.grants[0].preamble_id, 17);
        assert_eq!(rar.grants[0].timing_advance, 24);
        let pdcch = result.dl.pdcchs.iter().find(|p| p.rnti == Rnti(74)).unwrap();
        assert_eq!(pdcch.rnti_type, RntiType::Ra);
        rar_slot = Some(prach + i);
        break;
    }
    let rar_slot = rar_slot.expect("RAR not scheduled inside its window");
    assert!(rar_slot >= prach + 1 && rar_slot < prach + 1 + window);

    let cell = sched.cell().params.clone();
    let msg3_offset = cell.pusch_time_domain[0].k2 as u32 + cell.msg3_delta();
    let msg3 = sched
        .slot_result(msg3_offset)
        .ul
        .puschs
        .iter()
        .find(|p| p.kind == PuschKind::Msg3)
        .cloned()
        .unwrap();
    assert_eq!(msg3.pusch.rnti, TC_RNTI);
    assert_eq!(msg3.pusch.harq.harq_id, 0);
    assert!(!msg3.is_retx);
    assert!(sched.ra().is_msg3_busy(TC_RNTI));
    assert_eq!(sched.stats().ra.nof_msg3_grants, 1);
}

#[test]
fn test_msg3_nack_then_retx() {
    let mut sched = CellScheduler::new(CellSchedConfig::default()).unwrap();
    let handle = sched.handle();
    let prach = SlotPoint::from_count(0, 300);
    handle.handle_rach_indication(rach(prach, 0, 0, 0)).unwrap();
    sched.run_slot(prach + 1);
    let cell = sched.cell().params.clone();
    let msg3_slot = prach + 1 + cell.pusch_time_domain[0].k2 as u32 + cell.msg3_delta();

    let nack = UlCrcIndication {
        slot_rx: msg3_slot,
        rnti: TC_RNTI,
        ue_index: None,
        harq_id: 0,
        tb_crc_ok: false,
    };
    for s in 2..=(msg3_slot - prach) as u32 {
        sched.run_slot(prach + s);
    }
    // Repeated NACK before the retransmission counts once
    handle.handle_crc_indication(nack.clone()).unwrap();
    handle.handle_crc_indication(nack).unwrap();
    let result = sched.run_slot(msg3_slot + 1).clone();
    assert_eq!(result.ul.pdcchs.len(), 1);
    assert_eq!(result.ul.pdcchs[0].rnti_type, RntiType::Tc);
    assert_eq!(sched.stats().ra.nof_msg3_retxs, 1);
    assert!(sched.take_msg3_receptions().is_empty());
}

#[test]
fn test_paging_frame_of_ue_id() {
    let mut sched = CellScheduler::new(paging_config(4, 2)).unwrap();
    let identity = PagingUeIdentity::Cn(0x0102_0304_0506);
    sched
        .handle()
        .handle_paging_information(PagingInformation {
            identity,
            ue_identity_index: 5,
            paging_drx: None,
        })
        .unwrap();

    let start = SlotPoint::new(0, 0, 0);
    let mut tx_frames = Vec::new();
    for i in 0..(150 * 10) {
        let result = sched.run_slot(start + i);
        if let Some(grant) = result.dl.paging_grants.first() {
            assert_eq!(grant.records, vec![identity]);
            assert!(result.dl.pdcchs.iter().any(|p| p.rnti == Rnti::P_RNTI));
            tx_frames.push(result.slot.sfn());
        }
    }
    assert!(!tx_frames.is_empty());
    assert!(tx_frames.iter().all(|sfn| sfn % 128 == 4 * (5 % 32)));
    assert_eq!(tx_frames, vec![20, 148]);
    assert_eq!(sched.stats().paging.nof_served, 1);
}

#[test]
fn test_paging_removed_after_max_retries() {
    let mut cfg = paging_config(4, 2);
    // Paging PDCCH only monitored in slot 5, paging occasions fall in slot 0
    cfg.search_spaces.push(SearchSpaceConfig {
        id: 2,
        period_slots: 10,
        offset_slots: 5,
        duration_slots: 1,
        nof_candidates: [0, 0, 4, 2, 1],
    });
    cfg.paging.paging_search_space_id = 2;
    let mut sched = CellScheduler::new(cfg).unwrap();
    let identity = PagingUeIdentity::Ran(0xAB_CDEF_0123);
    sched
        .handle()
        .handle_paging_information(PagingInformation {
            identity,
            ue_identity_index: 5,
            paging_drx: None,
        })
        .unwrap();

    let start = SlotPoint::new(0, 0, 0);
    for i in 0..(150 * 10) {
        let slot = start + i;
        assert!(sched.run_slot(slot).dl.paging_grants.is_empty());
        if slot == SlotPoint::new(0, 20, 0) {
            assert_eq!(sched.paging().attempts_of(&identity), Some(1));
            assert_eq!(sched.paging().state_of(&identity), Some(PagingState::Retrying));
        }
        if slot == SlotPoint::new(0, 147, 9) {
            assert_eq!(sched.paging().nof_pending(), 1);
        }
    }
    let stats = sched.stats().paging;
    assert_eq!(sched.paging().state_of(&identity), None);
    assert_eq!(stats.nof_expired, 1);
    assert_eq!(stats.failures.slot_unavailable, 2);
}

#[test]
fn test_oversized_srb0_postponed_not_truncated() {
    let mut sched = CellScheduler::new(CellSchedConfig::default()).unwrap();
    let handle = sched.handle();
    let ue = DuUeIndex(3);
    let s = SlotPoint::new(0, 1, 3);

    handle
        .handle_fallback_event(FallbackEvent::AddUe {
            ue_index: ue,
            crnti: TC_RNTI,
            msg3_slot: s,
            sr_config: None,
        })
        .unwrap();
    handle.handle_fallback_event(FallbackEvent::ConResPending { ue_index: ue }).unwrap();
    let ce = sched.run_slot(s).dl.ue_grants[0].clone();
    assert_eq!(ce.content, DlContent::ConRes);
    handle
        .handle_fallback_event(FallbackEvent::DlHarqAck {
            ue_index: ue,
            harq_id: ce.harq.harq_id,
            ack: true,
        })
        .unwrap();
    handle
        .handle_fallback_event(FallbackEvent::DlBufferState {
            ue_index: ue,
            lcid: FallbackLcid::Srb0,
            bytes: 4000,
        })
        .unwrap();

    for i in 1..=20 {
        assert!(sched.run_slot(s + i).dl.ue_grants.is_empty());
    }
    assert_eq!(sched.fallback().ue(ue).unwrap().srb0_bytes, 4000);
    assert!(sched.stats().fallback.dl_failures.no_pdsch > 0);

    handle
        .handle_fallback_event(FallbackEvent::DlBufferState {
            ue_index: ue,
            lcid: FallbackLcid::Srb0,
            bytes: 100,
        })
        .unwrap();
    let grants = sched.run_slot(s + 21).dl.ue_grants.clone();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].content, DlContent::Srb0 { bytes: 100 });
    assert!(grants[0].pdsch.tbs_bytes >= 103);
}

#[test]
fn test_conres_timer_after_msg3() {
    let mut cfg = CellSchedConfig::default();
    cfg.fallback.conres_timer_subframes = 8;
    let mut sched = CellScheduler::new(cfg).unwrap();
    let handle = sched.handle();
    let prach = SlotPoint::from_count(0, 500);
    handle.handle_rach_indication(rach(prach, 0, 1, 0)).unwrap();
    sched.run_slot(prach + 1);
    let params = sched.cell().params.clone();
    let msg3_slot = prach + 1 + params.pusch_time_domain[0].k2 as u32 + params.msg3_delta();
    let mut slot = prach + 2;
    while slot <= msg3_slot {
        sched.run_slot(slot);
        slot = slot + 1;
    }

    handle
        .handle_crc_indication(UlCrcIndication {
            slot_rx: msg3_slot,
            rnti: TC_RNTI,
            ue_index: None,
            harq_id: 0,
            tb_crc_ok: true,
        })
        .unwrap();
    sched.run_slot(slot);
    let receptions = sched.take_msg3_receptions();
    assert_eq!(receptions.len(), 1);
    assert_eq!(receptions[0].slot_rx, msg3_slot);

    let ue = DuUeIndex(0);
    handle
        .handle_fallback_event(FallbackEvent::AddUe {
            ue_index: ue,
            crnti: receptions[0].tc_rnti,
            msg3_slot: receptions[0].slot_rx,
            sr_config: None,
        })
        .unwrap();

    let deadline = msg3_slot + 8 * sched.cell().slots_per_subframe();
    slot = slot + 1;
    while slot < deadline {
        assert!(sched.run_slot(slot).dl.ue_grants.is_empty());
        assert_eq!(sched.fallback().nof_ues(), 1);
        slot = slot + 1;
    }
    sched.run_slot(deadline);
    assert_eq!(sched.fallback().nof_ues(), 0);
    assert_eq!(sched.stats().fallback.nof_conres_expired, 1);
    assert!(!sched.ra().is_msg3_busy(TC_RNTI));
}

#[test]
fn test_broadcast_survives_loaded_fallback() {
    let mut cfg = CellSchedConfig::default();
    cfg.si.messages = vec![SiMessageConfig { period_frames: 8, payload_bytes: 60 }];
    let mut sched = CellScheduler::new(cfg).unwrap();
    let handle = sched.handle();
    let start = SlotPoint::new(0, 0, 2);

    for i in 0..8u16 {
        let ue_index = DuUeIndex(i);
        handle
            .handle_fallback_event(FallbackEvent::AddUe {
                ue_index,
                crnti: Rnti(0x4601 + i),
                msg3_slot: start,
                sr_config: None,
            })
            .unwrap();
        handle.handle_fallback_event(FallbackEvent::ConResPending { ue_index }).unwrap();
        handle
            .handle_fallback_event(FallbackEvent::DlBufferState {
                ue_index,
                lcid: FallbackLcid::Srb1,
                bytes: 200_000,
            })
            .unwrap();
    }
    let paged = PagingUeIdentity::Cn(0x77);
    handle
        .handle_paging_information(PagingInformation { identity: paged, ue_identity_index: 5, paging_drx: None })
        .unwrap();

    let mut in_flight: Vec<(DuUeIndex, u8, SlotPoint)> = Vec::new();
    let mut nof_srb1 = 0;
    for i in 0..120 {
        let slot = start + i;
        in_flight.retain(|(ue_index, harq_id, ack_slot)| {
            if *ack_slot >= slot {
                return true;
            }
            handle
                .handle_fallback_event(FallbackEvent::DlHarqAck { ue_index: *ue_index, harq_id: *harq_id, ack: true })
                .unwrap();
            false
        });
        let result = sched.run_slot(slot).clone();
        for grant in &result.dl.ue_grants {
            in_flight.push((grant.ue_index, grant.harq.harq_id, grant.ack_slot));
            if matches!(grant.content, DlContent::Srb1 { .. }) {
                nof_srb1 += 1;
            }
        }
        if slot.count() % 20 == 0 {
            assert_eq!(result.dl.ssbs.len(), 1, "SSB missing in {}", slot);
        }
    }

    let stats = sched.stats();
    assert_eq!(stats.fallback.nof_conres_resolved, 8);
    assert!(nof_srb1 > 30);
    // SIB1 occasions at slots 20, 40, ..., 120
    assert_eq!(stats.sib1.nof_tx, 6);
    assert_eq!(stats.sib1.nof_misses, 0);
    assert_eq!(stats.si_messages[0].nof_tx, 1);
    assert_eq!(stats.si_messages[0].nof_expired_windows, 0);
    assert_eq!(stats.paging.nof_records, 1);
}

#[test]
fn test_stats_serialize_to_json() {
    let mut sched = CellScheduler::new(CellSchedConfig::default()).unwrap();
    let start = SlotPoint::new(0, 0, 0);
    for i in 0..40 {
        sched.run_slot(start + i);
    }
    let json = serde_json::to_value(sched.stats()).unwrap();
    assert_eq!(json["nof_slots"], 40);
    assert_eq!(json["sib1"]["nof_tx"], 2);
}
