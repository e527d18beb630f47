//! Medium Access Control (MAC) Common-Channel Scheduling
//!
//! Implements the 5G NR MAC scheduling of broadcast and random-access traffic
//! according to 3GPP TS 38.321, TS 38.213 and TS 38.214: SSB, SIB1, other SI,
//! RAR and Msg3, paging, and fallback UEs until they leave fallback mode.

pub mod cell_scheduler;
pub mod common_pdsch;
pub mod config;
pub mod fallback_ue;
pub mod harq;
pub mod indications;
pub mod paging;
pub mod pdcch;
pub mod pucch;
pub mod ra_scheduler;
pub mod resource_grid;
pub mod retry;
pub mod sched_result;
pub mod si_messages;
pub mod sib1;
pub mod ssb;
pub mod tbs;
pub mod ue_fallback;

pub use cell_scheduler::{CellScheduler, CellSchedulerHandle, CellSchedulerStats};
pub use config::{CellConfiguration, CellSchedConfig};
pub use indications::{
    DetectedPreamble, DuUeIndex, FallbackEvent, FallbackLcid, PagingInformation, RachIndication, RachOccasion,
    SrConfig, UlCrcIndication,
};
pub use ra_scheduler::Msg3Reception;
pub use sched_result::SlotResult;
