//! Bounded Retry Policy
//!
//! Attempt budgets and per-cause failure counters used by the RA, paging, SI
//! and fallback schedulers for postponement diagnostics.

use serde::Serialize;
use std::fmt;

/// Why an allocation attempt was postponed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureCause {
    NoPdcch,
    NoPdsch,
    NoPusch,
    NoPucch,
    ResultListFull,
    /// DL/UL disabled, CSI-RS or otherwise unusable slot
    SlotUnavailable,
    /// Per-slot attempt budget consumed
    AttemptBudget,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCause::NoPdcch => "no PDCCH",
            FailureCause::NoPdsch => "no PDSCH",
            FailureCause::NoPusch => "no PUSCH",
            FailureCause::NoPucch => "no PUCCH",
            FailureCause::ResultListFull => "result list full",
            FailureCause::SlotUnavailable => "slot unavailable",
            FailureCause::AttemptBudget => "attempt budget",
        };
        f.write_str(name)
    }
}

/// Outcome of one allocation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocOutcome {
    Allocated,
    Postponed(FailureCause),
}

/// Failure counters per cause
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CauseCounters {
    pub no_pdcch: u64,
    pub no_pdsch: u64,
    pub no_pusch: u64,
    pub no_pucch: u64,
    pub result_list_full: u64,
    pub slot_unavailable: u64,
    pub attempt_budget: u64,
}

impl CauseCounters {
    pub fn record(&mut self, cause: FailureCause) {
        let counter = match cause {
            FailureCause::NoPdcch => &mut self.no_pdcch,
            FailureCause::NoPdsch => &mut self.no_pdsch,
            FailureCause::NoPusch => &mut self.no_pusch,
            FailureCause::NoPucch => &mut self.no_pucch,
            FailureCause::ResultListFull => &mut self.result_list_full,
            FailureCause::SlotUnavailable => &mut self.slot_unavailable,
            FailureCause::AttemptBudget => &mut self.attempt_budget,
        };
        *counter += 1;
    }

    pub fn get(&self, cause: FailureCause) -> u64 {
        match cause {
            FailureCause::NoPdcch => self.no_pdcch,
            FailureCause::NoPdsch => self.no_pdsch,
            FailureCause::NoPusch => self.no_pusch,
            FailureCause::NoPucch => self.no_pucch,
            FailureCause::ResultListFull => self.result_list_full,
            FailureCause::SlotUnavailable => self.slot_unavailable,
            FailureCause::AttemptBudget => self.attempt_budget,
        }
    }

    pub fn total(&self) -> u64 {
        self.no_pdcch
            + self.no_pdsch
            + self.no_pusch
            + self.no_pucch
            + self.result_list_full
            + self.slot_unavailable
            + self.attempt_budget
    }

    pub fn merge(&mut self, other: &CauseCounters) {
        self.no_pdcch += other.no_pdcch;
        self.no_pdsch += other.no_pdsch;
        self.no_pusch += other.no_pusch;
        self.no_pucch += other.no_pucch;
        self.result_list_full += other.result_list_full;
        self.slot_unavailable += other.slot_unavailable;
        self.attempt_budget += other.attempt_budget;
    }
}

/// Attempt budget with a per-cause breakdown of failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundedRetry {
    max_attempts: u32,
    attempts: u32,
    successes: u32,
    failures: CauseCounters,
}

impl BoundedRetry {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
            successes: 0,
            failures: CauseCounters::default(),
        }
    }

    /// Record one attempt; returns false once the budget was already spent
    pub fn record(&mut self, outcome: AllocOutcome) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.attempts += 1;
        match outcome {
            AllocOutcome::Allocated => self.successes += 1,
            AllocOutcome::Postponed(cause) => self.failures.record(cause),
        }
        true
    }

    /// Budget check without recording an attempt
    pub fn try_consume(&mut self) -> bool {
        if self.is_exhausted() {
            false
        } else {
            self.attempts += 1;
            true
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn failures(&self) -> &CauseCounters {
        &self.failures
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.successes = 0;
        self.failures = CauseCounters::default();
    }
}
