//! YAML Configuration of the Cell Scheduler Application
//!
//! The `cell` section is the scheduler configuration of the MAC layer; the
//! `traffic` section drives the synthetic PHY and upper-layer load.

use layers::mac::CellSchedConfig;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GnbConfig {
    /// Cell scheduling configuration
    #[serde(default)]
    pub cell: CellSchedConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Synthetic load
    #[serde(default)]
    pub traffic: TrafficConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// All layers log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// MAC scheduler log level
    #[serde(default = "default_log_level")]
    pub mac_level: String,
    /// Period of the statistics report in slots, 0 disables it
    #[serde(default = "default_stats_period")]
    pub stats_period_slots: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
            mac_level: default_log_level(),
            stats_period_slots: default_stats_period(),
        }
    }
}

impl LogConfig {
    /// Filter directives for `EnvFilter`
    pub fn filter_directives(&self) -> String {
        format!("{},layers::mac={}", self.all_level, self.mac_level)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_period() -> u64 {
    5000
}

/// Synthetic traffic generator configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Slots between PRACH detections, 0 disables random access
    pub prach_period_slots: u32,
    /// Maximum number of UEs in fallback at once
    pub max_ues: usize,
    /// First TC-RNTI handed out
    pub first_tc_rnti: u16,
    /// RRC Setup size on SRB0
    pub srb0_bytes: u32,
    /// DL SRB1 traffic after RRC Setup
    pub srb1_bytes: u32,
    /// UL bytes reported in the BSR after RRC Setup
    pub ul_bsr_bytes: u32,
    /// Slots a UE stays in fallback before the full configuration applies
    pub fallback_duration_slots: u32,
    /// Every n-th CRC or HARQ-ACK is negative, 0 disables
    pub nack_every: u32,
    /// Slots between paging requests, 0 disables paging
    pub paging_period_slots: u32,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            prach_period_slots: 40,
            max_ues: 16,
            first_tc_rnti: 0x4601,
            srb0_bytes: 120,
            srb1_bytes: 600,
            ul_bsr_bytes: 200,
            fallback_duration_slots: 200,
            nack_every: 7,
            paging_period_slots: 320,
        }
    }
}

impl GnbConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: GnbConfig = serde_yaml::from_str(contents)?;
        config.cell.validate()?;
        Ok(config)
    }
}
