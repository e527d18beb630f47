//! Protocol Stack Layers Library
//!
//! This crate implements the 5G NR MAC common-channel scheduling subsystem:
//! random access, paging, system information and fallback UE scheduling on a
//! per-cell resource grid.

pub mod mac;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Resource unavailable")]
    ResourceUnavailable,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
