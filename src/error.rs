//! Error types for the intake engine.
//!
//! Detector failures never abort a run: [`DetectError`] is caught at the
//! detector-set boundary and turned into an empty contribution. Only
//! [`ConfigError`] is allowed to reach the caller.

use thiserror::Error;

/// Failure of a single detector call.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("detector {detector} unavailable: {reason}")]
    Unavailable { detector: String, reason: String },

    #[error("detector {detector} timed out after {secs}s")]
    Timeout { detector: String, secs: u64 },

    #[error("detector {detector} returned a malformed response: {reason}")]
    MalformedResponse { detector: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DetectError {
    /// True for outages (network, timeout); false for bad payloads.
    pub fn is_outage(&self) -> bool {
        match self {
            DetectError::Unavailable { .. } | DetectError::Timeout { .. } => true,
            DetectError::Http(e) => !e.is_decode(),
            DetectError::MalformedResponse { .. } => false,
        }
    }
}

/// Invalid or unreadable engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
