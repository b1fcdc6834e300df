//! Typed errors at the crate's module boundaries.
//!
//! The ARQ/TDMA hot path never propagates an error upward (see
//! `spec.md` §7): malformed packets, out-of-window sequences, and timer
//! races are handled locally by updating per-peer window state. These types
//! cover the remaining boundaries where a caller does need a `Result`:
//! configuration loading, the device contracts, and wire parsing.

use thiserror::Error;

/// Failure loading or validating a [`crate::config::StackConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure from the [`crate::transport::IqTransport`] or
/// [`crate::phy::PhyModulator`]/[`crate::phy::PhyDemodulator`] contracts.
///
/// Per `spec.md` §7(f), a transport error abandons the current slot; the
/// driver loop logs and continues rather than propagating further.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed send failed: {0}")]
    Send(String),
    #[error("timed receive failed: {0}")]
    Recv(String),
    #[error("device reported no samples available")]
    NoSamples,
}

/// Wire-level parse failure for the fixed 8-byte on-air [`crate::packet::Header`].
#[derive(Debug, Error)]
pub enum WireError {
    #[error("header buffer too short: got {0} bytes, need 8")]
    HeaderTooShort(usize),
    #[error("payload declared length {declared} exceeds buffer length {actual}")]
    PayloadTooShort { declared: usize, actual: usize },
}

/// Top-level error returned from stack construction and shutdown.
#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("thread {0} panicked")]
    ThreadPanicked(String),
}
