//! Stack configuration: TDMA, ARQ, and MCS tunables loaded from a TOML file,
//! following the same `serde` + `toml` loading pattern as the teacher
//! crate's `control::config::ControlConfig::load`.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcs::McsParams;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TdmaConfig {
    /// Frame duration, seconds.
    pub frame_size: f64,
    /// Inter-slot guard, seconds.
    pub pad_size: f64,
    /// Max packets assembled into a single transmit burst.
    pub packets_per_slot: usize,
    /// Bytes of reserved space prefixed to every payload.
    pub padded_bytes: usize,
    /// Number of demodulator worker threads.
    pub rx_thread_pool_size: usize,
}

impl Default for TdmaConfig {
    fn default() -> Self {
        Self {
            frame_size: 1.0,
            pad_size: 0.01,
            packets_per_slot: 4,
            padded_bytes: 8,
            rx_thread_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ArqConfig {
    pub maxwin: u16,
    pub recvwin: u16,
    pub retransmission_delay: f64,
    pub ack_delay: f64,
    pub max_retransmissions: u32,
    pub unreachable_timeout: f64,
    pub per_tau_short: f64,
    pub per_tau_long: f64,
    pub evm_rssi_tau_short: f64,
    pub evm_rssi_tau_long: f64,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            maxwin: 64,
            recvwin: 64,
            retransmission_delay: 0.5,
            ack_delay: 0.05,
            max_retransmissions: 8,
            unreachable_timeout: 30.0,
            per_tau_short: 2.0,
            per_tau_long: 30.0,
            evm_rssi_tau_short: 2.0,
            evm_rssi_tau_long: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct McsConfig {
    pub min_mcsidx: u8,
    pub max_mcsidx: u8,
    pub up_per_threshold: f64,
    pub down_per_threshold: f64,
    pub alpha: f64,
    pub prob_floor: f64,
    pub mcsidx_broadcast: u8,
    pub mcsidx_ack: u8,
    pub mcs_fast_adjustment_period: u32,
    /// Wall-clock interval between decision epochs under normal cadence.
    pub epoch_interval: f64,
    /// Accelerated wall-clock interval between decision epochs while a
    /// `mcs_fast_adjustment_period` is running.
    pub fast_epoch_interval: f64,
}

impl Default for McsConfig {
    fn default() -> Self {
        Self {
            min_mcsidx: 0,
            max_mcsidx: 3,
            up_per_threshold: 0.02,
            down_per_threshold: 0.15,
            alpha: 0.7,
            prob_floor: 0.01,
            mcsidx_broadcast: 0,
            mcsidx_ack: 0,
            mcs_fast_adjustment_period: 8,
            epoch_interval: 5.0,
            fast_epoch_interval: 1.0,
        }
    }
}

impl McsConfig {
    pub fn to_params(&self) -> McsParams {
        McsParams {
            min_mcsidx: self.min_mcsidx,
            max_mcsidx: self.max_mcsidx,
            up_per_threshold: self.up_per_threshold,
            down_per_threshold: self.down_per_threshold,
            alpha: self.alpha,
            prob_floor: self.prob_floor,
            mcsidx_broadcast: self.mcsidx_broadcast,
            mcsidx_ack: self.mcsidx_ack,
            mcs_fast_adjustment_period: self.mcs_fast_adjustment_period,
        }
    }
}

/// Optional logging collaborators (`spec.md` §6): append-only channel
/// estimate dumps and raw I/Q bursts. Off by default; never on the ARQ/TDMA
/// hot path when disabled.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    pub channel_dump: bool,
    pub channel_dump_path: String,
    pub iq_dump_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            channel_dump: false,
            channel_dump_path: "channel.dat".to_string(),
            iq_dump_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct StackConfig {
    /// Accept frames not addressed to this node (`original_source/MACPHY.cc`'s
    /// `loopback` flag); set by `-l/--loopback` for the bundled demo.
    pub loopback: bool,
    pub tdma: TdmaConfig,
    pub arq: ArqConfig,
    pub mcs: McsConfig,
    pub logging: LoggingConfig,
}

impl StackConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any omitted section.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tdma.frame_size <= 0.0 {
            return Err(ConfigError::Invalid("tdma.frame_size must be positive".into()));
        }
        if self.tdma.pad_size < 0.0 || self.tdma.pad_size >= self.tdma.frame_size {
            return Err(ConfigError::Invalid("tdma.pad_size must be in [0, frame_size)".into()));
        }
        if self.arq.maxwin == 0 || self.arq.recvwin == 0 {
            return Err(ConfigError::Invalid("arq.maxwin and arq.recvwin must be positive".into()));
        }
        if self.mcs.min_mcsidx > self.mcs.max_mcsidx {
            return Err(ConfigError::Invalid("mcs.min_mcsidx must be <= mcs.max_mcsidx".into()));
        }
        if self.mcs.up_per_threshold >= self.mcs.down_per_threshold {
            return Err(ConfigError::Invalid("mcs.up_per_threshold must be < mcs.down_per_threshold".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let cfg = StackConfig::default();
        cfg.validate().expect("defaults should be valid");
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_str = r#"
            [tdma]
            frame_size = 2.0
        "#;
        let cfg: StackConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.tdma.frame_size, 2.0);
        assert_eq!(cfg.tdma.pad_size, TdmaConfig::default().pad_size);
    }

    #[test]
    fn rejects_inverted_mcs_thresholds() {
        let mut cfg = StackConfig::default();
        cfg.mcs.up_per_threshold = 0.5;
        cfg.mcs.down_per_threshold = 0.1;
        assert!(cfg.validate().is_err());
    }
}
