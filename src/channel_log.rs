//! Optional logging collaborators (`spec.md` §6): an append-only per-frame
//! channel-quality dump and raw I/Q burst capture. Both are off by default
//! and untouched on the ARQ/TDMA hot path when disabled.
//!
//! Grounded on `original_source/MACPHY.cc`'s `logchannel`/`logiq` paths:
//! `channel.dat` gets one line per received frame, and the tx/rx dump
//! directories get one file per burst. The original dumps a full
//! per-subcarrier channel estimate (`G`); this stack's `PhyDemodulator`
//! contract only surfaces `FramesyncStats{rssi_db, evm_db}` (`spec.md` §6),
//! so the channel dump carries those two scalars per line instead.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::warn;
use num_complex::Complex32;

use crate::clock::Seconds;
use crate::config::LoggingConfig;
use crate::neighborhood::NodeId;

pub struct ChannelLogger {
    channel_dump: Option<Mutex<File>>,
    iq_dump_dir: Option<PathBuf>,
    burst_id: AtomicU64,
}

impl ChannelLogger {
    pub fn new(cfg: &LoggingConfig) -> Self {
        let channel_dump = if cfg.channel_dump {
            match OpenOptions::new().create(true).append(true).open(&cfg.channel_dump_path) {
                Ok(file) => Some(Mutex::new(file)),
                Err(err) => {
                    warn!("failed to open channel dump {}: {err}", cfg.channel_dump_path);
                    None
                }
            }
        } else {
            None
        };

        let iq_dump_dir = cfg.iq_dump_dir.as_ref().and_then(|dir| match fs::create_dir_all(dir) {
            Ok(()) => Some(PathBuf::from(dir)),
            Err(err) => {
                warn!("failed to create iq dump dir {dir}: {err}");
                None
            }
        });

        Self {
            channel_dump,
            iq_dump_dir,
            burst_id: AtomicU64::new(0),
        }
    }

    /// No-op logger, for tests and embedders that don't want file I/O.
    pub fn disabled() -> Self {
        Self {
            channel_dump: None,
            iq_dump_dir: None,
            burst_id: AtomicU64::new(0),
        }
    }

    /// Append one row for a frame received from `peer` at `now`.
    pub fn log_channel(&self, now: Seconds, peer: NodeId, rssi_db: f64, evm_db: f64) {
        let Some(file) = &self.channel_dump else { return };
        let mut file = file.lock().unwrap();
        let _ = writeln!(file, "{now:.6} {peer} rssi={rssi_db:.3} evm={evm_db:.3}");
    }

    /// Dump one transmitted burst's modulated samples, if enabled.
    pub fn log_tx_burst(&self, samples: &[Complex32]) {
        self.dump_burst("txed_data", samples);
    }

    /// Dump one captured receive burst's raw samples, if enabled.
    pub fn log_rx_burst(&self, samples: &[Complex32]) {
        self.dump_burst("rxed_data", samples);
    }

    fn dump_burst(&self, prefix: &str, samples: &[Complex32]) {
        let Some(dir) = &self.iq_dump_dir else { return };
        let id = self.burst_id.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{prefix}_{id}.bin"));
        match File::create(&path) {
            Ok(mut file) => {
                for sample in samples {
                    let _ = file.write_all(&sample.re.to_le_bytes());
                    let _ = file.write_all(&sample.im.to_le_bytes());
                }
            }
            Err(err) => warn!("failed to write iq dump {}: {err}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logger_writes_nothing() {
        let logger = ChannelLogger::disabled();
        logger.log_channel(0.0, NodeId(1), -50.0, -20.0);
        logger.log_tx_burst(&[Complex32::new(1.0, 0.0)]);
    }

    #[test]
    fn enabled_logger_appends_channel_rows() {
        let dir = std::env::temp_dir().join(format!("smartlink-radio-test-{:?}", std::thread::current().id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("channel.dat");
        let cfg = LoggingConfig {
            channel_dump: true,
            channel_dump_path: path.to_str().unwrap().to_string(),
            iq_dump_dir: None,
        };
        let logger = ChannelLogger::new(&cfg);
        logger.log_channel(1.5, NodeId(2), -42.0, -18.0);
        drop(logger);

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("rssi=-42.000"));
        fs::remove_file(&path).ok();
    }
}
