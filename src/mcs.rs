//! Modulation/coding-scheme (MCS) representation and per-peer adaptive
//! selection.
//!
//! `spec.md` §4.5: each send window keeps a categorical distribution over
//! the allowed MCS index range and resamples it every decision epoch based
//! on short- and long-horizon PER. The concrete physical meaning of an MCS
//! index (CRC, inner/outer FEC, modulation) is owned by the PHY; this
//! module only needs the four-tuple shape from `spec.md` §6 to hand a
//! selection to [`crate::phy::PhyModulator::set_payload_mcs`].

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

/// Checksum scheme applied by the PHY's CRC stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcScheme {
    None,
    Checksum32,
    Crc16,
    Crc32,
}

/// Inner/outer forward error correction scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecScheme {
    None,
    RepeatThree,
    Hamming128,
    ReedSolomon223,
    Convolutional,
}

/// Modulation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulationScheme {
    Bpsk,
    Qpsk,
    Qam16,
    Qam64,
}

/// The four-tuple a PHY modulator/demodulator is configured with, per
/// `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mcs {
    pub crc: CrcScheme,
    pub inner_fec: FecScheme,
    pub outer_fec: FecScheme,
    pub modulation: ModulationScheme,
}

/// A fixed, ordered table mapping `mcsidx` to a concrete [`Mcs`], lowest
/// index = most robust/lowest rate, highest index = least robust/highest
/// rate. Real deployments would load this from the PHY; we ship one
/// representative table so the adaptation logic below is exercisable.
pub fn default_mcs_table() -> Vec<Mcs> {
    vec![
        Mcs {
            crc: CrcScheme::Crc32,
            inner_fec: FecScheme::RepeatThree,
            outer_fec: FecScheme::ReedSolomon223,
            modulation: ModulationScheme::Bpsk,
        },
        Mcs {
            crc: CrcScheme::Crc32,
            inner_fec: FecScheme::Hamming128,
            outer_fec: FecScheme::ReedSolomon223,
            modulation: ModulationScheme::Qpsk,
        },
        Mcs {
            crc: CrcScheme::Crc16,
            inner_fec: FecScheme::Convolutional,
            outer_fec: FecScheme::None,
            modulation: ModulationScheme::Qam16,
        },
        Mcs {
            crc: CrcScheme::Crc16,
            inner_fec: FecScheme::None,
            outer_fec: FecScheme::None,
            modulation: ModulationScheme::Qam64,
        },
    ]
}

/// Tunables for the MCS chooser, mirrored from [`crate::config::StackConfig`].
#[derive(Debug, Clone, Copy)]
pub struct McsParams {
    pub min_mcsidx: u8,
    pub max_mcsidx: u8,
    pub up_per_threshold: f64,
    pub down_per_threshold: f64,
    pub alpha: f64,
    pub prob_floor: f64,
    pub mcsidx_broadcast: u8,
    pub mcsidx_ack: u8,
    pub mcs_fast_adjustment_period: u32,
}

/// Per-peer categorical distribution over the allowed MCS index range,
/// resampled at each decision epoch.
#[derive(Debug, Clone)]
pub struct McsChooser {
    params: McsParams,
    /// `probs[i]` is the probability mass for index `min_mcsidx + i`.
    probs: Vec<f64>,
    current: u8,
    /// Decision epochs remaining at the accelerated cadence after an
    /// environment discontinuity.
    fast_adjustment_epochs_remaining: u32,
}

impl McsChooser {
    pub fn new(params: McsParams) -> Self {
        let n = (params.max_mcsidx - params.min_mcsidx + 1) as usize;
        Self {
            params,
            probs: vec![1.0 / n as f64; n],
            current: params.min_mcsidx,
            fast_adjustment_epochs_remaining: 0,
        }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    fn index_of(&self, mcsidx: u8) -> usize {
        (mcsidx - self.params.min_mcsidx) as usize
    }

    /// Run one decision epoch: shift the distribution based on PER against
    /// the configured thresholds, then sample the next index.
    ///
    /// Returns the newly sampled `mcsidx`.
    pub fn decide<R: Rng>(&mut self, short_per: f64, long_per: f64, rng: &mut R) -> u8 {
        let current_idx = self.index_of(self.current);

        if short_per > self.params.down_per_threshold {
            // Shift mass toward indices <= current (more robust).
            for (i, p) in self.probs.iter_mut().enumerate() {
                if i > current_idx {
                    *p *= self.params.alpha;
                }
            }
        } else if short_per < self.params.up_per_threshold && long_per < self.params.up_per_threshold {
            // Shift mass toward indices >= current (higher rate).
            for (i, p) in self.probs.iter_mut().enumerate() {
                if i < current_idx {
                    *p *= self.params.alpha;
                }
            }
        }

        // Re-apply the floor and renormalize.
        let floor = self.params.prob_floor;
        for p in self.probs.iter_mut() {
            if *p < floor {
                *p = floor;
            }
        }
        let total: f64 = self.probs.iter().sum();
        if total > 0.0 {
            for p in self.probs.iter_mut() {
                *p /= total;
            }
        }

        if self.fast_adjustment_epochs_remaining > 0 {
            self.fast_adjustment_epochs_remaining -= 1;
        }

        let dist = WeightedIndex::new(&self.probs).expect("non-empty, non-negative weights");
        let sampled_idx = dist.sample(rng);
        self.current = self.params.min_mcsidx + sampled_idx as u8;
        self.current
    }

    /// Whether decision epochs should currently fire at the accelerated
    /// cadence (still within the fast-adjustment period after a reset).
    pub fn in_fast_adjustment(&self) -> bool {
        self.fast_adjustment_epochs_remaining > 0
    }

    /// React to an externally-signaled environment discontinuity: reset the
    /// distribution to uniform and begin a fast-adjustment period.
    pub fn on_environment_discontinuity(&mut self) {
        let n = self.probs.len();
        self.probs = vec![1.0 / n as f64; n];
        self.fast_adjustment_epochs_remaining = self.params.mcs_fast_adjustment_period;
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probs
    }
}
