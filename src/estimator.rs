//! Time-windowed estimators of packet error rate, EVM, and RSSI.
//!
//! `spec.md` §4.5 calls for short- and long-horizon exponential estimators
//! of PER, plus analogous EVM/RSSI estimators fed from framesync stats.
//! Each is an exponentially-weighted moving average with a fixed time
//! constant, matching the style of `original_source/src/cil/Scorer.*`'s
//! per-measurement-period accumulation but continuous in time rather than
//! bucketed, since packets don't arrive on a fixed cadence.

use crate::clock::Seconds;

/// A continuous-time exponential moving average with time constant `tau`
/// (seconds): `alpha = 1 - exp(-dt/tau)`.
#[derive(Debug, Clone)]
pub struct Ewma {
    tau: Seconds,
    value: Option<f64>,
    last_update: Option<Seconds>,
}

impl Ewma {
    pub fn new(tau: Seconds) -> Self {
        Self {
            tau,
            value: None,
            last_update: None,
        }
    }

    /// Feed a new sample at time `now`, returning the updated estimate. The
    /// first sample seeds the estimate directly.
    pub fn update(&mut self, sample: f64, now: Seconds) -> f64 {
        let updated = match (self.value, self.last_update) {
            (Some(v), Some(t)) => {
                let dt = (now - t).max(0.0);
                let alpha = if self.tau <= 0.0 {
                    1.0
                } else {
                    1.0 - (-dt / self.tau).exp()
                };
                v + alpha * (sample - v)
            }
            _ => sample,
        };
        self.value = Some(updated);
        self.last_update = Some(now);
        updated
    }

    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    pub fn has_samples(&self) -> bool {
        self.value.is_some()
    }
}

/// A pair of estimators over the same signal at different time constants.
#[derive(Debug, Clone)]
pub struct DualHorizon {
    pub short: Ewma,
    pub long: Ewma,
}

impl DualHorizon {
    pub fn new(tau_short: Seconds, tau_long: Seconds) -> Self {
        Self {
            short: Ewma::new(tau_short),
            long: Ewma::new(tau_long),
        }
    }

    pub fn update(&mut self, sample: f64, now: Seconds) {
        self.short.update(sample, now);
        self.long.update(sample, now);
    }
}

/// The full set of link-quality estimators a send/recv window maintains:
/// packet error rate (unitless, 0..1), error-vector magnitude (dB), and
/// received-signal-strength indicator (dB).
#[derive(Debug, Clone)]
pub struct LinkEstimators {
    pub per: DualHorizon,
    pub evm: DualHorizon,
    pub rssi: DualHorizon,
}

impl LinkEstimators {
    pub fn new(per_tau_short: Seconds, per_tau_long: Seconds, evm_rssi_tau_short: Seconds, evm_rssi_tau_long: Seconds) -> Self {
        Self {
            per: DualHorizon::new(per_tau_short, per_tau_long),
            evm: DualHorizon::new(evm_rssi_tau_short, evm_rssi_tau_long),
            rssi: DualHorizon::new(evm_rssi_tau_short, evm_rssi_tau_long),
        }
    }

    /// Record one transmission outcome: `lost = true` counts as a loss
    /// sample (1.0), `lost = false` as a success sample (0.0). This is the
    /// "(acks - losses) over the elapsed window" update from `spec.md` §4.4
    /// step 4, expressed per-outcome rather than batched.
    pub fn record_outcome(&mut self, lost: bool, now: Seconds) {
        self.per.update(if lost { 1.0 } else { 0.0 }, now);
    }

    pub fn record_framesync_stats(&mut self, evm_db: f32, rssi_db: f32, now: Seconds) {
        self.evm.update(evm_db as f64, now);
        self.rssi.update(rssi_db as f64, now);
    }

    pub fn short_per(&self) -> f64 {
        self.per.short.value()
    }

    pub fn long_per(&self) -> f64 {
        self.per.long.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_seeds_from_first_sample() {
        let mut e = Ewma::new(1.0);
        assert_eq!(e.update(0.5, 0.0), 0.5);
        assert!(e.has_samples());
    }

    #[test]
    fn ewma_converges_toward_repeated_sample() {
        let mut e = Ewma::new(0.1);
        let mut now = 0.0;
        e.update(0.0, now);
        for _ in 0..50 {
            now += 0.05;
            e.update(1.0, now);
        }
        assert!(e.value() > 0.9, "expected convergence near 1.0, got {}", e.value());
    }

    #[test]
    fn short_horizon_reacts_faster_than_long() {
        let mut dual = DualHorizon::new(0.05, 5.0);
        let mut now = 0.0;
        dual.update(0.0, now);
        for _ in 0..10 {
            now += 0.05;
            dual.update(1.0, now);
        }
        assert!(dual.short.value() > dual.long.value());
    }

    #[test]
    fn link_estimators_track_per_and_evm_independently() {
        let mut le = LinkEstimators::new(0.1, 5.0, 0.1, 5.0);
        le.record_outcome(true, 0.0);
        le.record_framesync_stats(-20.0, -60.0, 0.0);
        assert!(le.short_per() > 0.0);
        assert!(le.evm.short.value() < 0.0);
    }
}
