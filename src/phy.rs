//! PHY modulator/demodulator contract (`spec.md` §6).
//!
//! The OFDM modem itself is out of scope for this crate — it is supplied by
//! a DSP library (liquid-dsp in the original system). These traits are the
//! seam: the TDMA engine drives a [`PhyModulator`] to build each burst and
//! feeds captured samples into a [`PhyDemodulator`], which invokes a
//! callback per recovered frame.

use crate::mcs::Mcs;

/// Per-frame framesync statistics reported alongside a demodulated frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramesyncStats {
    pub rssi_db: f32,
    pub evm_db: f32,
}

/// A recovered frame, valid or not, handed to the demodulator's callback.
pub struct DemodulatedFrame<'a> {
    pub header_valid: bool,
    pub payload_valid: bool,
    pub header: &'a [u8],
    pub payload: &'a [u8],
    pub payload_len: usize,
    pub stats: FramesyncStats,
}

/// Builds and modulates one burst's worth of IQ samples.
///
/// Contract per `spec.md` §6: `assemble` stages header+payload bytes,
/// `modulate_samples` fills the caller's output buffer incrementally
/// (returning whether the frame is fully emitted), and the header/payload
/// MCS can be set independently per packet.
pub trait PhyModulator: Send {
    fn set_header_mcs(&mut self, mcs: Mcs);
    fn set_payload_mcs(&mut self, mcs: Mcs);

    /// Stage a frame for modulation.
    fn assemble(&mut self, header_bytes: &[u8], payload_bytes: &[u8]);

    /// Write up to `out.len()` samples into `out`, returning the number
    /// written and whether the frame is now fully emitted.
    fn modulate_samples(&mut self, out: &mut [num_complex::Complex32]) -> (usize, bool);

    /// Maximum number of samples a single modulated frame can produce.
    fn max_modulated_samples(&self) -> usize;
}

/// Demodulates captured IQ samples, invoking `on_frame` once per recovered
/// frame.
pub trait PhyDemodulator: Send {
    fn reset(&mut self);

    fn demodulate_samples(&mut self, iq: &[num_complex::Complex32], on_frame: &mut dyn FnMut(DemodulatedFrame<'_>));
}
