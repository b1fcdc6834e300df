//! IQ transport contract (`spec.md` §6): the seam to the radio front-end
//! driver (a USRP-style device API in the original system), out of scope
//! for this crate beyond the trait itself.

use crate::clock::Seconds;
use crate::error::TransportError;
use num_complex::Complex32;

/// Timed, rate-queryable IQ sample transport.
pub trait IqTransport: Send + Sync {
    fn time_now(&self) -> Seconds;

    fn tx_rate(&self) -> f64;
    fn rx_rate(&self) -> f64;

    fn max_send_samps_per_packet(&self) -> usize;
    fn max_recv_samps_per_packet(&self) -> usize;

    /// Arm a timed receive starting at `when`.
    fn recv_at(&self, when: Seconds) -> Result<(), TransportError>;
    /// Read up to `buf.len()` samples already armed via `recv_at`.
    fn recv(&self, buf: &mut [Complex32]) -> Result<usize, TransportError>;

    fn start_burst(&self);
    fn end_burst(&self);
    /// Send `buf` as a timed burst starting at `when`.
    fn send(&self, when: Seconds, buf: &[Complex32]) -> Result<usize, TransportError>;
}
