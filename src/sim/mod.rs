//! Deterministic test/demo doubles for the external-interface traits
//! ([`crate::tuntap::TunTap`], [`crate::phy::PhyModulator`]/
//! [`crate::phy::PhyDemodulator`], [`crate::transport::IqTransport`]).
//!
//! None of this is a production implementation of those seams — the real
//! virtual interface, OFDM modem, and radio front end are out of scope.
//! These doubles exist so the ARQ/TDMA logic can be exercised end-to-end in
//! tests and in the `--loopback` demo mode without real hardware.

pub mod loopback;
pub mod medium;
pub mod phy_loopback;
