//! Link-layer stack for an OFDM/TDMA software-defined radio: a selective-repeat
//! ARQ controller, a slot-aligned TDMA engine, and per-neighbor link-quality
//! scoring feeding modulation/coding-scheme adaptation.
//!
//! The physical layer (modem), radio front-end, and TUN/TAP device are
//! external collaborators represented here as traits ([`phy`], [`transport`],
//! [`tuntap`]). No production implementation of those traits ships in this
//! crate; [`sim`] provides deterministic test/demo doubles only.

pub mod channel_log;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod mcs;
pub mod neighborhood;
pub mod packet;
pub mod phy;
pub mod sim;
pub mod tdma;
pub mod timer;
pub mod transport;
pub mod tuntap;
pub mod window;

pub use config::StackConfig;
pub use controller::SmartController;
pub use error::{ConfigError, StackError, TransportError};
pub use neighborhood::{Neighborhood, Node, NodeId};
pub use packet::{ExtendedHeader, Header, Packet, PacketFlags};
