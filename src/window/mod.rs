//! Per-peer send and receive window state.
//!
//! The windows themselves are data containers with small bookkeeping
//! helpers; the ARQ state-machine logic that mutates them (`spec.md`
//! §4.3-§4.4) lives in [`crate::controller::SmartController`], mirroring how
//! `original_source/src/mac/SmartController.cc` treats `SendWindow`/
//! `RecvWindow` as plain structs manipulated by the controller under their
//! own mutex, with only a timer-fire trampoline (`operator()`) attached.

pub mod recv_window;
pub mod send_window;

pub use recv_window::{RecvWindow, RecvWindowInner};
pub use send_window::{SendWindow, SendWindowInner};

use crate::neighborhood::NodeId;

/// Identifies the owning entity of a pending timer deadline: a destination's
/// retransmission timer, a source's delayed-ACK timer, or a peer's MCS
/// decision-epoch timer. At most one of each kind is ever registered per
/// peer (`spec.md` §8, invariants 5-6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEntity {
    Retransmit(NodeId),
    DelayedAck(NodeId),
    McsEpoch(NodeId),
}
