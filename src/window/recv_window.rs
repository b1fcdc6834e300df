//! Per-peer receive window: out-of-order buffering ahead of in-order
//! delivery to the network egress sink.
//!
//! Invariant (`spec.md` §3): slot `s mod win` is non-empty only if
//! `ack <= s <= max` and `s != ack` — the head is delivered immediately,
//! never buffered.

use std::sync::Mutex;

use crate::estimator::DualHorizon;
use crate::neighborhood::NodeId;
use crate::packet::{Packet, Seq};

pub struct RecvWindowInner {
    /// Next expected sequence number.
    pub ack: Seq,
    /// Highest sequence number received so far.
    pub max: Seq,
    /// Value of `ack` last piggybacked onto an outgoing packet's extended
    /// header. Lets the controller's `pull()` tell whether `ack` has moved
    /// since the last echo and a synthesized ACK is owed even with nothing
    /// else to send.
    pub last_acked: Seq,
    pub win: u16,
    slots: Vec<Option<Packet>>,
    pub evm: DualHorizon,
    pub rssi: DualHorizon,
}

impl RecvWindowInner {
    fn slot_index(&self, seq: Seq) -> usize {
        (seq.0 as usize) % (self.win as usize)
    }

    /// `seq < ack`: already delivered, a duplicate.
    pub fn is_duplicate(&self, seq: Seq) -> bool {
        seq.distance_from(self.ack) < 0
    }

    /// `seq > ack + win`: past the buffering horizon.
    pub fn is_out_of_window(&self, seq: Seq) -> bool {
        seq.distance_from(self.ack) > self.win as i32
    }

    pub fn buffer(&mut self, pkt: Packet) {
        let idx = self.slot_index(pkt.seq);
        self.slots[idx] = Some(pkt);
    }

    pub fn take_buffered(&mut self, seq: Seq) -> Option<Packet> {
        let idx = self.slot_index(seq);
        self.slots[idx].take()
    }

    pub fn is_buffered(&self, seq: Seq) -> bool {
        let idx = self.slot_index(seq);
        self.slots[idx].is_some()
    }

    /// Whether `ack` has advanced since it was last piggybacked to the peer.
    pub fn ack_pending(&self) -> bool {
        self.ack != self.last_acked
    }

    pub fn mark_acked(&mut self) {
        self.last_acked = self.ack;
    }
}

pub struct RecvWindow {
    pub src: NodeId,
    inner: Mutex<RecvWindowInner>,
}

impl RecvWindow {
    pub fn new(src: NodeId, win: u16, evm_tau_short: f64, evm_tau_long: f64, rssi_tau_short: f64, rssi_tau_long: f64) -> Self {
        Self {
            src,
            inner: Mutex::new(RecvWindowInner {
                ack: Seq::ZERO,
                max: Seq::ZERO,
                last_acked: Seq::ZERO,
                win,
                slots: (0..win).map(|_| None).collect(),
                evm: DualHorizon::new(evm_tau_short, evm_tau_long),
                rssi: DualHorizon::new(rssi_tau_short, rssi_tau_long),
            }),
        }
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, RecvWindowInner> {
        self.inner.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ExtendedHeader;

    fn mk(seq: Seq) -> Packet {
        Packet {
            nexthop: NodeId(1),
            curhop: NodeId(2),
            seq,
            flags: Default::default(),
            mcsidx: 0,
            gain: 1.0,
            ehdr: ExtendedHeader::default(),
            payload: vec![1],
        }
    }

    #[test]
    fn fresh_window_starts_at_seq_zero() {
        let rw = RecvWindow::new(NodeId(2), 4, 0.5, 5.0, 0.5, 5.0);
        let inner = rw.lock();
        assert_eq!(inner.ack, Seq::ZERO);
        assert_eq!(inner.max, Seq::ZERO);
    }

    #[test]
    fn duplicate_and_out_of_window_detection() {
        let rw = RecvWindow::new(NodeId(2), 4, 0.5, 5.0, 0.5, 5.0);
        let mut inner = rw.lock();
        inner.ack = Seq(2);
        assert!(inner.is_duplicate(Seq(1)));
        assert!(!inner.is_duplicate(Seq(2)));
        assert!(inner.is_out_of_window(Seq(7)));
        assert!(!inner.is_out_of_window(Seq(6)));
    }

    #[test]
    fn buffer_and_take_round_trips() {
        let rw = RecvWindow::new(NodeId(2), 4, 0.5, 5.0, 0.5, 5.0);
        let mut inner = rw.lock();
        inner.buffer(mk(Seq(1)));
        assert!(inner.is_buffered(Seq(1)));
        let taken = inner.take_buffered(Seq(1)).unwrap();
        assert_eq!(taken.seq, Seq(1));
        assert!(!inner.is_buffered(Seq(1)));
    }

    #[test]
    fn ack_pending_tracks_unflushed_advances() {
        let rw = RecvWindow::new(NodeId(2), 4, 0.5, 5.0, 0.5, 5.0);
        let mut inner = rw.lock();
        assert!(!inner.ack_pending());
        inner.ack = Seq(1);
        assert!(inner.ack_pending());
        inner.mark_acked();
        assert!(!inner.ack_pending());
    }
}
