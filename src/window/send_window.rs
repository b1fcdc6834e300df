//! Per-peer send window: outstanding (unacked) packets awaiting ACK, plus
//! the link-quality estimators and MCS chooser that ride along with it.
//!
//! Invariant (`spec.md` §3): for all `s` in `[base, max]`, slot
//! `s mod maxwin` is either empty or holds a packet with sequence `s`;
//! slots outside that range are empty.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::clock::Seconds;
use crate::estimator::LinkEstimators;
use crate::mcs::{McsChooser, McsParams};
use crate::neighborhood::NodeId;
use crate::packet::{Packet, Seq};

struct Slot {
    packet: Packet,
    retransmit_count: u32,
}

/// Mutable state guarded by a single lock, one per peer.
pub struct SendWindowInner {
    /// Oldest unacknowledged sequence number.
    pub base: Seq,
    /// Highest sequence number assigned so far, if any packet has ever been
    /// sent to this peer.
    pub max: Option<Seq>,
    /// Current congestion/flow-control window size (packets).
    pub win: u16,
    /// Hard cap on outstanding packets / slot array size.
    pub maxwin: u16,
    slots: Vec<Option<Slot>>,
    /// Locally-originated datagrams queued because the window was full when
    /// they arrived; drained into slots as ACKs free capacity.
    pub pending: VecDeque<Vec<u8>>,
    pub estimators: LinkEstimators,
    pub mcs: McsChooser,
    pub max_retransmissions: u32,
    pub unreachable: bool,
    /// Wall-clock time the short PER estimator first reached 1.0, used to
    /// detect the `unreachable_timeout` condition of `spec.md` §4.5.
    pub per_saturated_since: Option<Seconds>,
}

impl SendWindowInner {
    fn slot_index(&self, seq: Seq) -> usize {
        (seq.0 as usize) % (self.maxwin as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.max.is_none()
    }

    /// Whether any assigned sequence number is still awaiting an ACK.
    pub fn outstanding(&self) -> bool {
        match self.max {
            None => false,
            Some(max) => self.base.distance_from(max) <= 0,
        }
    }

    /// Whether `seq` falls in the currently open window `[base, base+win)`.
    pub fn in_window(&self, seq: Seq) -> bool {
        let dist = seq.distance_from(self.base);
        dist >= 0 && (dist as u32) < self.win as u32
    }

    pub fn slot(&self, seq: Seq) -> Option<&Packet> {
        self.slots[self.slot_index(seq)].as_ref().map(|s| &s.packet)
    }

    pub fn retransmit_count(&self, seq: Seq) -> u32 {
        self.slots[self.slot_index(seq)]
            .as_ref()
            .map(|s| s.retransmit_count)
            .unwrap_or(0)
    }

    /// Store `pkt` in its slot (by `pkt.seq`), resetting its retransmit
    /// counter, and advance `max` if this is the highest sequence seen.
    pub fn assign(&mut self, pkt: Packet) {
        let seq = pkt.seq;
        if self.max.map(|m| seq.distance_from(m) > 0).unwrap_or(true) {
            self.max = Some(seq);
        }
        let idx = self.slot_index(seq);
        self.slots[idx] = Some(Slot {
            packet: pkt,
            retransmit_count: 0,
        });
    }

    pub fn increment_retransmit_count(&mut self, seq: Seq) -> u32 {
        let idx = self.slot_index(seq);
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.retransmit_count += 1;
            slot.retransmit_count
        } else {
            0
        }
    }

    /// Clear the slot for `seq` (e.g. once ACKed past it).
    pub fn clear_slot(&mut self, seq: Seq) {
        let idx = self.slot_index(seq);
        self.slots[idx] = None;
    }

    pub fn drop_slot(&mut self, seq: Seq) -> Option<Packet> {
        let idx = self.slot_index(seq);
        self.slots[idx].take().map(|s| s.packet)
    }

    /// Number of distinct sequence slots open between `base` (inclusive)
    /// and `max+1` (exclusive) that are currently empty.
    pub fn free_slots(&self) -> u32 {
        self.maxwin as u32 - self.occupied_count()
    }

    fn occupied_count(&self) -> u32 {
        self.slots.iter().filter(|s| s.is_some()).count() as u32
    }
}

/// Owns the lock for a single peer's send window plus its destination id.
pub struct SendWindow {
    pub dst: NodeId,
    inner: Mutex<SendWindowInner>,
}

impl SendWindow {
    pub fn new(dst: NodeId, maxwin: u16, mcs_params: McsParams, estimators: LinkEstimators, max_retransmissions: u32) -> Self {
        Self {
            dst,
            inner: Mutex::new(SendWindowInner {
                base: Seq::ZERO,
                max: None,
                win: maxwin,
                maxwin,
                slots: (0..maxwin).map(|_| None).collect(),
                pending: VecDeque::new(),
                estimators,
                mcs: McsChooser::new(mcs_params),
                max_retransmissions,
                unreachable: false,
                per_saturated_since: None,
            }),
        }
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, SendWindowInner> {
        self.inner.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcs::McsParams;

    fn params() -> McsParams {
        McsParams {
            min_mcsidx: 0,
            max_mcsidx: 3,
            up_per_threshold: 0.05,
            down_per_threshold: 0.2,
            alpha: 0.5,
            prob_floor: 0.01,
            mcsidx_broadcast: 0,
            mcsidx_ack: 0,
            mcs_fast_adjustment_period: 4,
        }
    }

    fn estimators() -> LinkEstimators {
        LinkEstimators::new(0.5, 5.0, 0.5, 5.0)
    }

    #[test]
    fn new_window_is_empty_with_base_zero() {
        let sw = SendWindow::new(NodeId(2), 4, params(), estimators(), 4);
        let inner = sw.lock();
        assert!(inner.is_empty());
        assert_eq!(inner.base, Seq::ZERO);
    }

    #[test]
    fn assigning_first_packet_sets_base_and_max_to_zero() {
        let sw = SendWindow::new(NodeId(2), 4, params(), estimators(), 4);
        let mut inner = sw.lock();
        inner.assign(Packet {
            nexthop: NodeId(2),
            curhop: NodeId(1),
            seq: Seq::ZERO,
            flags: Default::default(),
            mcsidx: 0,
            gain: 1.0,
            ehdr: Default::default(),
            payload: vec![1, 2, 3],
        });
        assert_eq!(inner.base, Seq::ZERO);
        assert_eq!(inner.max, Some(Seq::ZERO));
    }

    #[test]
    fn in_window_respects_win_size() {
        let sw = SendWindow::new(NodeId(2), 8, params(), estimators(), 4);
        let mut inner = sw.lock();
        inner.win = 4;
        assert!(inner.in_window(Seq(0)));
        assert!(inner.in_window(Seq(3)));
        assert!(!inner.in_window(Seq(4)));
    }

    #[test]
    fn clearing_slot_frees_it() {
        let sw = SendWindow::new(NodeId(2), 4, params(), estimators(), 4);
        let mut inner = sw.lock();
        inner.assign(Packet {
            nexthop: NodeId(2),
            curhop: NodeId(1),
            seq: Seq(1),
            flags: Default::default(),
            mcsidx: 0,
            gain: 1.0,
            ehdr: Default::default(),
            payload: vec![9],
        });
        assert!(inner.slot(Seq(1)).is_some());
        inner.clear_slot(Seq(1));
        assert!(inner.slot(Seq(1)).is_none());
    }

    #[test]
    fn outstanding_tracks_base_relative_to_max() {
        let sw = SendWindow::new(NodeId(2), 4, params(), estimators(), 4);
        let mut inner = sw.lock();
        assert!(!inner.outstanding());
        inner.assign(Packet {
            nexthop: NodeId(2),
            curhop: NodeId(1),
            seq: Seq::ZERO,
            flags: Default::default(),
            mcsidx: 0,
            gain: 1.0,
            ehdr: Default::default(),
            payload: vec![1],
        });
        assert!(inner.outstanding());
        inner.base = inner.base.next();
        assert!(!inner.outstanding());
    }
}
