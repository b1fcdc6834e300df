//! A shared in-process broadcast medium standing in for the radio front end
//! (`IqTransport`). Every [`SimTransport`] registered against the same
//! [`SimMedium`] hears every other transport's `send`, mirroring a single
//! shared-spectrum TDMA channel without any real hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use num_complex::Complex32;

use crate::clock::{Clock, Seconds};
use crate::error::TransportError;
use crate::neighborhood::NodeId;
use crate::transport::IqTransport;

pub struct SimMedium {
    inboxes: Mutex<HashMap<NodeId, VecDeque<Complex32>>>,
}

impl SimMedium {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inboxes: Mutex::new(HashMap::new()) })
    }

    fn register(&self, id: NodeId) {
        self.inboxes.lock().unwrap().entry(id).or_default();
    }

    fn broadcast_from(&self, from: NodeId, samples: &[Complex32]) {
        let mut inboxes = self.inboxes.lock().unwrap();
        for (id, inbox) in inboxes.iter_mut() {
            if *id != from {
                inbox.extend(samples.iter().copied());
            }
        }
    }

    fn drain(&self, id: NodeId, buf: &mut [Complex32]) -> usize {
        let mut inboxes = self.inboxes.lock().unwrap();
        let inbox = inboxes.entry(id).or_default();
        let n = inbox.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inbox.pop_front().expect("checked length above");
        }
        n
    }
}

/// One node's view of a [`SimMedium`]: an `IqTransport` double with no real
/// timed-burst behavior (`recv_at`/`start_burst`/`end_burst` are no-ops).
pub struct SimTransport {
    id: NodeId,
    medium: Arc<SimMedium>,
    clock: Clock,
}

impl SimTransport {
    pub fn new(id: NodeId, medium: Arc<SimMedium>, clock: Clock) -> Self {
        medium.register(id);
        Self { id, medium, clock }
    }
}

impl IqTransport for SimTransport {
    fn time_now(&self) -> Seconds {
        self.clock.now()
    }

    fn tx_rate(&self) -> f64 {
        1_000_000.0
    }

    fn rx_rate(&self) -> f64 {
        1_000_000.0
    }

    fn max_send_samps_per_packet(&self) -> usize {
        1 << 16
    }

    fn max_recv_samps_per_packet(&self) -> usize {
        1 << 16
    }

    fn recv_at(&self, _when: Seconds) -> Result<(), TransportError> {
        Ok(())
    }

    fn recv(&self, buf: &mut [Complex32]) -> Result<usize, TransportError> {
        Ok(self.medium.drain(self.id, buf))
    }

    fn start_burst(&self) {}
    fn end_burst(&self) {}

    fn send(&self, _when: Seconds, buf: &[Complex32]) -> Result<usize, TransportError> {
        self.medium.broadcast_from(self.id, buf);
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_other_nodes_not_sender() {
        let medium = SimMedium::new();
        let clock = Clock::new();
        let a = SimTransport::new(NodeId(1), Arc::clone(&medium), clock.clone());
        let b = SimTransport::new(NodeId(2), Arc::clone(&medium), clock.clone());

        let samples = vec![Complex32::new(1.0, 0.0), Complex32::new(2.0, 0.0)];
        a.send(0.0, &samples).unwrap();

        let mut buf = vec![Complex32::new(0.0, 0.0); 4];
        assert_eq!(b.recv(&mut buf).unwrap(), 2);
        assert_eq!(buf[0], samples[0]);

        // The sender does not hear its own transmission.
        let mut own = vec![Complex32::new(0.0, 0.0); 4];
        assert_eq!(a.recv(&mut own).unwrap(), 0);
    }
}
