//! A `TunTap` double that loops locally-written datagrams back as the next
//! readable input, and records ARP entry add/delete calls for assertions.
//! No real virtual network interface is touched.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::neighborhood::NodeId;
use crate::tuntap::TunTap;

pub struct LoopbackTunTap {
    queue: Mutex<VecDeque<Vec<u8>>>,
    arp_entries: Mutex<Vec<NodeId>>,
}

impl LoopbackTunTap {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            arp_entries: Mutex::new(Vec::new()),
        }
    }

    pub fn arp_entries(&self) -> Vec<NodeId> {
        self.arp_entries.lock().unwrap().clone()
    }
}

impl Default for LoopbackTunTap {
    fn default() -> Self {
        Self::new()
    }
}

impl TunTap for LoopbackTunTap {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut queue = self.queue.lock().unwrap();
        match queue.pop_front() {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.queue.lock().unwrap().push_back(buf.to_vec());
        Ok(buf.len())
    }

    fn add_arp_entry(&self, node_id: NodeId) {
        self.arp_entries.lock().unwrap().push(node_id);
    }

    fn delete_arp_entry(&self, node_id: NodeId) {
        self.arp_entries.lock().unwrap().retain(|&id| id != node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let tt = LoopbackTunTap::new();
        tt.write(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = tt.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn read_with_nothing_queued_returns_zero() {
        let tt = LoopbackTunTap::new();
        let mut buf = [0u8; 4];
        assert_eq!(tt.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn arp_entries_track_add_and_delete() {
        let tt = LoopbackTunTap::new();
        tt.add_arp_entry(NodeId(3));
        tt.add_arp_entry(NodeId(4));
        assert_eq!(tt.arp_entries(), vec![NodeId(3), NodeId(4)]);
        tt.delete_arp_entry(NodeId(3));
        assert_eq!(tt.arp_entries(), vec![NodeId(4)]);
    }
}
