//! TUN/TAP device contract (`spec.md` §6). The real virtual network
//! interface is out of scope for this crate; this trait is the seam the
//! network-ingress/egress threads drive.

use crate::neighborhood::NodeId;

pub trait TunTap: Send + Sync {
    /// Blocking read of the next IP datagram into `buf`, returning the
    /// number of bytes written.
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;
    /// Blocking write of an IP datagram.
    fn write(&self, buf: &[u8]) -> std::io::Result<usize>;

    fn add_arp_entry(&self, node_id: NodeId);
    fn delete_arp_entry(&self, node_id: NodeId);
}
