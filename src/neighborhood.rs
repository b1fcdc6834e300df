//! Peer identifiers, per-node metadata, and the node map.
//!
//! Grounded on `original_source/src/Node.hh` and `Neighborhood.hh`: a
//! structural mutex guards add/remove of entries, while each `Node`'s own
//! mutable fields are independently guarded so hot-path PER/MCS updates
//! never contend with neighborhood membership changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An 8-bit node identifier. `255` is reserved for broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u8);

impl NodeId {
    pub const BROADCAST: NodeId = NodeId(255);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for NodeId {
    fn from(v: u8) -> Self {
        NodeId(v)
    }
}

/// GPS fix, supplemented from `original_source/src/Node.hh`; not required by
/// the core ARQ/TDMA path but carried as per-node metadata for any future
/// location-aware extension (e.g. directional gain).
#[derive(Debug, Clone, Copy, Default)]
pub struct GpsLocation {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub timestamp: f64,
}

/// Mutable per-node metadata outside the ARQ send/recv windows.
#[derive(Debug)]
pub struct NodeState {
    pub loc: GpsLocation,
    pub is_gateway: bool,
    pub emcon: bool,
    pub unreachable: bool,
    /// Multiplicative soft TX gain (linear, not dB).
    soft_gain: f32,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            loc: GpsLocation::default(),
            is_gateway: false,
            emcon: false,
            unreachable: false,
            soft_gain: 1.0,
        }
    }
}

impl NodeState {
    /// Set the soft TX gain from a dBFS value: `g = 10^(dB/20)`.
    pub fn set_soft_tx_gain_db(&mut self, db: f32) {
        self.soft_gain = 10f32.powf(db / 20.0);
    }

    /// Current soft TX gain in dBFS: `20*log10(g)`.
    pub fn soft_tx_gain_db(&self) -> f32 {
        20.0 * self.soft_gain.log10()
    }

    pub fn soft_gain_linear(&self) -> f32 {
        self.soft_gain
    }
}

/// A peer entry: stable identity plus independently-locked mutable state.
pub struct Node {
    pub id: NodeId,
    state: Mutex<NodeState>,
}

impl Node {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            state: Mutex::new(NodeState::default()),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&NodeState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }

    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

/// Callback invoked (outside the structural lock) when a new node is
/// observed for the first time.
pub type NewNodeCallback = Box<dyn Fn(&Arc<Node>) + Send + Sync>;

/// The map of known peers.
///
/// Per `spec.md` §3: node entries are created on first observation and
/// destroyed on explicit remove. Creation triggers an ARP insertion on the
/// TUN/TAP device and the registered callback; removal triggers deletion.
pub struct Neighborhood {
    pub me: Arc<Node>,
    tuntap: Arc<dyn crate::tuntap::TunTap>,
    nodes: Mutex<HashMap<NodeId, Arc<Node>>>,
    new_node_callback: Mutex<Option<NewNodeCallback>>,
}

impl Neighborhood {
    pub fn new(this_node_id: NodeId, tuntap: Arc<dyn crate::tuntap::TunTap>) -> Self {
        let me = Arc::new(Node::new(this_node_id));
        let mut nodes = HashMap::new();
        nodes.insert(this_node_id, Arc::clone(&me));
        Self {
            me,
            tuntap,
            nodes: Mutex::new(nodes),
            new_node_callback: Mutex::new(None),
        }
    }

    pub fn set_new_node_callback(&self, cb: NewNodeCallback) {
        *self.new_node_callback.lock().unwrap() = Some(cb);
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.lock().unwrap().contains_key(&id)
    }

    /// Get (or lazily create) the entry for `id`.
    pub fn get_or_create(&self, id: NodeId) -> Arc<Node> {
        let created;
        let node = {
            let mut nodes = self.nodes.lock().unwrap();
            match nodes.get(&id) {
                Some(existing) => {
                    created = false;
                    Arc::clone(existing)
                }
                None => {
                    let node = Arc::new(Node::new(id));
                    nodes.insert(id, Arc::clone(&node));
                    created = true;
                    if id != self.me.id {
                        self.tuntap.add_arp_entry(id);
                    }
                    node
                }
            }
        };

        // Callback runs outside the structural lock, matching
        // Neighborhood::getNode in original_source/src/Neighborhood.hh.
        if created {
            if let Some(cb) = self.new_node_callback.lock().unwrap().as_ref() {
                cb(&node);
            }
        }
        node
    }

    pub fn get(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.lock().unwrap().get(&id).cloned()
    }

    /// Remove a node entry, deleting its TUN/TAP ARP mapping.
    pub fn remove(&self, id: NodeId) {
        let removed = self.nodes.lock().unwrap().remove(&id);
        if removed.is_some() {
            self.tuntap.delete_arp_entry(id);
        }
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.lock().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn foreach(&self, mut f: impl FnMut(&Arc<Node>)) {
        let nodes = self.nodes.lock().unwrap();
        for node in nodes.values() {
            f(node);
        }
    }
}
