//! Client-side tracking of objects referenced before they were created
//!
//! State deltas can overtake the `add_object` that introduces their target.
//! The first time a client sees such an id it asks the server for the object,
//! then keeps asking on a fixed cadence until the object arrives or the
//! attempts run out.

use crate::network::NetworkManager;
use crate::protocol::Message;
use crate::NetworkId;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct PendingRequest {
    attempts: u32,
    last_request: Instant,
}

#[derive(Debug)]
pub struct MissingObjects {
    pending: HashMap<NetworkId, PendingRequest>,
    abandoned: HashSet<NetworkId>,
    retry: Duration,
    max_attempts: u32,
}

impl MissingObjects {
    pub fn new(retry: Duration, max_attempts: u32) -> Self {
        Self {
            pending: HashMap::new(),
            abandoned: HashSet::new(),
            retry,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Notes a reference to an unknown object, requesting it on first sight
    pub fn on_unknown(&mut self, network: &mut NetworkManager, network_id: NetworkId, now: Instant) {
        if self.pending.contains_key(&network_id) || self.abandoned.contains(&network_id) {
            return;
        }
        debug!("Object {} unknown, requesting it from the server", network_id);
        Self::request(network, network_id);
        self.pending.insert(
            network_id,
            PendingRequest {
                attempts: 1,
                last_request: now,
            },
        );
    }

    /// Re-sends requests whose retry interval elapsed
    pub fn update(&mut self, network: &mut NetworkManager, now: Instant) {
        let mut exhausted = Vec::new();
        for (network_id, pending) in self.pending.iter_mut() {
            if now.saturating_duration_since(pending.last_request) < self.retry {
                continue;
            }
            if pending.attempts >= self.max_attempts {
                exhausted.push(*network_id);
                continue;
            }
            Self::request(network, *network_id);
            pending.attempts += 1;
            pending.last_request = now;
        }

        for network_id in exhausted {
            warn!(
                "Object {} still missing after {} request(s), giving up",
                network_id, self.max_attempts
            );
            self.pending.remove(&network_id);
            self.abandoned.insert(network_id);
        }
    }

    /// Hook run for every inbound message; never consumes it
    pub fn receive_message(&mut self, message: &Message) {
        match message {
            Message::AddObject { network_id, .. } => {
                self.resolve(*network_id);
            }
            Message::AddNetworkChild { child_id, .. } => {
                self.resolve(*child_id);
            }
            Message::RemoveObject { network_id } => self.forget(*network_id),
            Message::RemoveNetworkChild { child_id, .. } => self.forget(*child_id),
            _ => {}
        }
    }

    /// Drops every trace of an id the server destroyed
    fn forget(&mut self, network_id: NetworkId) {
        let was_pending = self.pending.remove(&network_id).is_some();
        if self.abandoned.remove(&network_id) || was_pending {
            debug!("Object {} was removed, no longer tracked", network_id);
        }
    }

    pub fn resolve(&mut self, network_id: NetworkId) -> bool {
        self.abandoned.remove(&network_id);
        let resolved = self.pending.remove(&network_id).is_some();
        if resolved {
            info!("Missing object {} arrived", network_id);
        }
        resolved
    }

    pub fn is_pending(&self, network_id: NetworkId) -> bool {
        self.pending.contains_key(&network_id)
    }

    pub fn attempts(&self, network_id: NetworkId) -> Option<u32> {
        self.pending.get(&network_id).map(|pending| pending.attempts)
    }

    pub fn is_abandoned(&self, network_id: NetworkId) -> bool {
        self.abandoned.contains(&network_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.abandoned.clear();
    }

    fn request(network: &mut NetworkManager, network_id: NetworkId) {
        let request = Message::RequestMissingObject {
            network_id,
            sender_id: network.local_peer(),
        };
        if let Err(e) = network.send_to_server(&request) {
            warn!("Failed to request missing object {}: {}", network_id, e);
        }
    }
}
