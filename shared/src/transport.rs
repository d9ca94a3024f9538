//! The P2P transport seam and an in-memory lobby implementation
//!
//! [`Transport`] mirrors what a lobby-based P2P service offers: session groups
//! (lobbies) with an owner, presence notifications, and unreliable per-peer
//! message delivery that already tags every message with its sender.
//! [`LoopbackHub`] implements it in process so a server and any number of
//! clients can share one lobby inside tests or the demo binary.

use crate::{LobbyId, PeerId};
use log::debug;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lobby membership change reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Joined { peer: PeerId, lobby: LobbyId },
    Left { peer: PeerId, lobby: LobbyId },
}

pub trait Transport: Send + Sync {
    fn local_peer(&self) -> PeerId;
    fn display_name(&self, peer: PeerId) -> String;

    /// Creates a lobby owned by the local peer
    fn create_session_group(&self, max_members: usize) -> Option<LobbyId>;
    fn join(&self, lobby: LobbyId) -> bool;
    fn leave(&self, lobby: LobbyId);
    fn lobby_owner(&self, lobby: LobbyId) -> Option<PeerId>;
    fn lobby_members(&self, lobby: LobbyId) -> Vec<PeerId>;
    fn poll_presence(&self) -> Vec<PresenceEvent>;

    fn accept_session(&self, peer: PeerId) -> bool;
    fn close_all_sessions(&self);
    fn send(&self, peer: PeerId, bytes: &[u8]) -> bool;
    /// Non-blocking poll for the next inbound message
    fn receive(&self) -> Option<(Vec<u8>, PeerId)>;
}

struct Lobby {
    owner: PeerId,
    members: Vec<PeerId>,
    max_members: usize,
}

#[derive(Default)]
struct HubState {
    next_peer: PeerId,
    next_lobby: LobbyId,
    names: HashMap<PeerId, String>,
    inboxes: HashMap<PeerId, VecDeque<(Vec<u8>, PeerId)>>,
    presence: HashMap<PeerId, VecDeque<PresenceEvent>>,
    sessions: HashMap<PeerId, HashSet<PeerId>>,
    lobbies: HashMap<LobbyId, Lobby>,
    links_down: HashSet<PeerId>,
    delivered: u64,
}

impl HubState {
    fn notify(&mut self, lobby: LobbyId, event: PresenceEvent) {
        let members = match self.lobbies.get(&lobby) {
            Some(lobby) => lobby.members.clone(),
            None => return,
        };
        for member in members {
            self.presence
                .entry(member)
                .or_default()
                .push_back(event.clone());
        }
    }
}

/// Shared in-memory switchboard that loopback transports attach to
pub struct LoopbackHub {
    state: Mutex<HubState>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                next_peer: 76561198000000001,
                next_lobby: 109775240000000001,
                ..HubState::default()
            }),
        })
    }

    /// Registers a new peer and returns its transport handle
    pub fn connect(self: &Arc<Self>, name: &str) -> Arc<LoopbackTransport> {
        let mut state = self.lock();
        let peer = state.next_peer;
        state.next_peer += 1;
        state.names.insert(peer, name.to_string());
        state.inboxes.insert(peer, VecDeque::new());

        Arc::new(LoopbackTransport {
            hub: Arc::clone(self),
            peer,
        })
    }

    /// Cuts or restores delivery to and from a peer
    pub fn set_link_down(&self, peer: PeerId, down: bool) {
        let mut state = self.lock();
        if down {
            state.links_down.insert(peer);
        } else {
            state.links_down.remove(&peer);
        }
    }

    /// Number of messages delivered since the hub was created
    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }

    pub fn pending_for(&self, peer: PeerId) -> usize {
        self.lock().inboxes.get(&peer).map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // A panicking test thread must not wedge every other peer
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    peer: PeerId,
}

impl Transport for LoopbackTransport {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn display_name(&self, peer: PeerId) -> String {
        self.hub
            .lock()
            .names
            .get(&peer)
            .cloned()
            .unwrap_or_else(|| "Unknown Player".to_string())
    }

    fn create_session_group(&self, max_members: usize) -> Option<LobbyId> {
        if max_members == 0 {
            return None;
        }
        let mut state = self.hub.lock();
        let lobby = state.next_lobby;
        state.next_lobby += 1;
        state.lobbies.insert(
            lobby,
            Lobby {
                owner: self.peer,
                members: vec![self.peer],
                max_members,
            },
        );
        Some(lobby)
    }

    fn join(&self, lobby_id: LobbyId) -> bool {
        let mut state = self.hub.lock();
        {
            let Some(lobby) = state.lobbies.get_mut(&lobby_id) else {
                return false;
            };
            if !lobby.members.contains(&self.peer) {
                if lobby.members.len() >= lobby.max_members {
                    return false;
                }
                lobby.members.push(self.peer);
            }
        }
        state.notify(
            lobby_id,
            PresenceEvent::Joined {
                peer: self.peer,
                lobby: lobby_id,
            },
        );
        true
    }

    fn leave(&self, lobby_id: LobbyId) {
        let mut state = self.hub.lock();
        state.notify(
            lobby_id,
            PresenceEvent::Left {
                peer: self.peer,
                lobby: lobby_id,
            },
        );
        let emptied = match state.lobbies.get_mut(&lobby_id) {
            Some(lobby) => {
                lobby.members.retain(|member| *member != self.peer);
                lobby.members.is_empty()
            }
            None => false,
        };
        if emptied {
            state.lobbies.remove(&lobby_id);
        }
        // We no longer care about presence in a lobby we left
        if let Some(queue) = state.presence.get_mut(&self.peer) {
            queue.clear();
        }
    }

    fn lobby_owner(&self, lobby: LobbyId) -> Option<PeerId> {
        self.hub.lock().lobbies.get(&lobby).map(|lobby| lobby.owner)
    }

    fn lobby_members(&self, lobby: LobbyId) -> Vec<PeerId> {
        self.hub
            .lock()
            .lobbies
            .get(&lobby)
            .map(|lobby| lobby.members.clone())
            .unwrap_or_default()
    }

    fn poll_presence(&self) -> Vec<PresenceEvent> {
        self.hub
            .lock()
            .presence
            .get_mut(&self.peer)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    fn accept_session(&self, peer: PeerId) -> bool {
        let mut state = self.hub.lock();
        if !state.inboxes.contains_key(&peer) {
            return false;
        }
        state.sessions.entry(self.peer).or_default().insert(peer);
        true
    }

    fn close_all_sessions(&self) {
        let mut state = self.hub.lock();
        state.sessions.remove(&self.peer);
        if let Some(inbox) = state.inboxes.get_mut(&self.peer) {
            inbox.clear();
        }
    }

    fn send(&self, peer: PeerId, bytes: &[u8]) -> bool {
        let mut state = self.hub.lock();
        if state.links_down.contains(&peer) || state.links_down.contains(&self.peer) {
            debug!("Dropping {} bytes from {} to {}", bytes.len(), self.peer, peer);
            return false;
        }
        let Some(inbox) = state.inboxes.get_mut(&peer) else {
            return false;
        };
        inbox.push_back((bytes.to_vec(), self.peer));
        state.delivered += 1;
        true
    }

    fn receive(&self) -> Option<(Vec<u8>, PeerId)> {
        self.hub
            .lock()
            .inboxes
            .get_mut(&self.peer)
            .and_then(VecDeque::pop_front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_get_distinct_ids() {
        let hub = LoopbackHub::new();
        let a = hub.connect("alice");
        let b = hub.connect("bob");
        assert_ne!(a.local_peer(), b.local_peer());
        assert_eq!(a.display_name(b.local_peer()), "bob");
        assert_eq!(a.display_name(1), "Unknown Player");
    }

    #[test]
    fn test_send_and_receive() {
        let hub = LoopbackHub::new();
        let a = hub.connect("alice");
        let b = hub.connect("bob");

        assert!(a.send(b.local_peer(), b"hello"));
        assert_eq!(hub.pending_for(b.local_peer()), 1);
        assert_eq!(b.receive(), Some((b"hello".to_vec(), a.local_peer())));
        assert_eq!(b.receive(), None);
        assert!(!a.send(12345, b"nobody"));
    }

    #[test]
    fn test_link_down_drops_messages() {
        let hub = LoopbackHub::new();
        let a = hub.connect("alice");
        let b = hub.connect("bob");

        hub.set_link_down(b.local_peer(), true);
        assert!(!a.send(b.local_peer(), b"lost"));
        assert!(!b.send(a.local_peer(), b"lost"));

        hub.set_link_down(b.local_peer(), false);
        assert!(a.send(b.local_peer(), b"back"));
        assert_eq!(hub.delivered(), 1);
    }

    #[test]
    fn test_lobby_membership_and_presence() {
        let hub = LoopbackHub::new();
        let host = hub.connect("host");
        let guest = hub.connect("guest");

        let lobby = host.create_session_group(4).unwrap();
        assert_eq!(host.lobby_owner(lobby), Some(host.local_peer()));
        assert!(guest.join(lobby));
        assert_eq!(
            host.lobby_members(lobby),
            vec![host.local_peer(), guest.local_peer()]
        );

        let joined = PresenceEvent::Joined {
            peer: guest.local_peer(),
            lobby,
        };
        assert_eq!(host.poll_presence(), vec![joined.clone()]);
        assert_eq!(guest.poll_presence(), vec![joined]);

        guest.leave(lobby);
        assert_eq!(
            host.poll_presence(),
            vec![PresenceEvent::Left {
                peer: guest.local_peer(),
                lobby
            }]
        );
        assert!(guest.poll_presence().is_empty());
        assert_eq!(host.lobby_members(lobby), vec![host.local_peer()]);
    }

    #[test]
    fn test_full_lobby_rejects_join() {
        let hub = LoopbackHub::new();
        let host = hub.connect("host");
        let guest = hub.connect("guest");

        let lobby = host.create_session_group(1).unwrap();
        assert!(!guest.join(lobby));
        assert!(!guest.join(lobby + 1000));
        assert!(host.create_session_group(0).is_none());
    }
}
