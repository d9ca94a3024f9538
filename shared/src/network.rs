//! Connection management: session role, lobby membership and message routing
//!
//! The [`NetworkManager`] owns everything about "who am I talking to": the
//! transport handle, the role taken in the current lobby, the members seen
//! through presence events and the fragment codec used on every send and
//! receive. It also hosts the latency monitor and the network id generator
//! so that the subsystems hanging off a session are reachable from one place.

use crate::codec::{CodecError, Decoded, FragmentCodec};
use crate::config::NetworkConfig;
use crate::latency::LatencyMonitor;
use crate::net_id::NetIdGenerator;
use crate::protocol::Message;
use crate::transport::{PresenceEvent, Transport};
use crate::{LobbyId, NetworkId, PeerId};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Unset,
    Server,
    Client,
}

/// Local notifications raised for the application layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    ServerStarted {
        lobby: LobbyId,
    },
    ClientConnected {
        lobby: LobbyId,
    },
    LobbyJoin {
        peer: PeerId,
        name: String,
        lobby: LobbyId,
    },
    LobbyLeave {
        peer: PeerId,
        name: String,
        lobby: LobbyId,
    },
    SelfLobbyLeave,
    ConnectionFailed {
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("no active session")]
    Inactive,
    #[error("{role:?} may not send to peer {peer}")]
    NotPermitted { role: Role, peer: PeerId },
    #[error("transport rejected message to peer {peer}")]
    Rejected { peer: PeerId },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("a session is already running")]
    AlreadyRunning,
    #[error("transport could not create a lobby")]
    LobbyCreationFailed,
    #[error("failed to join lobby {0}")]
    JoinFailed(LobbyId),
    #[error("lobby {0} has no owner")]
    NoLobbyOwner(LobbyId),
}

/// Per-session connection state, reset wholesale when the session ends
#[derive(Debug, Default)]
pub struct ConnectionState {
    pub role: Role,
    /// Client: handshake finished. Server: always true while hosting.
    pub connected: bool,
    /// Raised once a full scene sync has been applied locally
    pub complete_scene_sync: bool,
    pub lobby_id: Option<LobbyId>,
    pub server_peer: Option<PeerId>,
    pub lobby_members: HashMap<PeerId, String>,
}

pub struct NetworkManager {
    transport: Arc<dyn Transport>,
    config: NetworkConfig,
    state: ConnectionState,
    running: Arc<AtomicBool>,
    codec: FragmentCodec,
    latency: LatencyMonitor,
    net_ids: NetIdGenerator,
    events: mpsc::UnboundedSender<NetworkEvent>,
}

impl NetworkManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: NetworkConfig,
        events: mpsc::UnboundedSender<NetworkEvent>,
    ) -> Self {
        Self {
            codec: FragmentCodec::new(config.fragment_size, config.fragment_ttl),
            latency: LatencyMonitor::new(config.ema_alpha, config.ping_interval),
            net_ids: NetIdGenerator::new(),
            state: ConnectionState::default(),
            running: Arc::new(AtomicBool::new(false)),
            transport,
            config,
            events,
        }
    }

    // ------------------------
    // Session setup
    // ------------------------

    /// Creates a lobby and becomes its authoritative server
    pub fn setup_server(&mut self, max_members: usize) -> Result<LobbyId, SetupError> {
        if self.is_running() {
            return Err(SetupError::AlreadyRunning);
        }
        let lobby = self
            .transport
            .create_session_group(max_members)
            .ok_or(SetupError::LobbyCreationFailed)?;

        let local = self.local_peer();
        let mut lobby_members = HashMap::new();
        lobby_members.insert(local, self.transport.display_name(local));

        self.state = ConnectionState {
            role: Role::Server,
            connected: true,
            complete_scene_sync: true,
            lobby_id: Some(lobby),
            server_peer: Some(local),
            lobby_members,
        };
        self.running = Arc::new(AtomicBool::new(true));

        info!("Hosting lobby {} as {}", lobby, local);
        self.emit(NetworkEvent::ServerStarted { lobby });
        Ok(lobby)
    }

    /// Joins an existing lobby as a client; the handshake is driven separately
    pub fn join_lobby(&mut self, lobby: LobbyId) -> Result<(), SetupError> {
        if self.is_running() {
            return Err(SetupError::AlreadyRunning);
        }
        if !self.transport.join(lobby) {
            return Err(SetupError::JoinFailed(lobby));
        }
        let Some(owner) = self.transport.lobby_owner(lobby) else {
            self.transport.leave(lobby);
            return Err(SetupError::NoLobbyOwner(lobby));
        };

        let lobby_members = self
            .transport
            .lobby_members(lobby)
            .into_iter()
            .map(|peer| (peer, self.transport.display_name(peer)))
            .collect();

        self.state = ConnectionState {
            role: Role::Client,
            connected: false,
            complete_scene_sync: false,
            lobby_id: Some(lobby),
            server_peer: Some(owner),
            lobby_members,
        };
        self.running = Arc::new(AtomicBool::new(true));

        info!("Joined lobby {} hosted by {}", lobby, owner);
        Ok(())
    }

    /// Tears the session down; safe to call repeatedly
    pub fn leave(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        if let Some(lobby) = self.state.lobby_id {
            self.transport.leave(lobby);
        }
        if was_running {
            self.transport.close_all_sessions();
        }

        self.codec.clear();
        self.latency.reset();
        self.state = ConnectionState::default();

        if was_running {
            info!("Left lobby, network state reset");
            self.emit(NetworkEvent::SelfLobbyLeave);
        }
    }

    // ------------------------
    // Sending
    // ------------------------

    pub fn send_to(&mut self, peer: PeerId, message: &Message) -> Result<(), SendError> {
        if !self.is_running() {
            return Err(SendError::Inactive);
        }
        let permitted = match self.state.role {
            Role::Server => {
                peer != self.local_peer() && self.state.lobby_members.contains_key(&peer)
            }
            Role::Client => self.state.server_peer == Some(peer),
            Role::Unset => false,
        };
        if !permitted {
            return Err(SendError::NotPermitted {
                role: self.state.role,
                peer,
            });
        }

        self.transport.accept_session(peer);
        for frame in self.codec.encode(message)? {
            let bytes = frame.to_bytes()?;
            if !self.transport.send(peer, &bytes) {
                return Err(SendError::Rejected { peer });
            }
        }
        Ok(())
    }

    pub fn send_to_server(&mut self, message: &Message) -> Result<(), SendError> {
        let Some(server) = self.state.server_peer else {
            return Err(SendError::Inactive);
        };
        self.send_to(server, message)
    }

    /// Sends to every lobby member except ourselves and the server
    pub fn broadcast(&mut self, message: &Message) -> usize {
        let local = self.local_peer();
        let server = self.state.server_peer;
        let targets: Vec<PeerId> = self
            .state
            .lobby_members
            .keys()
            .copied()
            .filter(|peer| *peer != local && Some(*peer) != server)
            .collect();

        let mut sent = 0;
        for peer in targets {
            match self.send_to(peer, message) {
                Ok(()) => sent += 1,
                Err(e) => error!("Failed to send {} to {}: {}", message.kind(), peer, e),
            }
        }
        sent
    }

    // ------------------------
    // Receiving
    // ------------------------

    /// Runs raw transport bytes through the codec
    pub fn decode(&mut self, raw: &[u8], sender: PeerId, now: Instant) -> Option<Message> {
        match self.codec.decode_bytes(raw, sender, now) {
            Ok(Decoded::Complete(message)) => Some(message),
            Ok(Decoded::Incomplete) => None,
            Err(e) => {
                warn!("Dropping message from {}: {}", sender, e);
                None
            }
        }
    }

    /// Whether messages from `sender` belong to this session
    pub fn accepts_sender(&mut self, sender: PeerId) -> bool {
        match self.state.role {
            Role::Client => self.state.server_peer == Some(sender),
            Role::Server => {
                if !self.state.lobby_members.contains_key(&sender) {
                    // The join may have raced ahead of our presence poll
                    self.update_presence();
                }
                self.state.lobby_members.contains_key(&sender)
            }
            Role::Unset => false,
        }
    }

    /// Hook for ping traffic; returns true when the message was consumed
    pub fn receive_message(&mut self, message: &Message, sender: PeerId, now: Instant) -> bool {
        match message {
            Message::PingRequest { time, .. } => {
                let response = Message::PingResponse { time: *time };
                if let Err(e) = self.send_to(sender, &response) {
                    warn!("Failed to answer ping from {}: {}", sender, e);
                }
                true
            }
            Message::PingResponse { time } => {
                let smoothed = self.latency.on_pong(*time, now);
                debug!("Ping response, smoothed ping {:.3}s", smoothed);
                true
            }
            _ => false,
        }
    }

    /// Sends a ping to the server if the rate limit allows it
    pub fn send_ping_request(&mut self, now: Instant) {
        if !self.is_running() || !self.is_client() {
            return;
        }
        let Some(time) = self.latency.poll_ping(now) else {
            return;
        };
        let request = Message::PingRequest {
            time,
            sender_id: self.local_peer(),
        };
        if let Err(e) = self.send_to_server(&request) {
            warn!("Failed to send ping: {}", e);
        }
    }

    /// Applies lobby join/leave notifications from the transport
    pub fn update_presence(&mut self) {
        for event in self.transport.poll_presence() {
            match event {
                PresenceEvent::Joined { peer, lobby } => {
                    if Some(lobby) != self.state.lobby_id {
                        continue;
                    }
                    let name = self.transport.display_name(peer);
                    if self
                        .state
                        .lobby_members
                        .insert(peer, name.clone())
                        .is_some()
                    {
                        debug!("{} ({}) already present in lobby {}", name, peer, lobby);
                        continue;
                    }
                    info!("{} ({}) joined lobby {}", name, peer, lobby);
                    self.emit(NetworkEvent::LobbyJoin { peer, name, lobby });
                }
                PresenceEvent::Left { peer, lobby } => {
                    if Some(lobby) != self.state.lobby_id {
                        continue;
                    }
                    let name = self
                        .state
                        .lobby_members
                        .remove(&peer)
                        .unwrap_or_else(|| "Unknown Player".to_string());
                    info!("{} ({}) left lobby {}", name, peer, lobby);
                    self.emit(NetworkEvent::LobbyLeave { peer, name, lobby });

                    if self.is_client() && self.state.server_peer == Some(peer) {
                        warn!("Server left lobby {}, disconnecting", lobby);
                        self.leave();
                        return;
                    }
                }
            }
        }
    }

    pub fn emit(&self, event: NetworkEvent) {
        if self.events.send(event).is_err() {
            debug!("Network event dropped, no listener");
        }
    }

    // ------------------------
    // Accessors
    // ------------------------

    pub fn allocate_network_id(&mut self) -> NetworkId {
        self.net_ids.next_id()
    }

    pub fn role(&self) -> Role {
        self.state.role
    }

    pub fn is_server(&self) -> bool {
        self.state.role == Role::Server
    }

    pub fn is_client(&self) -> bool {
        self.state.role == Role::Client
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flag observed by the background receive loop of the current session
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.state.connected = connected;
    }

    pub fn scene_synced(&self) -> bool {
        self.state.complete_scene_sync
    }

    pub fn set_scene_synced(&mut self, synced: bool) {
        self.state.complete_scene_sync = synced;
    }

    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    pub fn server_peer(&self) -> Option<PeerId> {
        self.state.server_peer
    }

    pub fn lobby_id(&self) -> Option<LobbyId> {
        self.state.lobby_id
    }

    pub fn lobby_members(&self) -> &HashMap<PeerId, String> {
        &self.state.lobby_members
    }

    pub fn latency(&self) -> &LatencyMonitor {
        &self.latency
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn pending_fragment_sets(&self) -> usize {
        self.codec.pending_sets()
    }
}
