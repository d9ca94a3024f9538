//! Server role: lobby hosting and the authoritative tick

use log::info;
use shared::network::{NetworkEvent, SetupError};
use shared::object::NetworkObject;
use shared::receiver::MessageSink;
use shared::scene::SceneError;
use shared::{LobbyId, NetworkConfig, NetworkId, PeerId, Session, Transport};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Authoritative participant owning the canonical object tree
pub struct Server {
    session: Session,
}

impl Server {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: NetworkConfig,
        events: mpsc::UnboundedSender<NetworkEvent>,
    ) -> Self {
        Self {
            session: Session::new(transport, config, events),
        }
    }

    /// Creates the lobby and starts hosting it
    pub fn start(&mut self, max_members: usize) -> Result<LobbyId, SetupError> {
        let lobby = self.session.network.setup_server(max_members)?;
        info!(
            "Server ready in lobby {} with scene '{}'",
            lobby,
            self.session.scene.name()
        );
        Ok(lobby)
    }

    pub fn update(&mut self, now: Instant) {
        self.session.update(now);
    }

    pub fn spawn(&mut self, object: NetworkObject, now: Instant) -> Result<NetworkId, SceneError> {
        self.session.spawn(object, now)
    }

    pub fn spawn_child(
        &mut self,
        parent_id: NetworkId,
        object: NetworkObject,
        now: Instant,
    ) -> Result<NetworkId, SceneError> {
        self.session
            .scene
            .add_child(&mut self.session.network, parent_id, object, now)
    }

    pub fn despawn(&mut self, network_id: NetworkId) -> Result<Vec<NetworkId>, SceneError> {
        self.session.scene.remove(&mut self.session.network, network_id)
    }

    pub fn despawn_child(
        &mut self,
        parent_id: NetworkId,
        child_id: NetworkId,
    ) -> Result<Vec<NetworkId>, SceneError> {
        self.session
            .scene
            .remove_child(&mut self.session.network, parent_id, child_id)
    }

    pub fn object_mut(&mut self, network_id: NetworkId) -> Option<&mut NetworkObject> {
        self.session.scene.find_mut(network_id)
    }

    pub fn set_active_scene(&mut self, name: &str) -> usize {
        self.session.set_active_scene(name)
    }

    pub fn client_count(&self) -> usize {
        let local = self.session.network.local_peer();
        self.session
            .network
            .lobby_members()
            .keys()
            .filter(|peer| **peer != local)
            .count()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.session.network.transport()
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.session.network.running_flag()
    }

    pub fn stop(&mut self) {
        info!("Server shutting down");
        self.session.leave();
    }
}

impl MessageSink for Server {
    fn process_received_message(&mut self, raw: &[u8], sender: PeerId, now: Instant) {
        self.session.process_received_message(raw, sender, now);
    }
}
