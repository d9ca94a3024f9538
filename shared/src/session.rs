//! One participant's replication session
//!
//! A [`Session`] wires the connection manager to the object directory, the
//! class registry and the missing-object tracker, and implements the inbound
//! dispatch shared by both roles. Inbound messages visit the latency monitor
//! first, then the missing-object tracker, then the role-specific handlers.

use crate::classes::register_builtin_classes;
use crate::config::NetworkConfig;
use crate::factory::ObjectFactory;
use crate::missing::MissingObjects;
use crate::network::{NetworkEvent, NetworkManager, SendError};
use crate::object::NetworkObject;
use crate::protocol::{Message, ObjectRecord, SceneData};
use crate::receiver::MessageSink;
use crate::scene::{NetworkScene, SceneError};
use crate::transport::Transport;
use crate::{NetworkId, PeerId};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

pub const DEFAULT_SCENE: &str = "main";

pub struct Session {
    pub network: NetworkManager,
    pub scene: NetworkScene,
    pub factory: ObjectFactory,
    pub missing: MissingObjects,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: NetworkConfig,
        events: mpsc::UnboundedSender<NetworkEvent>,
    ) -> Self {
        let mut factory = ObjectFactory::new();
        register_builtin_classes(&mut factory);

        Self {
            missing: MissingObjects::new(
                config.missing_object_retry,
                config.missing_object_attempts,
            ),
            network: NetworkManager::new(transport, config, events),
            scene: NetworkScene::new(DEFAULT_SCENE),
            factory,
        }
    }

    /// Decodes raw transport bytes and dispatches the message once complete
    pub fn process_received_message(&mut self, raw: &[u8], sender: PeerId, now: Instant) {
        if let Some(message) = self.network.decode(raw, sender, now) {
            self.dispatch(message, sender, now);
        }
    }

    pub fn dispatch(&mut self, message: Message, sender: PeerId, now: Instant) {
        if !self.network.accepts_sender(sender) {
            warn!("Ignoring {} from {}, not part of this session", message.kind(), sender);
            return;
        }
        if self.network.receive_message(&message, sender, now) {
            return;
        }
        self.missing.receive_message(&message);

        if self.network.is_server() {
            self.handle_as_server(message, sender, now);
        } else {
            self.handle_as_client(message, now);
        }
    }

    fn handle_as_server(&mut self, message: Message, sender: PeerId, now: Instant) {
        match message {
            Message::RequestSceneSync { .. } => {
                if let Err(e) = self.send_scene_sync(sender) {
                    warn!("Failed to send scene sync to {}: {}", sender, e);
                }
            }
            Message::ForceSync => {
                debug!("Force sync requested by {}", sender);
                self.scene.force_sync(&mut self.network, now);
            }
            Message::RequestMissingObject { network_id, .. } => {
                if let Err(e) = self.scene.send_object_to(&mut self.network, sender, network_id) {
                    debug!("Cannot resend object to {}: {}", sender, e);
                }
            }
            other => debug!("Server ignoring {} from {}", other.kind(), sender),
        }
    }

    fn handle_as_client(&mut self, message: Message, now: Instant) {
        match message {
            Message::SceneSync {
                scene_name,
                scene_data,
            } => self.apply_scene_sync(&scene_name, &scene_data),
            Message::AddObject {
                object_name,
                network_id,
                steam_id,
                class_name,
                parent_id,
            } => {
                let record = ObjectRecord {
                    class_name,
                    object_name,
                    network_id,
                    steam_id,
                    parent_id,
                };
                if self.scene.apply_add_object(&self.factory, &record) {
                    self.scene.configure_all(&self.network);
                }
            }
            Message::AddNetworkChild {
                parent_id,
                child_id,
                child_class,
                child_name,
                steam_id,
                layer,
            } => {
                let record = ObjectRecord {
                    class_name: child_class,
                    object_name: child_name,
                    network_id: child_id,
                    steam_id,
                    parent_id: Some(parent_id),
                };
                if self.scene.apply_add_object(&self.factory, &record) {
                    if let Some(child) = self.scene.find_mut(child_id) {
                        child.layer = layer;
                        child.configure(self.network.config());
                    }
                }
            }
            Message::RemoveObject { network_id } => {
                if let Err(e) = self.scene.remove(&mut self.network, network_id) {
                    debug!("Remove ignored: {}", e);
                }
                self.missing.resolve(network_id);
            }
            Message::RemoveNetworkChild {
                parent_id,
                child_id,
            } => {
                if let Err(e) = self.scene.remove_child(&mut self.network, parent_id, child_id) {
                    debug!("Remove child ignored: {}", e);
                }
                self.missing.resolve(child_id);
            }
            Message::SyncNetworkObject {
                network_id,
                active,
                steam_id,
                layer,
                parent_id,
            } => {
                if !self
                    .scene
                    .apply_object_state(network_id, active, steam_id, layer, parent_id)
                {
                    self.on_unknown_object(network_id, now);
                }
            }
            delta @ (Message::SyncTransform { .. }
            | Message::SyncSprite { .. }
            | Message::SyncComponent { .. }) => {
                if !self.scene.apply_component(&delta) {
                    if let Some(network_id) = delta.target_object() {
                        self.on_unknown_object(network_id, now);
                    }
                }
            }
            other => debug!("Client ignoring {}", other.kind()),
        }
    }

    fn on_unknown_object(&mut self, network_id: NetworkId, now: Instant) {
        // Before the first scene sync every object is unknown
        if !self.network.scene_synced() {
            return;
        }
        debug!("Dropping state for unknown object {}", network_id);
        self.missing.on_unknown(&mut self.network, network_id, now);
    }

    /// Replaces the local scene with a full snapshot from the server
    pub fn apply_scene_sync(&mut self, scene_name: &str, scene_data: &SceneData) {
        self.scene.clear();
        self.missing.clear();
        self.scene.set_name(scene_name);
        self.scene.reconstruct(&self.factory, &scene_data.objects);
        self.scene.configure_all(&self.network);
        self.network.set_scene_synced(true);
        info!(
            "Scene '{}' synced with {} object(s)",
            scene_name,
            self.scene.len()
        );

        if let Err(e) = self.network.send_to_server(&Message::ForceSync) {
            warn!("Failed to request full component sync: {}", e);
        }
    }

    /// Sends the whole replicated tree to one peer
    pub fn send_scene_sync(&mut self, peer: PeerId) -> Result<(), SendError> {
        let message = Message::SceneSync {
            scene_name: self.scene.name().to_string(),
            scene_data: self.scene.serialize_full_tree(),
        };
        self.network.send_to(peer, &message)
    }

    pub fn request_scene_sync(&mut self) -> Result<(), SendError> {
        let request = Message::RequestSceneSync {
            sender_id: self.network.local_peer(),
        };
        self.network.send_to_server(&request)
    }

    /// Renames the active scene and pushes it to every client
    pub fn set_active_scene(&mut self, name: &str) -> usize {
        self.scene.set_name(name);
        if !self.network.is_server() {
            return 0;
        }

        let local = self.network.local_peer();
        let peers: Vec<PeerId> = self
            .network
            .lobby_members()
            .keys()
            .copied()
            .filter(|peer| *peer != local)
            .collect();

        let mut sent = 0;
        for peer in peers {
            match self.send_scene_sync(peer) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to push scene '{}' to {}: {}", name, peer, e),
            }
        }
        info!("Active scene is now '{}'", name);
        sent
    }

    /// Spawns an object on the server
    pub fn spawn(
        &mut self,
        object: NetworkObject,
        now: Instant,
    ) -> Result<NetworkId, SceneError> {
        self.scene.add(&mut self.network, object, now)
    }

    /// Per-frame work shared by both roles
    pub fn update(&mut self, now: Instant) {
        if !self.network.is_running() {
            return;
        }
        self.network.update_presence();
        if !self.network.is_running() {
            // The server left and took the session with it
            self.scene.clear();
            self.missing.clear();
            return;
        }

        if self.network.is_server() {
            self.scene.sync_tick(&mut self.network, now);
        } else if self.network.is_client() {
            self.network.send_ping_request(now);
            self.missing.update(&mut self.network, now);
        }
    }

    pub fn leave(&mut self) {
        self.network.leave();
        self.scene.clear();
        self.missing.clear();
    }
}

impl MessageSink for Session {
    fn process_received_message(&mut self, raw: &[u8], sender: PeerId, now: Instant) {
        Session::process_received_message(self, raw, sender, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes;
    use crate::transport::LoopbackHub;

    struct Pair {
        server: Session,
        client: Session,
    }

    impl Pair {
        fn new() -> Self {
            let hub = LoopbackHub::new();
            let (tx, _rx) = mpsc::unbounded_channel();
            let mut server = Session::new(hub.connect("host"), NetworkConfig::default(), tx.clone());
            let lobby = server.network.setup_server(4).unwrap();
            let mut client = Session::new(hub.connect("guest"), NetworkConfig::default(), tx);
            client.network.join_lobby(lobby).unwrap();
            server.network.update_presence();
            Self { server, client }
        }

        /// Delivers queued messages both ways until the lobby is quiet
        fn pump(&mut self, now: Instant) {
            let server_transport = self.server.network.transport();
            let client_transport = self.client.network.transport();
            loop {
                let mut moved = false;
                while let Some((bytes, sender)) = client_transport.receive() {
                    self.client.process_received_message(&bytes, sender, now);
                    moved = true;
                }
                while let Some((bytes, sender)) = server_transport.receive() {
                    self.server.process_received_message(&bytes, sender, now);
                    moved = true;
                }
                if !moved {
                    break;
                }
            }
        }
    }

    #[test]
    fn test_scene_sync_rebuilds_client() {
        let mut pair = Pair::new();
        let now = Instant::now();
        let field = pair.server.spawn(classes::field("field"), now).unwrap();
        pair.server
            .scene
            .add_child(&mut pair.server.network, field, classes::block("b"), now)
            .unwrap();

        // The client discards broadcasts received before its sync
        pair.pump(now);
        pair.client.scene.clear();

        pair.client.request_scene_sync().unwrap();
        pair.pump(now);

        assert!(pair.client.network.scene_synced());
        assert_eq!(pair.client.scene.len(), 2);
        assert_eq!(pair.client.scene.roots(), &[field]);
    }

    #[test]
    fn test_spawn_and_move_replicates() {
        let mut pair = Pair::new();
        let now = Instant::now();
        pair.client.apply_scene_sync("main", &SceneData::default());
        pair.pump(now);

        let block = pair.server.spawn(classes::block("b"), now).unwrap();
        pair.server
            .scene
            .find_mut(block)
            .unwrap()
            .transform_mut()
            .unwrap()
            .position = [3.0, 4.0, 0.0];
        pair.server.update(now + std::time::Duration::from_millis(100));
        pair.pump(now);

        let replica = pair.client.scene.find(block).unwrap();
        assert_eq!(replica.transform().unwrap().position, [3.0, 4.0, 0.0]);
    }

    #[test]
    fn test_unknown_object_is_requested_after_sync() {
        let mut pair = Pair::new();
        let now = Instant::now();
        let block = pair.server.spawn(classes::block("b"), now).unwrap();

        // Lose the add and the initial state on the way
        let client_transport = pair.client.network.transport();
        while client_transport.receive().is_some() {}

        pair.client.apply_scene_sync("main", &SceneData::default());
        pair.client.scene.clear();
        pair.server
            .scene
            .find_mut(block)
            .unwrap()
            .transform_mut()
            .unwrap()
            .position[0] = 1.0;
        pair.server.update(now + std::time::Duration::from_millis(100));

        // Delta for an unknown object, request, reply
        pair.pump(now);
        assert!(pair.client.scene.contains(block));
        assert!(pair.client.missing.is_empty());
    }

    #[test]
    fn test_stranger_is_ignored() {
        let hub = LoopbackHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut server = Session::new(hub.connect("host"), NetworkConfig::default(), tx);
        server.network.setup_server(4).unwrap();

        server.dispatch(Message::ForceSync, 12345, Instant::now());
        server.dispatch(
            Message::RequestSceneSync { sender_id: 12345 },
            12345,
            Instant::now(),
        );
        assert_eq!(hub.delivered(), 0);
    }

    #[test]
    fn test_set_active_scene_pushes_to_members() {
        let mut pair = Pair::new();
        pair.server.spawn(classes::field("field"), Instant::now()).unwrap();
        pair.pump(Instant::now());

        assert_eq!(pair.server.set_active_scene("level2"), 1);
        pair.pump(Instant::now());
        assert_eq!(pair.client.scene.name(), "level2");
        assert_eq!(pair.client.scene.len(), 1);
    }

    #[test]
    fn test_leave_clears_scene() {
        let mut pair = Pair::new();
        pair.client.apply_scene_sync("main", &SceneData::default());
        pair.client.leave();
        assert!(pair.client.scene.is_empty());
        assert!(!pair.client.network.scene_synced());
        assert!(!pair.client.network.is_running());
    }
}
