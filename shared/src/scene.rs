//! Replicated object directory of the active network scene
//!
//! The scene owns every replicated object in an arena keyed by network id and
//! keeps the list of roots in insertion order. On the server every structural
//! change is broadcast to the lobby; on a client the same calls only change
//! local state, which is how the message handlers mirror the server.

use crate::factory::ObjectFactory;
use crate::network::NetworkManager;
use crate::object::NetworkObject;
use crate::protocol::{Message, ObjectRecord, SceneData};
use crate::{NetworkId, PeerId};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("only the server may allocate network ids")]
    MissingNetworkId,
    #[error("network id {0} is already registered")]
    DuplicateId(NetworkId),
    #[error("no object with network id {0}")]
    NotFound(NetworkId),
    #[error("object {child} is not a child of {parent}")]
    NotAChild {
        parent: NetworkId,
        child: NetworkId,
    },
}

#[derive(Default)]
pub struct NetworkScene {
    name: String,
    objects: HashMap<NetworkId, NetworkObject>,
    roots: Vec<NetworkId>,
}

impl NetworkScene {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn roots(&self) -> &[NetworkId] {
        &self.roots
    }

    pub fn find(&self, network_id: NetworkId) -> Option<&NetworkObject> {
        self.objects.get(&network_id)
    }

    pub fn find_mut(&mut self, network_id: NetworkId) -> Option<&mut NetworkObject> {
        self.objects.get_mut(&network_id)
    }

    pub fn contains(&self, network_id: NetworkId) -> bool {
        self.objects.contains_key(&network_id)
    }

    /// Ids in depth-first pre-order, roots in insertion order
    pub fn depth_first(&self) -> Vec<NetworkId> {
        let mut order = Vec::with_capacity(self.objects.len());
        for root in &self.roots {
            self.collect_pre_order(*root, &mut order);
        }
        order
    }

    fn collect_pre_order(&self, network_id: NetworkId, order: &mut Vec<NetworkId>) {
        if let Some(object) = self.objects.get(&network_id) {
            order.push(network_id);
            for child in &object.children {
                self.collect_pre_order(*child, order);
            }
        }
    }

    fn collect_post_order(&self, network_id: NetworkId, order: &mut Vec<NetworkId>) {
        if let Some(object) = self.objects.get(&network_id) {
            for child in &object.children {
                self.collect_post_order(*child, order);
            }
            order.push(network_id);
        }
    }

    // ------------------------
    // Structural changes
    // ------------------------

    /// Registers `object` as a root, allocating an id on the server
    pub fn add(
        &mut self,
        network: &mut NetworkManager,
        object: NetworkObject,
        now: Instant,
    ) -> Result<NetworkId, SceneError> {
        let network_id = self.register(network, object, None)?;
        self.roots.push(network_id);

        if network.is_server() {
            if let Some(message) = self.objects.get(&network_id).and_then(NetworkObject::add_message)
            {
                network.broadcast(&message);
            }
            self.broadcast_full_state(network, network_id, now);
        }
        Ok(network_id)
    }

    /// Registers `child` under `parent_id`
    pub fn add_child(
        &mut self,
        network: &mut NetworkManager,
        parent_id: NetworkId,
        child: NetworkObject,
        now: Instant,
    ) -> Result<NetworkId, SceneError> {
        if !self.objects.contains_key(&parent_id) {
            return Err(SceneError::NotFound(parent_id));
        }
        let child_id = self.register(network, child, Some(parent_id))?;
        if let Some(parent) = self.objects.get_mut(&parent_id) {
            parent.children.push(child_id);
        }

        if network.is_server() {
            if let Some(child) = self.objects.get(&child_id) {
                let message = Message::AddNetworkChild {
                    parent_id,
                    child_id,
                    child_class: child.class_tag.clone(),
                    child_name: child.name.clone(),
                    steam_id: child.owner,
                    layer: child.layer,
                };
                network.broadcast(&message);
            }
            self.broadcast_full_state(network, child_id, now);
        }
        Ok(child_id)
    }

    fn register(
        &mut self,
        network: &mut NetworkManager,
        mut object: NetworkObject,
        parent: Option<NetworkId>,
    ) -> Result<NetworkId, SceneError> {
        let network_id = match object.network_id {
            Some(network_id) => network_id,
            None if network.is_server() => network.allocate_network_id(),
            None => return Err(SceneError::MissingNetworkId),
        };
        if self.objects.contains_key(&network_id) {
            return Err(SceneError::DuplicateId(network_id));
        }

        object.network_id = Some(network_id);
        object.parent = parent;
        object.children.clear();
        object.started = true;
        object.configure(network.config());
        self.objects.insert(network_id, object);
        Ok(network_id)
    }

    /// Removes an object and its whole subtree, children before parents
    pub fn remove(
        &mut self,
        network: &mut NetworkManager,
        network_id: NetworkId,
    ) -> Result<Vec<NetworkId>, SceneError> {
        let removed = self.take_subtree(network_id)?;
        if network.is_server() {
            for id in &removed {
                network.broadcast(&Message::RemoveObject { network_id: *id });
            }
        }
        debug!("Removed {} object(s) under {}", removed.len(), network_id);
        Ok(removed)
    }

    pub fn remove_child(
        &mut self,
        network: &mut NetworkManager,
        parent_id: NetworkId,
        child_id: NetworkId,
    ) -> Result<Vec<NetworkId>, SceneError> {
        let child = self
            .objects
            .get(&child_id)
            .ok_or(SceneError::NotFound(child_id))?;
        if child.parent != Some(parent_id) {
            return Err(SceneError::NotAChild {
                parent: parent_id,
                child: child_id,
            });
        }

        let removed = self.take_subtree(child_id)?;
        if network.is_server() {
            network.broadcast(&Message::RemoveNetworkChild {
                parent_id,
                child_id,
            });
        }
        Ok(removed)
    }

    fn take_subtree(&mut self, network_id: NetworkId) -> Result<Vec<NetworkId>, SceneError> {
        if !self.objects.contains_key(&network_id) {
            return Err(SceneError::NotFound(network_id));
        }
        self.detach(network_id);

        let mut order = Vec::new();
        self.collect_post_order(network_id, &mut order);
        for id in &order {
            self.objects.remove(id);
        }
        Ok(order)
    }

    fn detach(&mut self, network_id: NetworkId) {
        let parent = self.objects.get(&network_id).and_then(|object| object.parent);
        match parent.and_then(|parent| self.objects.get_mut(&parent)) {
            Some(parent) => parent.children.retain(|child| *child != network_id),
            None => self.roots.retain(|root| *root != network_id),
        }
    }

    /// Moves an object under `new_parent`, or to the roots for None
    pub fn reparent(&mut self, network_id: NetworkId, new_parent: Option<NetworkId>) -> bool {
        let Some(current) = self.objects.get(&network_id).map(|object| object.parent) else {
            return false;
        };
        if current == new_parent {
            return true;
        }
        if let Some(parent_id) = new_parent {
            if !self.objects.contains_key(&parent_id) || self.is_ancestor(network_id, parent_id) {
                warn!(
                    "Cannot move object {} under {}, keeping current parent",
                    network_id, parent_id
                );
                return false;
            }
        }

        self.detach(network_id);
        match new_parent.and_then(|parent_id| self.objects.get_mut(&parent_id)) {
            Some(parent) => parent.children.push(network_id),
            None => self.roots.push(network_id),
        }
        if let Some(object) = self.objects.get_mut(&network_id) {
            object.parent = new_parent;
        }
        true
    }

    /// True when `ancestor` is `node` or lies on its parent chain
    fn is_ancestor(&self, ancestor: NetworkId, node: NetworkId) -> bool {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.objects.get(&id).and_then(|object| object.parent);
        }
        false
    }

    /// Drops every replicated object without notifying anyone
    pub fn clear(&mut self) {
        self.objects.clear();
        self.roots.clear();
    }

    // ------------------------
    // Full-tree transfer
    // ------------------------

    pub fn serialize_full_tree(&self) -> SceneData {
        let objects = self
            .depth_first()
            .into_iter()
            .filter_map(|id| self.objects.get(&id).and_then(NetworkObject::record))
            .collect();
        SceneData { objects }
    }

    /// Rebuilds objects from records in any order
    ///
    /// Every record is built first, then children are linked to their
    /// declared parents. Unknown classes and duplicate ids are skipped;
    /// a child whose parent never shows up is kept as a root.
    pub fn reconstruct(
        &mut self,
        factory: &ObjectFactory,
        records: &[ObjectRecord],
    ) -> Vec<NetworkId> {
        let mut created = Vec::with_capacity(records.len());
        let mut declared_parents = Vec::with_capacity(records.len());
        let mut seen = HashSet::new();

        for record in records {
            if self.objects.contains_key(&record.network_id) || !seen.insert(record.network_id) {
                warn!("Duplicate network id {} in scene data, skipping", record.network_id);
                continue;
            }
            let Some(mut object) = factory.create(record) else {
                continue;
            };
            object.started = true;
            self.objects.insert(record.network_id, object);
            created.push(record.network_id);
            declared_parents.push(record.parent_id);
        }

        for (child_id, declared) in created.iter().zip(declared_parents) {
            let parent_id =
                declared.filter(|parent_id| !self.is_ancestor(*child_id, *parent_id));
            let linked = match parent_id.and_then(|parent_id| self.objects.get_mut(&parent_id)) {
                Some(parent) => {
                    parent.children.push(*child_id);
                    true
                }
                None => false,
            };
            match (declared, parent_id, linked) {
                (Some(declared), None, _) => warn!(
                    "Parent {} of object {} would form a cycle, keeping it as a root",
                    declared, child_id
                ),
                (Some(declared), Some(_), false) => warn!(
                    "Parent {} of object {} not found, keeping it as a root",
                    declared, child_id
                ),
                _ => {}
            }
            if let Some(child) = self.objects.get_mut(child_id) {
                child.parent = if linked { parent_id } else { None };
            }
            if !linked {
                self.roots.push(*child_id);
            }
        }

        info!(
            "Reconstructed {} of {} object(s) in scene '{}'",
            created.len(),
            records.len(),
            self.name
        );
        created
    }

    /// Applies one `add_object` record received from the server
    pub fn apply_add_object(&mut self, factory: &ObjectFactory, record: &ObjectRecord) -> bool {
        if self.objects.contains_key(&record.network_id) {
            debug!("Object {} already known, ignoring add", record.network_id);
            return false;
        }
        !self.reconstruct(factory, std::slice::from_ref(record)).is_empty()
    }

    pub fn configure_all(&mut self, network: &NetworkManager) {
        for object in self.objects.values_mut() {
            object.configure(network.config());
        }
    }

    // ------------------------
    // State replication
    // ------------------------

    /// Broadcasts object state and component deltas that are due
    pub fn sync_tick(&mut self, network: &mut NetworkManager, now: Instant) {
        if !network.is_server() {
            return;
        }
        for network_id in self.depth_first() {
            let Some(object) = self.objects.get_mut(&network_id) else {
                continue;
            };
            if let Some(state) = object.poll_state_change() {
                network.broadcast(&state.into_message(network_id));
            }
            for (kind, fields) in object.poll_component_deltas(now) {
                network.broadcast(&Message::component_delta(&kind, network_id, fields));
            }
        }
    }

    /// Broadcasts the full state of every object, resetting all snapshots
    pub fn force_sync(&mut self, network: &mut NetworkManager, now: Instant) {
        if !network.is_server() {
            return;
        }
        for network_id in self.depth_first() {
            self.broadcast_full_state(network, network_id, now);
        }
    }

    fn broadcast_full_state(
        &mut self,
        network: &mut NetworkManager,
        network_id: NetworkId,
        now: Instant,
    ) {
        let Some(object) = self.objects.get_mut(&network_id) else {
            return;
        };
        network.broadcast(&object.force_state().into_message(network_id));
        for (kind, fields) in object.force_components(now) {
            network.broadcast(&Message::component_delta(&kind, network_id, fields));
        }
    }

    /// Sends one object, its missing ancestors and its full state to a single peer
    pub fn send_object_to(
        &self,
        network: &mut NetworkManager,
        peer: PeerId,
        network_id: NetworkId,
    ) -> Result<(), SceneError> {
        let object = self
            .objects
            .get(&network_id)
            .ok_or(SceneError::NotFound(network_id))?;

        let mut chain = vec![network_id];
        let mut cursor = object.parent;
        while let Some(parent_id) = cursor {
            chain.push(parent_id);
            cursor = self.objects.get(&parent_id).and_then(|parent| parent.parent);
        }

        for id in chain.into_iter().rev() {
            let Some(object) = self.objects.get(&id) else {
                continue;
            };
            let mut messages: Vec<Message> = object.add_message().into_iter().collect();
            messages.push(object.state().into_message(id));
            messages.extend(
                object
                    .full_components()
                    .into_iter()
                    .map(|(kind, fields)| Message::component_delta(&kind, id, fields)),
            );
            for message in &messages {
                if let Err(e) = network.send_to(peer, message) {
                    warn!("Failed to send object {} to {}: {}", id, peer, e);
                }
            }
        }
        Ok(())
    }

    /// Applies a `sync_network_object` message
    pub fn apply_object_state(
        &mut self,
        network_id: NetworkId,
        active: bool,
        owner: Option<PeerId>,
        layer: i32,
        parent: Option<NetworkId>,
    ) -> bool {
        let Some(object) = self.objects.get_mut(&network_id) else {
            return false;
        };
        object.apply_state(active, owner, layer);
        if object.parent != parent {
            self.reparent(network_id, parent);
        }
        true
    }

    /// Applies a component delta; false when the object is unknown
    pub fn apply_component(&mut self, message: &Message) -> bool {
        let Some((kind, network_id, fields)) = message.as_component_delta() else {
            return false;
        };
        let Some(object) = self.objects.get_mut(&network_id) else {
            return false;
        };
        if !object.apply_component(kind, fields) {
            debug!("Object {} has no '{}' component", network_id, kind);
        }
        true
    }
}
