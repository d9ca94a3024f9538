//! Replicated game objects
//!
//! Objects live in an arena owned by the scene, so the tree links here are
//! plain network ids: a parent lists its children in order and every child
//! remembers the id of its parent.

use crate::component::{NetworkComponent, SyncedComponent, Transform};
use crate::config::NetworkConfig;
use crate::protocol::{FieldMap, Message, ObjectRecord};
use crate::{NetworkId, PeerId};
use std::time::Instant;

/// Object-level state replicated through `sync_network_object`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectState {
    pub active: bool,
    pub owner: Option<PeerId>,
    pub layer: i32,
    pub parent: Option<NetworkId>,
}

pub struct NetworkObject {
    pub network_id: Option<NetworkId>,
    pub owner: Option<PeerId>,
    pub class_tag: String,
    pub name: String,
    pub active: bool,
    pub layer: i32,
    /// Set once the object has been registered and initialized locally
    pub started: bool,
    pub(crate) parent: Option<NetworkId>,
    pub(crate) children: Vec<NetworkId>,
    components: Vec<SyncedComponent>,
    last_state: Option<ObjectState>,
}

impl NetworkObject {
    /// Every object replicates a transform
    pub fn new(class_tag: &str, name: &str) -> Self {
        Self {
            network_id: None,
            owner: None,
            class_tag: class_tag.to_string(),
            name: name.to_string(),
            active: true,
            layer: 0,
            started: false,
            parent: None,
            children: Vec::new(),
            components: vec![SyncedComponent::new(Box::new(Transform::default()))],
            last_state: None,
        }
    }

    /// Attaches a component, replacing any existing one of the same kind
    pub fn with_component(mut self, component: impl NetworkComponent) -> Self {
        self.attach(Box::new(component));
        self
    }

    pub fn with_network_id(mut self, network_id: NetworkId) -> Self {
        self.network_id = Some(network_id);
        self
    }

    pub fn with_owner(mut self, owner: Option<PeerId>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    pub fn attach(&mut self, component: Box<dyn NetworkComponent>) {
        let synced = SyncedComponent::new(component);
        match self
            .components
            .iter_mut()
            .find(|existing| existing.kind() == synced.kind())
        {
            Some(existing) => *existing = synced,
            None => self.components.push(synced),
        }
    }

    pub fn parent(&self) -> Option<NetworkId> {
        self.parent
    }

    pub fn children(&self) -> &[NetworkId] {
        &self.children
    }

    pub fn component<T: NetworkComponent>(&self) -> Option<&T> {
        self.components
            .iter()
            .find_map(|synced| synced.component.as_any().downcast_ref::<T>())
    }

    pub fn component_mut<T: NetworkComponent>(&mut self) -> Option<&mut T> {
        self.components
            .iter_mut()
            .find_map(|synced| synced.component.as_any_mut().downcast_mut::<T>())
    }

    pub fn transform(&self) -> Option<&Transform> {
        self.component::<Transform>()
    }

    pub fn transform_mut(&mut self) -> Option<&mut Transform> {
        self.component_mut::<Transform>()
    }

    pub fn component_kinds(&self) -> Vec<&str> {
        self.components.iter().map(SyncedComponent::kind).collect()
    }

    /// Applies a received delta; false when the object has no such component
    pub fn apply_component(&mut self, kind: &str, fields: &FieldMap) -> bool {
        match self.components.iter_mut().find(|synced| synced.kind() == kind) {
            Some(synced) => {
                synced.component.apply(fields);
                true
            }
            None => false,
        }
    }

    pub fn configure(&mut self, config: &NetworkConfig) {
        for synced in &mut self.components {
            synced.configure(config);
        }
    }

    /// Component deltas due this tick, as (kind, changed fields)
    pub fn poll_component_deltas(&mut self, now: Instant) -> Vec<(String, FieldMap)> {
        self.components
            .iter_mut()
            .filter_map(|synced| {
                synced
                    .poll_delta(now)
                    .map(|fields| (synced.kind().to_string(), fields))
            })
            .collect()
    }

    pub fn force_components(&mut self, now: Instant) -> Vec<(String, FieldMap)> {
        self.components
            .iter_mut()
            .map(|synced| {
                let fields = synced.force(now);
                (synced.kind().to_string(), fields)
            })
            .collect()
    }

    /// Every component's live fields, leaving the snapshots untouched
    pub fn full_components(&self) -> Vec<(String, FieldMap)> {
        self.components
            .iter()
            .map(|synced| (synced.kind().to_string(), synced.component.fields()))
            .collect()
    }

    pub fn state(&self) -> ObjectState {
        ObjectState {
            active: self.active,
            owner: self.owner,
            layer: self.layer,
            parent: self.parent,
        }
    }

    /// Object state if it changed since the last broadcast
    pub fn poll_state_change(&mut self) -> Option<ObjectState> {
        let state = self.state();
        if self.last_state.as_ref() == Some(&state) {
            return None;
        }
        self.last_state = Some(state.clone());
        Some(state)
    }

    pub fn force_state(&mut self) -> ObjectState {
        let state = self.state();
        self.last_state = Some(state.clone());
        state
    }

    pub fn apply_state(&mut self, active: bool, owner: Option<PeerId>, layer: i32) {
        self.active = active;
        self.owner = owner;
        self.layer = layer;
    }

    pub fn record(&self) -> Option<ObjectRecord> {
        Some(ObjectRecord {
            class_name: self.class_tag.clone(),
            object_name: self.name.clone(),
            network_id: self.network_id?,
            steam_id: self.owner,
            parent_id: self.parent,
        })
    }

    pub fn add_message(&self) -> Option<Message> {
        Some(Message::AddObject {
            object_name: self.name.clone(),
            network_id: self.network_id?,
            steam_id: self.owner,
            class_name: self.class_tag.clone(),
            parent_id: self.parent,
        })
    }
}

impl ObjectState {
    pub fn into_message(self, network_id: NetworkId) -> Message {
        Message::SyncNetworkObject {
            network_id,
            active: self.active,
            steam_id: self.owner,
            layer: self.layer,
            parent_id: self.parent,
        }
    }
}
