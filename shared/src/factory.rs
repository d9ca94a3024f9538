//! Class-tag registry used to rebuild objects received from the wire

use crate::object::NetworkObject;
use crate::protocol::ObjectRecord;
use log::warn;
use std::collections::HashMap;

type Constructor = Box<dyn Fn(&str) -> NetworkObject + Send + Sync>;

#[derive(Default)]
pub struct ObjectFactory {
    constructors: HashMap<String, Constructor>,
}

impl ObjectFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` for `class_tag`; it receives the object name
    pub fn register<F>(&mut self, class_tag: &str, constructor: F)
    where
        F: Fn(&str) -> NetworkObject + Send + Sync + 'static,
    {
        self.constructors
            .insert(class_tag.to_string(), Box::new(constructor));
    }

    pub fn contains(&self, class_tag: &str) -> bool {
        self.constructors.contains_key(class_tag)
    }

    /// Builds the object a record describes, without linking it to a parent
    pub fn create(&self, record: &ObjectRecord) -> Option<NetworkObject> {
        let Some(constructor) = self.constructors.get(&record.class_name) else {
            warn!(
                "Unknown class '{}' for object {} ({}), skipping",
                record.class_name, record.network_id, record.object_name
            );
            return None;
        };

        let mut object = constructor(&record.object_name)
            .with_network_id(record.network_id)
            .with_owner(record.steam_id);
        object.class_tag = record.class_name.clone();
        object.name = record.object_name.clone();
        Some(object)
    }
}
