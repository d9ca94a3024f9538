//! Wire messages exchanged between the authoritative server and its clients
//!
//! Every message is a JSON object carrying a `"type"` discriminator. Component
//! deltas flatten their changed fields next to the routing envelope so a delta
//! that only moved an object on the x axis reads
//! `{"type":"sync_transform","network_id":7,"position_x":12.5}`.

use crate::{NetworkId, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field name to value map used by component deltas
pub type FieldMap = BTreeMap<String, Value>;

/// Component kinds with a dedicated message type
pub const TRANSFORM_KIND: &str = "transform";
pub const SPRITE_KIND: &str = "sprite";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    PingRequest {
        time: f64,
        sender_id: PeerId,
    },
    PingResponse {
        time: f64,
    },

    AddObject {
        object_name: String,
        network_id: NetworkId,
        steam_id: Option<PeerId>,
        class_name: String,
        #[serde(default)]
        parent_id: Option<NetworkId>,
    },
    RemoveObject {
        network_id: NetworkId,
    },
    AddNetworkChild {
        parent_id: NetworkId,
        child_id: NetworkId,
        child_class: String,
        child_name: String,
        steam_id: Option<PeerId>,
        layer: i32,
    },
    RemoveNetworkChild {
        parent_id: NetworkId,
        child_id: NetworkId,
    },

    SceneSync {
        scene_name: String,
        scene_data: SceneData,
    },
    RequestSceneSync {
        sender_id: PeerId,
    },
    #[serde(rename = "force_sync_network_game_objects_components")]
    ForceSync,
    RequestMissingObject {
        network_id: NetworkId,
        sender_id: PeerId,
    },

    SyncNetworkObject {
        network_id: NetworkId,
        active: bool,
        steam_id: Option<PeerId>,
        layer: i32,
        parent_id: Option<NetworkId>,
    },
    SyncTransform {
        network_id: NetworkId,
        #[serde(flatten)]
        fields: FieldMap,
    },
    SyncSprite {
        network_id: NetworkId,
        #[serde(flatten)]
        fields: FieldMap,
    },
    SyncComponent {
        network_id: NetworkId,
        component: String,
        #[serde(flatten)]
        fields: FieldMap,
    },
}

impl Message {
    /// Builds the delta message for a component kind
    pub fn component_delta(kind: &str, network_id: NetworkId, fields: FieldMap) -> Self {
        match kind {
            TRANSFORM_KIND => Message::SyncTransform { network_id, fields },
            SPRITE_KIND => Message::SyncSprite { network_id, fields },
            other => Message::SyncComponent {
                network_id,
                component: other.to_string(),
                fields,
            },
        }
    }

    /// Splits a component delta back into (kind, target, fields)
    pub fn as_component_delta(&self) -> Option<(&str, NetworkId, &FieldMap)> {
        match self {
            Message::SyncTransform { network_id, fields } => {
                Some((TRANSFORM_KIND, *network_id, fields))
            }
            Message::SyncSprite { network_id, fields } => Some((SPRITE_KIND, *network_id, fields)),
            Message::SyncComponent {
                network_id,
                component,
                fields,
            } => Some((component.as_str(), *network_id, fields)),
            _ => None,
        }
    }

    /// The object this message is addressed to, if any
    pub fn target_object(&self) -> Option<NetworkId> {
        match self {
            Message::SyncNetworkObject { network_id, .. }
            | Message::SyncTransform { network_id, .. }
            | Message::SyncSprite { network_id, .. }
            | Message::SyncComponent { network_id, .. } => Some(*network_id),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::PingRequest { .. } => "ping_request",
            Message::PingResponse { .. } => "ping_response",
            Message::AddObject { .. } => "add_object",
            Message::RemoveObject { .. } => "remove_object",
            Message::AddNetworkChild { .. } => "add_network_child",
            Message::RemoveNetworkChild { .. } => "remove_network_child",
            Message::SceneSync { .. } => "scene_sync",
            Message::RequestSceneSync { .. } => "request_scene_sync",
            Message::ForceSync => "force_sync_network_game_objects_components",
            Message::RequestMissingObject { .. } => "request_missing_object",
            Message::SyncNetworkObject { .. } => "sync_network_object",
            Message::SyncTransform { .. } => "sync_transform",
            Message::SyncSprite { .. } => "sync_sprite",
            Message::SyncComponent { .. } => "sync_component",
        }
    }
}

/// One node of a serialized object tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub class_name: String,
    pub object_name: String,
    pub network_id: NetworkId,
    pub steam_id: Option<PeerId>,
    pub parent_id: Option<NetworkId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneData {
    pub objects: Vec<ObjectRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_discriminator_is_snake_case() {
        let message = Message::RemoveObject { network_id: 4 };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"type": "remove_object", "network_id": 4}));
    }

    #[test]
    fn test_force_sync_wire_name() {
        let value = serde_json::to_value(&Message::ForceSync).unwrap();
        assert_eq!(
            value,
            json!({"type": "force_sync_network_game_objects_components"})
        );
    }

    #[test]
    fn test_transform_delta_flattens_fields() {
        let mut fields = FieldMap::new();
        fields.insert("position_x".to_string(), json!(12.5));

        let message = Message::component_delta(TRANSFORM_KIND, 7, fields.clone());
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"type": "sync_transform", "network_id": 7, "position_x": 12.5})
        );

        let parsed: Message = serde_json::from_value(value).unwrap();
        match parsed {
            Message::SyncTransform { network_id, fields: parsed_fields } => {
                assert_eq!(network_id, 7);
                assert_eq!(parsed_fields, fields);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_custom_component_keeps_name() {
        let mut fields = FieldMap::new();
        fields.insert("score".to_string(), json!(3));
        let message = Message::component_delta("score_board", 2, fields);

        let (kind, id, parsed) = message.as_component_delta().unwrap();
        assert_eq!(kind, "score_board");
        assert_eq!(id, 2);
        assert_eq!(parsed.get("score"), Some(&json!(3)));
        assert_eq!(message.target_object(), Some(2));
    }

    #[test]
    fn test_add_object_without_parent_field() {
        let value = json!({
            "type": "add_object",
            "object_name": "Field",
            "network_id": 1,
            "steam_id": null,
            "class_name": "Field"
        });
        let parsed: Message = serde_json::from_value(value).unwrap();
        match parsed {
            Message::AddObject { parent_id, .. } => assert_eq!(parent_id, None),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<Message, _> = serde_json::from_value(json!({"type": "teleport"}));
        assert!(result.is_err());
    }
}
