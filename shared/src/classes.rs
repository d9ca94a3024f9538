//! Builtin replicated object classes

use crate::component::{Sprite, Transform};
use crate::factory::ObjectFactory;
use crate::object::NetworkObject;

pub const NETWORK_GAME_OBJECT: &str = "NetworkGameObject";
pub const FIELD: &str = "Field";
pub const BLOCK: &str = "Block";

pub const BLOCK_SIZE: f32 = 32.0;
pub const FIELD_COLUMNS: usize = 10;
pub const FIELD_ROWS: usize = 20;

pub fn network_game_object(name: &str) -> NetworkObject {
    NetworkObject::new(NETWORK_GAME_OBJECT, name)
}

/// Container for the blocks of one playfield
pub fn field(name: &str) -> NetworkObject {
    NetworkObject::new(FIELD, name)
}

pub fn block(name: &str) -> NetworkObject {
    NetworkObject::new(BLOCK, name)
        .with_component(Transform::default())
        .with_component(Sprite::new("block.png", BLOCK_SIZE, BLOCK_SIZE))
        .with_layer(1)
}

pub fn register_builtin_classes(factory: &mut ObjectFactory) {
    factory.register(NETWORK_GAME_OBJECT, network_game_object);
    factory.register(FIELD, field);
    factory.register(BLOCK, block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ObjectRecord;

    #[test]
    fn test_builtin_classes_registered() {
        let mut factory = ObjectFactory::new();
        register_builtin_classes(&mut factory);

        for class in [NETWORK_GAME_OBJECT, FIELD, BLOCK] {
            assert!(factory.contains(class));
        }

        let block = factory
            .create(&ObjectRecord {
                class_name: BLOCK.to_string(),
                object_name: "b".to_string(),
                network_id: 9,
                steam_id: None,
                parent_id: None,
            })
            .unwrap();
        assert!(block.component::<Sprite>().is_some());
        assert_eq!(block.layer, 1);
    }
}
