//! Replicated component state and per-component delta tracking
//!
//! A [`NetworkComponent`] exposes its replicated state as a flat [`FieldMap`]
//! and knows how to apply a (possibly partial) map received from the server.
//! The [`DeltaTracker`] next to each component remembers what was last put on
//! the wire so the server only ever sends fields that actually changed.

use crate::config::NetworkConfig;
use crate::protocol::{FieldMap, SPRITE_KIND, TRANSFORM_KIND};
use crate::TRANSFORM_SYNC_INTERVAL_MS;
use serde_json::{json, Value};
use std::any::Any;
use std::time::{Duration, Instant};

pub trait NetworkComponent: Any + Send {
    /// Wire name of the component kind
    fn kind(&self) -> &str;

    fn sync_interval(&self) -> Duration {
        Duration::from_millis(TRANSFORM_SYNC_INTERVAL_MS)
    }

    /// Current replicated state
    fn fields(&self) -> FieldMap;

    /// Applies the fields present in `fields`, ignoring the rest
    fn apply(&mut self, fields: &FieldMap);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Last-broadcast snapshot plus the sync timer of one component
#[derive(Debug, Clone)]
pub struct DeltaTracker {
    snapshot: FieldMap,
    interval: Duration,
    last_sync: Option<Instant>,
}

impl DeltaTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            snapshot: FieldMap::new(),
            interval,
            last_sync: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn due(&self, now: Instant) -> bool {
        self.last_sync
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Fields of `live` that differ from the snapshot, or None when nothing changed
    ///
    /// The snapshot is updated with exactly the returned values.
    pub fn diff(&mut self, live: FieldMap, now: Instant) -> Option<FieldMap> {
        self.last_sync = Some(now);

        let changed: FieldMap = live
            .into_iter()
            .filter(|(name, value)| self.snapshot.get(name) != Some(value))
            .collect();
        if changed.is_empty() {
            return None;
        }
        for (name, value) in &changed {
            self.snapshot.insert(name.clone(), value.clone());
        }
        Some(changed)
    }

    /// Takes every live field regardless of the snapshot or timer
    pub fn full(&mut self, live: FieldMap, now: Instant) -> FieldMap {
        self.last_sync = Some(now);
        self.snapshot = live.clone();
        live
    }

    pub fn snapshot(&self) -> &FieldMap {
        &self.snapshot
    }
}

/// A component together with its delta tracker
pub struct SyncedComponent {
    pub component: Box<dyn NetworkComponent>,
    pub tracker: DeltaTracker,
}

impl SyncedComponent {
    pub fn new(component: Box<dyn NetworkComponent>) -> Self {
        let tracker = DeltaTracker::new(component.sync_interval());
        Self { component, tracker }
    }

    pub fn kind(&self) -> &str {
        self.component.kind()
    }

    /// Delta to broadcast this tick, if the timer elapsed and anything changed
    pub fn poll_delta(&mut self, now: Instant) -> Option<FieldMap> {
        if !self.tracker.due(now) {
            return None;
        }
        let live = self.component.fields();
        self.tracker.diff(live, now)
    }

    pub fn force(&mut self, now: Instant) -> FieldMap {
        let live = self.component.fields();
        self.tracker.full(live, now)
    }

    /// Uses the configured interval for builtin kinds
    pub fn configure(&mut self, config: &NetworkConfig) {
        match self.component.kind() {
            TRANSFORM_KIND => self.tracker.set_interval(config.transform_sync_interval),
            SPRITE_KIND => self.tracker.set_interval(config.sprite_sync_interval),
            _ => {}
        }
    }
}

fn read_f32(fields: &FieldMap, name: &str) -> Option<f32> {
    fields.get(name).and_then(Value::as_f64).map(|v| v as f32)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub position: [f32; 3],
    pub scale: [f32; 2],
    pub rotation: [f32; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            scale: [1.0; 2],
            rotation: [0.0; 3],
        }
    }
}

impl Transform {
    const POSITION: [&'static str; 3] = ["position_x", "position_y", "position_z"];
    const SCALE: [&'static str; 2] = ["scale_x", "scale_y"];
    const ROTATION: [&'static str; 3] = ["rotation_x", "rotation_y", "rotation_z"];

    pub fn at(x: f32, y: f32) -> Self {
        Self {
            position: [x, y, 0.0],
            ..Self::default()
        }
    }
}

impl NetworkComponent for Transform {
    fn kind(&self) -> &str {
        TRANSFORM_KIND
    }

    fn fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        for (name, value) in Self::POSITION.iter().zip(self.position) {
            fields.insert(name.to_string(), json!(value));
        }
        for (name, value) in Self::SCALE.iter().zip(self.scale) {
            fields.insert(name.to_string(), json!(value));
        }
        for (name, value) in Self::ROTATION.iter().zip(self.rotation) {
            fields.insert(name.to_string(), json!(value));
        }
        fields
    }

    fn apply(&mut self, fields: &FieldMap) {
        for (slot, name) in self.position.iter_mut().zip(Self::POSITION) {
            if let Some(value) = read_f32(fields, name) {
                *slot = value;
            }
        }
        for (slot, name) in self.scale.iter_mut().zip(Self::SCALE) {
            if let Some(value) = read_f32(fields, name) {
                *slot = value;
            }
        }
        for (slot, name) in self.rotation.iter_mut().zip(Self::ROTATION) {
            if let Some(value) = read_f32(fields, name) {
                *slot = value;
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sprite {
    pub image_path: String,
    pub base_size: [f32; 2],
    /// 0 is fully transparent, 255 opaque
    pub alpha: u8,
}

impl Sprite {
    pub fn new(image_path: &str, width: f32, height: f32) -> Self {
        Self {
            image_path: image_path.to_string(),
            base_size: [width, height],
            alpha: 255,
        }
    }
}

impl NetworkComponent for Sprite {
    fn kind(&self) -> &str {
        SPRITE_KIND
    }

    fn sync_interval(&self) -> Duration {
        Duration::from_millis(crate::SPRITE_SYNC_INTERVAL_MS)
    }

    fn fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("image_path".to_string(), json!(self.image_path));
        fields.insert("base_size".to_string(), json!(self.base_size));
        fields.insert("alpha".to_string(), json!(self.alpha));
        fields
    }

    fn apply(&mut self, fields: &FieldMap) {
        if let Some(path) = fields.get("image_path").and_then(Value::as_str) {
            self.image_path = path.to_string();
        }
        if let Some([width, height]) = fields
            .get("base_size")
            .and_then(Value::as_array)
            .map(|size| size.as_slice())
        {
            if let (Some(width), Some(height)) = (width.as_f64(), height.as_f64()) {
                self.base_size = [width as f32, height as f32];
            }
        }
        if let Some(alpha) = fields.get("alpha").and_then(Value::as_u64) {
            self.alpha = alpha.min(255) as u8;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_first_diff_sends_everything() {
        let transform = Transform::at(1.0, 2.0);
        let mut tracker = DeltaTracker::new(Duration::from_millis(50));
        let delta = tracker.diff(transform.fields(), Instant::now()).unwrap();
        assert_eq!(delta.len(), 8);
    }

    #[test]
    fn test_unchanged_state_is_suppressed() {
        let now = Instant::now();
        let mut synced = SyncedComponent::new(Box::new(Transform::at(1.0, 2.0)));
        assert!(synced.poll_delta(now).is_some());

        let later = now + Duration::from_millis(50);
        assert!(synced.poll_delta(later).is_none());
    }

    #[test]
    fn test_only_changed_fields_are_sent() {
        let now = Instant::now();
        let mut synced = SyncedComponent::new(Box::new(Transform::at(1.0, 2.0)));
        synced.poll_delta(now);

        synced
            .component
            .as_any_mut()
            .downcast_mut::<Transform>()
            .unwrap()
            .position[0] = 12.5;

        let delta = synced.poll_delta(now + Duration::from_millis(50)).unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("position_x"), Some(&json!(12.5f32)));
        assert_eq!(synced.tracker.snapshot().get("position_x"), Some(&json!(12.5f32)));
    }

    #[test]
    fn test_interval_gates_polling() {
        let now = Instant::now();
        let mut synced = SyncedComponent::new(Box::new(Sprite::new("block.png", 32.0, 32.0)));
        synced.poll_delta(now);

        synced
            .component
            .as_any_mut()
            .downcast_mut::<Sprite>()
            .unwrap()
            .alpha = 10;

        assert!(synced.poll_delta(now + Duration::from_millis(60)).is_none());
        let delta = synced.poll_delta(now + Duration::from_millis(100)).unwrap();
        assert_eq!(delta.get("alpha"), Some(&json!(10)));
    }

    #[test]
    fn test_force_ignores_timer_and_snapshot() {
        let now = Instant::now();
        let mut synced = SyncedComponent::new(Box::new(Transform::default()));
        synced.poll_delta(now);

        let fields = synced.force(now);
        assert_eq!(fields.len(), 8);
        assert!(synced.poll_delta(now + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_transform_applies_partial_fields() {
        let mut transform = Transform::at(5.0, 6.0);
        let mut fields = FieldMap::new();
        fields.insert("position_x".to_string(), json!(12.5));
        fields.insert("unknown".to_string(), json!("ignored"));
        transform.apply(&fields);

        assert_approx_eq!(transform.position[0], 12.5);
        assert_approx_eq!(transform.position[1], 6.0);
        assert_approx_eq!(transform.scale[0], 1.0);
    }

    #[test]
    fn test_transform_fields_roundtrip() {
        let source = Transform {
            position: [0.1, -3.7, 2.0],
            scale: [0.5, 2.25],
            rotation: [0.0, 0.0, 45.3],
        };
        let mut target = Transform::default();
        target.apply(&source.fields());
        assert_eq!(target, source);
    }

    #[test]
    fn test_sprite_apply() {
        let mut sprite = Sprite::new("a.png", 10.0, 10.0);
        let mut fields = FieldMap::new();
        fields.insert("image_path".to_string(), json!("b.png"));
        fields.insert("base_size".to_string(), json!([20.0, 40.0]));
        fields.insert("alpha".to_string(), json!(128));
        sprite.apply(&fields);

        assert_eq!(sprite.image_path, "b.png");
        assert_approx_eq!(sprite.base_size[1], 40.0);
        assert_eq!(sprite.alpha, 128);
    }

    #[test]
    fn test_configure_uses_config_intervals() {
        let config = NetworkConfig {
            sprite_sync_interval: Duration::from_millis(250),
            ..NetworkConfig::default()
        };
        let mut synced = SyncedComponent::new(Box::new(Sprite::new("a.png", 1.0, 1.0)));
        synced.configure(&config);
        assert_eq!(synced.tracker.interval(), Duration::from_millis(250));
    }
}
