//! Replication core shared by the server and client roles

pub mod classes;
pub mod codec;
pub mod component;
pub mod config;
pub mod factory;
pub mod latency;
pub mod missing;
pub mod net_id;
pub mod network;
pub mod object;
pub mod protocol;
pub mod receiver;
pub mod scene;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use codec::{CodecError, Decoded, FragmentCodec, Frame};
pub use config::NetworkConfig;
pub use network::{NetworkEvent, NetworkManager, Role, SendError, SetupError};
pub use protocol::{FieldMap, Message, ObjectRecord, SceneData};
pub use session::Session;
pub use transport::{LoopbackHub, Transport};

pub type NetworkId = u64;
pub type PeerId = u64;
pub type LobbyId = u64;

pub const FRAGMENT_SIZE: usize = 850;
pub const FRAGMENT_TTL_SECS: u64 = 10;
pub const PING_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_EMA_ALPHA: f64 = 0.2;
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 20;
pub const HANDSHAKE_POLL_MS: u64 = 1000;
pub const MISSING_OBJECT_RETRY_SECS: u64 = 5;
pub const MISSING_OBJECT_ATTEMPTS: u32 = 5;
pub const TRANSFORM_SYNC_INTERVAL_MS: u64 = 50;
pub const SPRITE_SYNC_INTERVAL_MS: u64 = 100;
pub const DEFAULT_MAX_LOBBY_MEMBERS: usize = 8;
