//! # Replication Client Library
//!
//! This library provides the client role of the replication layer. A client
//! joins a lobby hosted by an authoritative server, proves it can reach the
//! server, receives the full object tree and from then on mirrors every
//! structural change and state delta the server broadcasts.
//!
//! ## Connection Lifecycle
//!
//! ### Handshake
//! [`client::Client::setup`] joins the lobby and starts the handshake task:
//!
//! - `AwaitingPing`: ping requests go out at a fixed cadence until one
//!   response comes back
//! - `AwaitingSceneSync`: a full scene sync is requested and applied
//! - `Connected`: the client is a full member of the session
//!
//! Each waiting phase has its own timeout. When it runs out the client leaves
//! the lobby, resets its state and reports `ConnectionFailed`.
//!
//! ### Mirroring
//! After the scene sync the client never creates objects on its own. It
//! applies `add_object`, `remove_object` and the delta messages, and asks the
//! server for any object a delta references before the object itself arrived.
//!
//! ## Module Organization
//!
//! ### Client Module (`client`)
//! The [`client::Client`] wrapper: lobby setup, the per-frame update and the
//! receive-loop entry point.
//!
//! ### Handshake Module (`handshake`)
//! The cooperative task that moves a client through the connection phases.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::client::Client;
//! use shared::{LoopbackHub, NetworkConfig};
//! use std::time::Instant;
//! use tokio::sync::mpsc;
//!
//! let hub = LoopbackHub::new();
//! let (events, _rx) = mpsc::unbounded_channel();
//! let mut client = Client::new(hub.connect("guest"), NetworkConfig::default(), events);
//! client.setup(109775240000000001, Instant::now()).unwrap();
//!
//! while !client.is_connected() {
//!     client.update(Instant::now());
//! }
//! ```

pub mod client;
pub mod handshake;
