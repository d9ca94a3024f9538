//! # Authoritative Server Library
//!
//! This library provides the server role of the replication layer. The server
//! hosts a lobby, owns the canonical object tree of the active network scene,
//! allocates every network id and pushes structural changes and state deltas
//! to the clients in its lobby.
//!
//! ## Core Responsibilities
//!
//! ### Lobby Hosting
//! [`server::Server::start`] creates the lobby through the transport and
//! becomes its owner. Presence notifications from the transport keep the
//! member list current; the server only accepts messages from members.
//!
//! ### State Authority
//! Objects are spawned and removed only here. Every spawn is broadcast as
//! `add_object` (or `add_network_child`) followed by the object's full state,
//! and every removal as `remove_object` per destroyed node, children first.
//!
//! ### Delta Broadcasting
//! Each tick the server compares every component against what it last sent
//! and broadcasts only the changed fields. Clients that need everything
//! again, for example right after a scene sync, ask for a forced resync.
//!
//! ## Module Organization
//!
//! ### Server Module (`server`)
//! The [`server::Server`] wrapper around a shared `Session`: lobby setup,
//! the per-tick update and the receive-loop entry point.
//!
//! ### Game Module (`game`)
//! A small demo world, a field of falling blocks, that exercises spawning,
//! movement replication and recursive removal.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::server::Server;
//! use shared::{LoopbackHub, NetworkConfig};
//! use std::time::Instant;
//! use tokio::sync::mpsc;
//!
//! let hub = LoopbackHub::new();
//! let (events, _rx) = mpsc::unbounded_channel();
//! let mut server = Server::new(hub.connect("host"), NetworkConfig::default(), events);
//! let lobby = server.start(8).unwrap();
//! println!("hosting lobby {}", lobby);
//!
//! loop {
//!     server.update(Instant::now());
//! }
//! ```

pub mod game;
pub mod server;
