//! Client connection handshake
//!
//! After joining a lobby the client must prove a round trip to the server
//! and then receive a full scene before it counts as connected. Both waits
//! have their own timeout; running out of either tears the session down.

use crate::client::ClientCore;
use log::{info, warn};
use shared::network::NetworkEvent;
use shared::scheduler::{Step, Task};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakePhase {
    #[default]
    Idle,
    AwaitingPing,
    AwaitingSceneSync,
    Connected,
    Failed,
}

impl HandshakePhase {
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            HandshakePhase::AwaitingPing | HandshakePhase::AwaitingSceneSync
        )
    }
}

pub const TIMEOUT_REASON: &str = "connection timed out";
pub const CLOSED_REASON: &str = "session closed during handshake";

/// Cooperative task driving a client from lobby join to connected
pub struct Handshake {
    baseline_samples: u64,
    deadline: Instant,
    poll: Duration,
    scene_sync_timeout: Duration,
}

impl Handshake {
    /// Starts waiting for the first ping round trip observed after `now`
    pub fn begin(core: &mut ClientCore, now: Instant) -> Self {
        let config = core.session.network.config();
        let handshake = Self {
            baseline_samples: core.session.network.latency().samples(),
            deadline: now + config.ping_timeout,
            poll: config.handshake_poll,
            scene_sync_timeout: config.scene_sync_timeout,
        };
        core.phase = HandshakePhase::AwaitingPing;
        info!("Handshake started, waiting for ping response");
        handshake
    }

    fn wait(&self, now: Instant) -> Step {
        Step::Sleep(self.poll.min(self.deadline.saturating_duration_since(now)))
    }
}

/// Marks the handshake failed, tears the session down and reports `reason`
pub fn abort(core: &mut ClientCore, reason: &str) {
    warn!("Handshake failed in {:?}: {}", core.phase, reason);
    core.phase = HandshakePhase::Failed;
    core.session.leave();
    core.session.network.emit(NetworkEvent::ConnectionFailed {
        reason: reason.to_string(),
    });
}

impl Task<ClientCore> for Handshake {
    fn resume(&mut self, core: &mut ClientCore, now: Instant) -> Step {
        if !core.session.network.is_running() {
            if core.phase.is_waiting() {
                abort(core, CLOSED_REASON);
            }
            return Step::Done;
        }

        match core.phase {
            HandshakePhase::AwaitingPing => {
                if core.session.network.latency().samples() > self.baseline_samples {
                    info!(
                        "Ping confirmed ({:.3}s), requesting scene sync",
                        core.session.network.latency().ping_rate()
                    );
                    core.phase = HandshakePhase::AwaitingSceneSync;
                    self.deadline = now + self.scene_sync_timeout;
                    if let Err(e) = core.session.request_scene_sync() {
                        warn!("Failed to request scene sync: {}", e);
                    }
                    return Step::NextTick;
                }
                if now >= self.deadline {
                    abort(core, TIMEOUT_REASON);
                    return Step::Done;
                }
                self.wait(now)
            }
            HandshakePhase::AwaitingSceneSync => {
                if core.session.network.scene_synced() {
                    core.phase = HandshakePhase::Connected;
                    core.session.network.set_connected(true);
                    if let Some(lobby) = core.session.network.lobby_id() {
                        info!("Connected to lobby {}", lobby);
                        core.session
                            .network
                            .emit(NetworkEvent::ClientConnected { lobby });
                    }
                    return Step::Done;
                }
                if now >= self.deadline {
                    abort(core, TIMEOUT_REASON);
                    return Step::Done;
                }
                self.wait(now)
            }
            HandshakePhase::Idle | HandshakePhase::Connected | HandshakePhase::Failed => {
                Step::Done
            }
        }
    }

    fn name(&self) -> &str {
        "handshake"
    }
}
