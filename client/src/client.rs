//! Client role: joining a lobby and mirroring the server's scene

use crate::handshake::{self, Handshake, HandshakePhase, CLOSED_REASON};
use log::info;
use shared::network::{NetworkEvent, SetupError};
use shared::receiver::MessageSink;
use shared::scheduler::Scheduler;
use shared::{LobbyId, NetworkConfig, PeerId, Session, Transport};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// State the client's scheduled tasks operate on
pub struct ClientCore {
    pub session: Session,
    pub phase: HandshakePhase,
}

pub struct Client {
    core: ClientCore,
    scheduler: Scheduler<ClientCore>,
}

impl Client {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: NetworkConfig,
        events: mpsc::UnboundedSender<NetworkEvent>,
    ) -> Self {
        Self {
            core: ClientCore {
                session: Session::new(transport, config, events),
                phase: HandshakePhase::Idle,
            },
            scheduler: Scheduler::new(),
        }
    }

    /// Joins `lobby` and starts the handshake
    pub fn setup(&mut self, lobby: LobbyId, now: Instant) -> Result<(), SetupError> {
        self.scheduler.cancel_all();
        self.core.session.network.join_lobby(lobby)?;
        let handshake = Handshake::begin(&mut self.core, now);
        self.scheduler.start(handshake);
        Ok(())
    }

    /// Per-frame update: pings, presence, missing objects, then scheduled tasks
    pub fn update(&mut self, now: Instant) {
        self.core.session.update(now);
        self.scheduler.update(now, &mut self.core);
        if !self.core.session.network.is_running() {
            self.on_session_closed();
        }
    }

    /// Brings the phase in line with a session that was torn down elsewhere
    fn on_session_closed(&mut self) {
        match self.core.phase {
            HandshakePhase::Connected => {
                info!("Session closed, client is idle");
                self.core.phase = HandshakePhase::Idle;
            }
            HandshakePhase::AwaitingPing | HandshakePhase::AwaitingSceneSync => {
                self.scheduler.cancel_all();
                handshake::abort(&mut self.core, CLOSED_REASON);
            }
            HandshakePhase::Idle | HandshakePhase::Failed => {}
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.core.phase
    }

    pub fn is_connected(&self) -> bool {
        self.core.phase == HandshakePhase::Connected
    }

    pub fn session(&self) -> &Session {
        &self.core.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.core.session
    }

    pub fn ping_rate(&self) -> f64 {
        self.core.session.network.latency().ping_rate()
    }

    pub fn object_count(&self) -> usize {
        self.core.session.scene.len()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.core.session.network.transport()
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.core.session.network.running_flag()
    }

    pub fn pending_tasks(&self) -> usize {
        self.scheduler.len()
    }

    pub fn leave(&mut self) {
        info!("Client leaving lobby");
        self.scheduler.cancel_all();
        self.core.session.leave();
        self.core.phase = HandshakePhase::Idle;
    }
}

impl MessageSink for Client {
    fn process_received_message(&mut self, raw: &[u8], sender: PeerId, now: Instant) {
        self.core.session.process_received_message(raw, sender, now);
    }
}
