//! Background task feeding transport bytes into a session

use crate::transport::Transport;
use crate::PeerId;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const IDLE_POLL: Duration = Duration::from_millis(10);
/// Upper bound of messages handled per lock acquisition
const RECEIVE_BATCH: usize = 64;

/// Entry point the receive loop hands complete transport messages to
pub trait MessageSink: Send + 'static {
    fn process_received_message(&mut self, raw: &[u8], sender: PeerId, now: Instant);
}

/// Spawns a task that polls `transport` until `running` is cleared
pub fn spawn_receive_loop<T: MessageSink>(
    transport: Arc<dyn Transport>,
    sink: Arc<Mutex<T>>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Receive loop started for peer {}", transport.local_peer());

        while running.load(Ordering::SeqCst) {
            let Some((bytes, sender)) = transport.receive() else {
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            };

            let mut sink = sink.lock().await;
            sink.process_received_message(&bytes, sender, Instant::now());
            for _ in 1..RECEIVE_BATCH {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let Some((bytes, sender)) = transport.receive() else {
                    break;
                };
                sink.process_received_message(&bytes, sender, Instant::now());
            }
        }

        debug!("Receive loop stopped for peer {}", transport.local_peer());
    })
}
