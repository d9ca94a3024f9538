//! Demo composition root: one server and several clients sharing an in-memory lobby

use clap::Parser;
use client::client::Client;
use log::{error, info, warn};
use server::game::BlockRain;
use server::server::Server;
use shared::receiver::spawn_receive_loop;
use shared::{LoopbackHub, NetworkConfig, NetworkEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const REPORT_INTERVAL: Duration = Duration::from_secs(2);
/// Cap on the simulation step after a stall
const MAX_DELTA_TIME: f32 = 1.0 / 20.0;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Simulation ticks per second
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Number of clients joining the lobby
    #[arg(short, long, default_value = "2")]
    clients: usize,

    /// Seconds to run before shutting down, 0 runs until Ctrl+C
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Largest encoded message in bytes before it is fragmented
    #[arg(short, long, default_value_t = shared::FRAGMENT_SIZE)]
    fragment_size: usize,

    /// Seconds each handshake phase may take
    #[arg(long, default_value_t = shared::HANDSHAKE_TIMEOUT_SECS)]
    handshake_timeout: u64,

    /// Maximum number of falling blocks
    #[arg(short, long, default_value = "8")]
    blocks: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = NetworkConfig::default()
        .with_fragment_size(args.fragment_size)
        .with_handshake_timeout(Duration::from_secs(args.handshake_timeout));

    let hub = LoopbackHub::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut server = Server::new(hub.connect("server"), config.clone(), event_tx.clone());
    let lobby = server.start(args.clients + 1)?;
    let mut world = BlockRain::new(args.blocks);
    world.setup(&mut server, Instant::now())?;

    let server_transport = server.transport();
    let server_running = server.running_flag();
    let server = Arc::new(Mutex::new(server));
    let mut receive_loops = vec![spawn_receive_loop(
        server_transport,
        Arc::clone(&server),
        server_running,
    )];

    let mut clients = Vec::with_capacity(args.clients);
    for index in 0..args.clients {
        let name = format!("player{}", index + 1);
        let mut client = Client::new(hub.connect(&name), config.clone(), event_tx.clone());
        client.setup(lobby, Instant::now())?;
        info!("{} joining lobby {}", name, lobby);

        let transport = client.transport();
        let running = client.running_flag();
        let client = Arc::new(Mutex::new(client));
        receive_loops.push(spawn_receive_loop(transport, Arc::clone(&client), running));
        clients.push(client);
    }
    drop(event_tx);

    let run_time = Duration::from_secs(args.duration);
    tokio::select! {
        _ = run_simulation(Arc::clone(&server), clients.clone(), world, &mut event_rx, args.tick_rate) => {}
        _ = tokio::time::sleep(run_time), if args.duration > 0 => {
            info!("Run time of {}s elapsed, shutting down", args.duration);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    shutdown(&server, &clients, receive_loops).await;
    while let Ok(event) = event_rx.try_recv() {
        log_event(&event);
    }
    Ok(())
}

/// Drives the world, the server and every client at a fixed rate
async fn run_simulation(
    server: Arc<Mutex<Server>>,
    clients: Vec<Arc<Mutex<Client>>>,
    mut world: BlockRain,
    events: &mut mpsc::UnboundedReceiver<NetworkEvent>,
    tick_rate: u32,
) {
    let mut timer = interval(Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_update = Instant::now();
    let mut last_report = last_update;

    loop {
        timer.tick().await;

        let now = Instant::now();
        let mut delta_time = now.duration_since(last_update).as_secs_f32();
        last_update = now;
        if delta_time > MAX_DELTA_TIME {
            warn!(
                "Large delta time detected ({:.3}s), capping to {:.3}s",
                delta_time, MAX_DELTA_TIME
            );
            delta_time = MAX_DELTA_TIME;
        }

        {
            let mut server = server.lock().await;
            if let Err(e) = world.update(&mut server, now, delta_time) {
                error!("World update failed: {}", e);
            }
            server.update(now);
        }

        for client in &clients {
            client.lock().await.update(now);
        }

        while let Ok(event) = events.try_recv() {
            log_event(&event);
        }

        if now.duration_since(last_report) >= REPORT_INTERVAL {
            last_report = now;
            report(&server, &clients).await;
        }
    }
}

async fn report(server: &Arc<Mutex<Server>>, clients: &[Arc<Mutex<Client>>]) {
    {
        let server = server.lock().await;
        info!(
            "Server: {} client(s), {} object(s) in '{}'",
            server.client_count(),
            server.session().scene.len(),
            server.session().scene.name()
        );
    }
    for (index, client) in clients.iter().enumerate() {
        let client = client.lock().await;
        info!(
            "Client {}: {:?}, {} object(s), ping {:.1}ms",
            index + 1,
            client.phase(),
            client.object_count(),
            client.ping_rate() * 1000.0
        );
    }
}

fn log_event(event: &NetworkEvent) {
    match event {
        NetworkEvent::ServerStarted { lobby } => info!("Event: server started in lobby {}", lobby),
        NetworkEvent::ClientConnected { lobby } => info!("Event: connected to lobby {}", lobby),
        NetworkEvent::LobbyJoin { name, lobby, .. } => {
            info!("Event: {} joined lobby {}", name, lobby)
        }
        NetworkEvent::LobbyLeave { name, lobby, .. } => {
            info!("Event: {} left lobby {}", name, lobby)
        }
        NetworkEvent::SelfLobbyLeave => info!("Event: left lobby"),
        NetworkEvent::ConnectionFailed { reason } => warn!("Event: connection failed: {}", reason),
    }
}

async fn shutdown(
    server: &Arc<Mutex<Server>>,
    clients: &[Arc<Mutex<Client>>],
    receive_loops: Vec<JoinHandle<()>>,
) {
    for client in clients {
        client.lock().await.leave();
    }
    server.lock().await.stop();

    for handle in receive_loops {
        if let Err(e) = handle.await {
            error!("Receive loop panicked: {}", e);
        }
    }
}
