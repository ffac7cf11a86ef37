use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use sim_core::{CommandTiebreak, NetworkRole, Server, ServerConfig, handle_request};
use sim_net::{NatsConnection, ServiceRequest, WorldControlMsg, subjects};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sim-server", about = "Multi-world simulation server")]
struct Args {
    /// Path to a JSON world description file
    #[arg(short, long)]
    world: Option<PathBuf>,

    /// Inline JSON world description (a single world or a list)
    #[arg(long, conflicts_with = "world")]
    world_json: Option<String>,

    /// Target update rate in Hz
    #[arg(short = 'z', long, default_value_t = 1000.0)]
    update_rate: f64,

    /// Number of iterations to run (0 = until stopped)
    #[arg(short, long, default_value_t = 0)]
    iterations: u64,

    /// Start the simulation immediately instead of paused
    #[arg(short, long)]
    run: bool,

    /// Role in a distributed run
    #[arg(long, value_parser = parse_role, default_value = "none")]
    role: NetworkRole,

    /// Number of secondaries a primary waits for
    #[arg(long, default_value_t = 0)]
    secondaries: usize,

    /// NATS server URL (also read from SIM_NATS_URL)
    #[arg(short, long)]
    nats_url: Option<String>,

    /// Record world state to this file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Seed for deterministic runs
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Extra resource search paths
    #[arg(long)]
    resource_path: Vec<PathBuf>,

    /// Let a velocity command beat a reset hitting the same entity in the
    /// same tick (the reset wins by default)
    #[arg(long)]
    command_wins: bool,

    /// Run without the NATS service front-end
    #[arg(long)]
    headless: bool,
}

fn parse_role(s: &str) -> Result<NetworkRole, String> {
    match s {
        "none" => Ok(NetworkRole::None),
        "primary" => Ok(NetworkRole::Primary),
        "secondary" => Ok(NetworkRole::Secondary),
        other => Err(format!("unknown role {other} (none|primary|secondary)")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::new();
    if let Some(path) = &args.world {
        config.set_world_file(path);
    }
    if let Some(json) = &args.world_json {
        config.set_world_json(json);
    }
    config.set_update_rate(args.update_rate);
    config.set_start_paused(!args.run);
    config.set_network_role(args.role);
    config.set_expected_secondaries(args.secondaries);
    config.set_seed(args.seed);
    if let Some(url) = &args.nats_url {
        config.set_nats_url(url);
    }
    if let Some(path) = &args.record {
        config.set_log_record(path);
    }
    for path in &args.resource_path {
        config.add_resource_path(path);
    }
    if args.command_wins {
        config.set_command_tiebreak(CommandTiebreak::CommandWins);
    }

    let mut server = Server::new(config);
    info!(worlds = server.world_count(), "server ready");
    server.run(false, args.iterations, !args.run);
    let server = Arc::new(server);

    if !args.headless {
        match connect_nats(args.nats_url.as_deref()).await {
            Ok(nats) => {
                for (index, world) in server.world_names().into_iter().enumerate() {
                    spawn_service_task(&nats, Arc::clone(&server), world.clone(), index).await;
                    spawn_control_task(&nats, Arc::clone(&server), world, index).await;
                }
            }
            Err(err) => warn!(%err, "NATS unavailable; running without the service front-end"),
        }
    }

    // A bounded run exits on its own; otherwise wait for Ctrl-C.
    if args.iterations > 0 {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
            () = wait_until_stopped(Arc::clone(&server)) => info!("run complete"),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("interrupted");
    }
    server.stop();
    Ok(())
}

async fn connect_nats(url: Option<&str>) -> Result<NatsConnection, sim_net::NetError> {
    match url {
        Some(url) => NatsConnection::connect_to(url).await,
        None => NatsConnection::connect().await,
    }
}

async fn wait_until_stopped(server: Arc<Server>) {
    while server.running() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn spawn_service_task(
    nats: &NatsConnection,
    server: Arc<Server>,
    world: String,
    index: usize,
) {
    let subject = subjects::service_subject(&world);
    let mut sub = match nats.subscribe(&subject).await {
        Ok(sub) => sub,
        Err(err) => {
            warn!(%world, %err, "cannot subscribe to the service subject");
            return;
        }
    };
    let nats = nats.clone();
    tokio::spawn(async move {
        info!(%world, index, "service front-end listening");
        while let Some(msg) = sub.next().await {
            let request: ServiceRequest = match sim_net::decode(&msg.payload) {
                Ok(request) => request,
                Err(err) => {
                    warn!(%world, %err, "ignoring undecodable service request");
                    continue;
                }
            };
            let response = handle_request(&server, &request);
            if let Some(reply) = msg.reply {
                if let Err(err) = nats.publish(reply.as_str(), &response).await {
                    warn!(%world, %err, "failed to publish service response");
                }
            }
        }
    });
}

async fn spawn_control_task(
    nats: &NatsConnection,
    server: Arc<Server>,
    world: String,
    index: usize,
) {
    let subject = subjects::control_subject(&world);
    let mut sub = match nats.subscribe(&subject).await {
        Ok(sub) => sub,
        Err(err) => {
            warn!(%world, %err, "cannot subscribe to the control subject");
            return;
        }
    };
    tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            match sim_net::decode::<WorldControlMsg>(&msg.payload) {
                Ok(control) => {
                    server.post_control(control, index);
                }
                Err(err) => warn!(%world, %err, "ignoring undecodable control message"),
            }
        }
    });
}
