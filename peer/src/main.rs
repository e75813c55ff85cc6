use clap::{Args as ClapArgs, Parser, Subcommand};
use log::{info, warn};
use peer::transport::UdpTransport;
use peer::{Node, NodeConfig, StateHandle, UdpConfig};
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless grovesync peer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: Common,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a session and act as its authority
    Host {
        /// Address to accept links on
        #[arg(short, long, default_value = "0.0.0.0:7777")]
        bind: String,

        /// Session name; a random suffix is appended
        #[arg(short, long, default_value = "grove")]
        name: String,
    },
    /// Join a session hosted elsewhere
    Join {
        /// Authority address
        #[arg(short = 'H', long, default_value = "127.0.0.1:7777")]
        host: SocketAddr,

        /// Session id shared by the authority
        #[arg(short, long)]
        session: String,
    },
}

#[derive(ClapArgs, Debug)]
struct Common {
    /// Name shown to other participants
    #[arg(short, long, global = true, default_value = "")]
    display_name: String,

    /// Simulation ticks per second
    #[arg(short, long, global = true, default_value = "30")]
    tick_rate: u32,

    /// Authority snapshot cadence in milliseconds
    #[arg(long, global = true, default_value = "500")]
    snapshot_ms: u64,

    /// Wander around and act randomly to generate traffic
    #[arg(long, global = true)]
    bot: bool,

    /// Seconds between status summaries (0 disables them)
    #[arg(long, global = true, default_value = "5")]
    status_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let cli = Cli::parse();
    let config = NodeConfig {
        snapshot_interval: Duration::from_millis(cli.common.snapshot_ms.max(1)),
        ..NodeConfig::named(cli.common.display_name.clone())
    };
    let mut node = Node::new(config);

    match &cli.command {
        Command::Host { bind, name } => {
            let transport = UdpTransport::host(&UdpConfig::bind(bind.clone()), node.inbound_sender()).await?;
            let session_id = node.create_session(name, transport)?;
            info!("Hosting session {} on {}", session_id, bind);
            println!("Session id: {}", session_id);
        }
        Command::Join { host, session } => {
            let transport =
                UdpTransport::connect(&UdpConfig::default(), *host, node.inbound_sender()).await?;
            node.join_session(session, transport)?;
            info!("Joining session {} at {}", session, host);
        }
    }

    if cli.common.status_secs > 0 {
        tokio::spawn(report_status(
            node.state_handle(),
            Duration::from_secs(cli.common.status_secs),
        ));
    }

    let tick_rate = cli.common.tick_rate.max(1);
    let mut ticker = interval(Duration::from_secs_f64(1.0 / tick_rate as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if cli.common.bot {
                    wander(&mut node);
                }
                node.tick();
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutting down");
                break;
            }
        }
    }

    node.disconnect().await;
    Ok(())
}

/// Random-walk input for headless runs.
fn wander(node: &mut Node) {
    let mut rng = rand::thread_rng();

    if rng.gen_bool(0.1) {
        let (dx, dy) = match rng.gen_range(0..4) {
            0 => (1, 0),
            1 => (-1, 0),
            2 => (0, 1),
            _ => (0, -1),
        };
        node.move_local(dx, dy);
    }
    if rng.gen_bool(0.02) {
        node.cycle_mode();
    }
    if rng.gen_bool(0.05) {
        node.perform_action();
    }
}

async fn report_status(mut state: StateHandle, every: Duration) {
    let mut ticker = interval(every);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let world = state.latest();

        let scores: Vec<String> = world
            .actors
            .values()
            .map(|a| {
                let name = if a.display_name.is_empty() {
                    format!("#{}", a.id)
                } else {
                    a.display_name.clone()
                };
                format!("{}={}", name, a.score)
            })
            .collect();
        info!(
            "{} actors, {} roamers, {} projectiles | {}",
            world.actors.len(),
            world.roamers.len(),
            world.projectiles.len(),
            scores.join(" ")
        );

        if !state.changed().await {
            break;
        }
    }
}
