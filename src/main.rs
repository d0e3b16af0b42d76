//! ClusterHub node
//!
//! Runs one member of a game-server cluster: a frontend holding client
//! connections or a backend running game logic.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clusterhub::cluster::{ServerDescriptor, StaticMembership};
use clusterhub::config::{generate_sample_config, ClusterConfig};
use clusterhub::hub::{CommandTable, EventKind, Hub, HubEvent, HubOptions, Session, UidSid};
use clusterhub::network::{ClientConnector, RpcServer, RpcServerEvent};
use clusterhub::protocol;
use clusterhub::rpc::{FORWARD, REMOTE_PUSH};

/// ClusterHub - session and push hub for game server clusters
#[derive(Parser)]
#[command(name = "clusterhub")]
#[command(version = "0.1.0")]
#[command(about = "Run a member of a game-server cluster", long_about = None)]
struct Cli {
    /// Path to the cluster file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one server of the cluster
    Run {
        /// Id of the server entry to run
        #[arg(short, long)]
        server_id: String,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the command table with wire indexes
    Commands,

    /// Show protocol information
    Info,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = if let Some(config_path) = &cli.config {
        ClusterConfig::load(config_path)?
    } else {
        ClusterConfig::load_default()?
    };

    match cli.command {
        Commands::Run { server_id } => {
            run_node(config, &server_id).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Commands => {
            let table = CommandTable::new(config.commands.iter().cloned())?;
            for (index, name) in table.iter() {
                println!("{:>5}  {}", index, name);
            }
        }
        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

/// Pick a backend by uid so one client's actions keep landing on the same server
fn route_by_uid(session: &Session, _server_type: &str, candidates: &[ServerDescriptor]) -> String {
    let slot = session.uid.unwrap_or(0) as usize % candidates.len().max(1);
    candidates.get(slot).map(|s| s.id.clone()).unwrap_or_default()
}

/// Reply to every client action with the same command, back through its frontend
fn install_echo(hub: &Arc<Hub>) {
    let weak: Weak<Hub> = Arc::downgrade(hub);
    hub.events().subscribe(EventKind::ClientMessage, move |event| {
        let HubEvent::ClientMessage { session, command, body, .. } = event else {
            return;
        };
        let (Some(hub), Some(uid)) = (weak.upgrade(), session.uid) else {
            return;
        };
        let target = UidSid::new(uid, session.sid.clone());
        let command = command.clone();
        let body = body.clone();
        tokio::spawn(async move {
            match hub.push_by_uid_and_sid(&command, &body, &[target]).await {
                Ok(report) if !report.is_complete() => {
                    tracing::warn!("Echo of {} to uid {} not delivered: {:?}", command, uid, report);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Echo of {} failed: {}", command, e),
            }
        });
    });
}

async fn run_node(config: ClusterConfig, server_id: &str) -> anyhow::Result<()> {
    let identity = config.server(server_id)?;
    let membership = Arc::new(StaticMembership::from_servers(config.descriptors()));
    let commands = CommandTable::new(config.commands.iter().cloned())?;

    let hub = Hub::builder(identity.clone(), commands, membership)
        .options(HubOptions::from(&config))
        .settings(config.settings_store()?)
        .build();

    let backend_types: BTreeSet<&String> = config
        .servers
        .iter()
        .filter(|(_, entries)| entries.iter().any(|e| !e.frontend))
        .map(|(server_type, _)| server_type)
        .collect();
    if hub.is_frontend() {
        for server_type in backend_types {
            hub.route(server_type.clone(), route_by_uid);
        }
    } else {
        install_echo(&hub);
    }

    let mut rpc_server = RpcServer::new(
        identity.id.clone(),
        config.token.server_token.clone(),
        config.rpc.clone(),
        hub.procedures(),
    );
    let mut rpc_events = rpc_server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("RPC event receiver already taken"))?;
    let rpc_addr = rpc_server.start(identity.port).await?;

    let mut connector = None;
    if let Some(client_port) = identity.client_port.filter(|_| hub.is_frontend()) {
        let mut client_connector = ClientConnector::new(Arc::clone(&hub), config.connector.clone());
        client_connector.start(client_port).await?;
        connector = Some(client_connector);
    }

    hub.start()?;

    println!("\n========================================");
    println!("  ClusterHub Node Running");
    println!("========================================");
    println!("  App: {} ({})", config.app_name, config.env);
    println!("  Server: {} [{}]", identity.id, identity.server_type);
    println!("  Role: {}", hub.role());
    println!("  RPC: {}", rpc_addr);
    if let Some(client_port) = identity.client_port.filter(|_| hub.is_frontend()) {
        println!("  Clients: port {}", client_port);
    }
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            Some(event) = rpc_events.recv() => {
                match event {
                    RpcServerEvent::PeerConnected { server_id, addr } => {
                        tracing::info!("Peer connected: {} ({})", server_id, addr);
                    }
                    RpcServerEvent::PeerDisconnected { server_id, reason } => {
                        tracing::info!("Peer disconnected: {} - {}", server_id, reason);
                    }
                    RpcServerEvent::Error { message } => {
                        tracing::error!("RPC server error: {}", message);
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    for (title, value) in hub.monitor_snapshot() {
        tracing::info!("{}: {}", title, value);
    }

    if let Some(mut connector) = connector {
        connector.stop().await?;
    }
    rpc_server.stop().await?;
    tracing::info!("Node {} stopped", identity.id);

    Ok(())
}

fn print_info() {
    println!("ClusterHub Information");
    println!("======================\n");

    println!("Protocol Version: {}", protocol::PROTOCOL_VERSION);
    println!("Default RPC Port: {}", protocol::DEFAULT_RPC_PORT);
    println!("Built-in Procedures: {}, {}", REMOTE_PUSH, FORWARD);
}
