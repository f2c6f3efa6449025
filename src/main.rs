use clap::Parser;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use batch_lite::config::{HierarchyConfig, ServerConfig, DEFAULT_RM_PORT};
use batch_lite::hierarchy::{HierarchyDocument, NodeAddr};
use batch_lite::server::{spawn_local_workers, Server};
use batch_lite::shutdown::install_shutdown_handler;
use batch_lite::worker::CheckpointSupport;

#[derive(Parser, Debug)]
#[command(name = "batch-lite")]
#[command(version)]
#[command(about = "Batch job control plane: job holds, checkpoints and node hierarchy")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a batch server with in-process worker nodes
    Server(ServerArgs),

    /// Node hierarchy commands
    Hierarchy {
        #[command(subcommand)]
        command: HierarchyCommands,
    },
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Server name
    #[arg(long, default_value = "localhost")]
    name: String,

    /// Worker nodes (comma-separated host[:port])
    #[arg(long, default_value = "")]
    nodes: String,

    /// Node hierarchy file (TOML)
    #[arg(long)]
    hierarchy_file: Option<PathBuf>,

    /// Only send the hierarchy to nodes that ask for it
    #[arg(long)]
    send_on_demand: bool,

    /// Delay the first hierarchy push instead of sending at startup
    #[arg(long)]
    no_send_on_startup: bool,

    /// Running jobs can only be held by checkpointing them
    #[arg(long)]
    checkpoint_required: bool,

    /// Directory for job files (jobs stay in memory when unset)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Main loop tick in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Write a daily server log in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum HierarchyCommands {
    /// Parse a hierarchy file and print what nodes would receive
    Check {
        /// Node hierarchy file (TOML)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Worker nodes (comma-separated host[:port])
        #[arg(long)]
        nodes: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Hierarchy { command } => run_hierarchy_command(command),
    }
}

fn init_logging(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let _guard = init_logging(args.log_dir.as_ref());

    let hierarchy = HierarchyConfig {
        file_path: args.hierarchy_file,
        send_on_startup: !args.no_send_on_startup,
        send_on_demand_only: args.send_on_demand,
        ..HierarchyConfig::default()
    };
    let config = ServerConfig {
        server_name: args.name,
        checkpoint_required: args.checkpoint_required,
        hierarchy,
        tick_interval_ms: args.tick_ms,
        store_dir: args.store_dir,
        ..ServerConfig::default()
    }
    .with_node_list(&args.nodes)?;

    if config.nodes.is_empty() {
        tracing::warn!("No worker nodes configured");
    }

    let shutdown = install_shutdown_handler()?;
    let (server, relay) = Server::with_channel_relay(config)?;
    let workers = spawn_local_workers(
        &relay,
        &server.config.nodes,
        CheckpointSupport::Supported,
        &shutdown,
    );

    server.start().await;
    server.run(shutdown).await;

    for (_, task) in workers {
        let _ = task.await;
    }
    tracing::info!("Server stopped");
    Ok(())
}

fn run_hierarchy_command(command: HierarchyCommands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        HierarchyCommands::Check { file, nodes } => {
            let nodes = nodes
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| NodeAddr::parse(n, DEFAULT_RM_PORT))
                .collect::<Result<Vec<_>, _>>()?;

            let document = match file {
                Some(path) => HierarchyDocument::load(&path, &nodes)?,
                None => HierarchyDocument::default_for(&nodes),
            };

            for (index, path) in document.paths().iter().enumerate() {
                println!("path {}", index);
                for (level, hosts) in path.iter().enumerate() {
                    let hosts: Vec<String> = hosts.iter().map(NodeAddr::to_string).collect();
                    println!("  level {}: {}", level, hosts.join(", "));
                }
            }
            println!("{}", document.to_send_format());
        }
    }
    Ok(())
}
