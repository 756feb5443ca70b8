use clap::{Parser, Subcommand};
use log::info;
use ripple::core::workflow::{fetch_file, scan_nodes, share_file};
use ripple::utils::setup_logging;
use ripple::{
    BroadcastDiscovery, Config, FileId, Finder, Result, RippleError, ServiceRecordDiscovery,
    StorageEngine, TcpTransport, Transport, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ripple")]
#[command(about = "Serverless LAN file sharing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a local file so it can be fetched
    Share {
        /// File to share
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Chunk size in bytes
        #[arg(long, default_value_t = ripple::core::config::DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
        /// Index directory
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Download an indexed file from a node
    Get {
        /// File ID printed by `share`
        #[arg(long)]
        file_id: Option<String>,
        /// Transfer address of the node (host:port)
        #[arg(short, long)]
        addr: Option<String>,
        /// Output path (defaults to the file's original name)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Index directory
        #[arg(long)]
        store: Option<PathBuf>,
        /// Concurrent chunk fetches
        #[arg(short, long, default_value_t = ripple::core::config::DEFAULT_WORKERS)]
        workers: usize,
    },
    /// Announce this node and serve chunks until interrupted
    Serve {
        /// UDP discovery port
        #[arg(short, long, default_value_t = ripple::core::config::DEFAULT_DISCOVERY_PORT)]
        port: u16,
        /// Node name
        #[arg(short, long)]
        name: Option<String>,
        /// TCP address for serving chunks
        #[arg(long)]
        transfer_addr: Option<String>,
        /// Only announce; do not serve chunks
        #[arg(long)]
        no_transfer: bool,
        /// Base directory for relative paths in chunk requests
        #[arg(long)]
        root: Option<PathBuf>,
        /// Index directory consulted by the transfer server
        #[arg(long)]
        store: Option<PathBuf>,
        /// Publish a DNS-SD record instead of broadcasting
        #[arg(long)]
        mdns: bool,
    },
    /// Scan the network for nodes
    List {
        /// UDP discovery port
        #[arg(short, long, default_value_t = ripple::core::config::DEFAULT_DISCOVERY_PORT)]
        port: u16,
        /// Seconds to wait for replies
        #[arg(long, default_value_t = 2)]
        wait: u64,
        /// Browse DNS-SD records instead of broadcasting
        #[arg(long)]
        mdns: bool,
    },
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Share {
            file,
            chunk_size,
            store,
        } => {
            let file = file.ok_or_else(|| RippleError::ConfigError("--file is required".to_string()))?;
            let config = Config {
                chunk_size,
                store_dir: store.unwrap_or_else(|| Config::default().store_dir),
                ..Config::default()
            };

            let store = StorageEngine::open(&config.store_dir)?;
            let (info, _, _) = share_file(&store, &file, config.chunk_size).await?;
            store.flush()?;

            println!("File ID: {}", info.id);
            println!("Size:    {} bytes", info.size);
            println!("Chunks:  {}", info.chunk_count);
        }
        Commands::Get {
            file_id,
            addr,
            out,
            store,
            workers,
        } => {
            let file_id = file_id
                .ok_or_else(|| RippleError::ConfigError("--file-id is required".to_string()))?;
            let addr =
                addr.ok_or_else(|| RippleError::ConfigError("--addr is required".to_string()))?;
            let config = Config {
                workers,
                store_dir: store.unwrap_or_else(|| Config::default().store_dir),
                ..Config::default()
            };

            let store = StorageEngine::open(&config.store_dir)?;
            let written = fetch_file(
                &CancellationToken::new(),
                &store,
                Arc::new(TcpTransport::client()),
                &addr,
                &FileId::from(file_id),
                out.as_deref(),
                config.workers,
            )
            .await?;
            println!("Download completed: {}", written.display());
        }
        Commands::Serve {
            port,
            name,
            transfer_addr,
            no_transfer,
            root,
            store,
            mdns,
        } => {
            let defaults = Config::default();
            let config = Config {
                discovery_port: port,
                node_name: name.unwrap_or(defaults.node_name),
                store_dir: store.unwrap_or(defaults.store_dir),
                transfer_addr: transfer_addr.unwrap_or(defaults.transfer_addr),
                root_dir: root.unwrap_or(defaults.root_dir),
                ..Config::default()
            };
            serve(config, !no_transfer, mdns).await?;
        }
        Commands::List { port, wait, mdns } => {
            let config = Config {
                discovery_port: port,
                ..Config::default()
            };
            let mut finder: Box<dyn Finder> = if mdns {
                Box::new(ServiceRecordDiscovery::browser())
            } else {
                Box::new(BroadcastDiscovery::scanner_from_config(&config))
            };
            let nodes = scan_nodes(finder.as_mut(), Duration::from_secs(wait)).await?;

            if nodes.is_empty() {
                println!("No nodes found");
            }
            for node in nodes {
                println!(
                    "  {} - {} (last seen {})",
                    node.id,
                    node.address,
                    node.last_seen.format("%H:%M:%S")
                );
            }
        }
        Commands::Version => {
            println!("ripple {}", VERSION);
        }
    }

    Ok(())
}

/// Announces this node, optionally serving chunks, until Ctrl+C.
async fn serve(config: Config, transfer: bool, mdns: bool) -> Result<()> {
    let ctx = CancellationToken::new();

    let mut server = None;
    if transfer {
        let index = Arc::new(StorageEngine::open(&config.store_dir)?);
        let transport = TcpTransport::new(config.transfer_addr.clone(), config.root_dir.clone())
            .with_index(index);
        let server_ctx = ctx.clone();
        server = Some(tokio::spawn(async move { transport.serve(server_ctx).await }));
    }

    let mut finder: Box<dyn Finder> = if mdns {
        // DNS-SD peers dial the advertised port directly.
        let record_port = config
            .transfer_addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .filter(|_| transfer)
            .unwrap_or(config.discovery_port);
        Box::new(ServiceRecordDiscovery::new(config.node_name.clone(), record_port))
    } else {
        Box::new(BroadcastDiscovery::from_config(&config))
    };
    finder.start(ctx.clone()).await?;
    info!("Node {} is up, press Ctrl+C to stop", config.node_name);

    tokio::signal::ctrl_c().await?;
    ctx.cancel();
    finder.stop().await?;
    if let Some(server) = server {
        server
            .await
            .map_err(|e| RippleError::NetworkError(format!("transfer server: {}", e)))??;
    }
    Ok(())
}
