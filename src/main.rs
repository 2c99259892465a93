// Herald - LAN announcement and update distribution
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use herald::config::{load_config, Config};
use herald::logging::init_tracing;
use herald::messages::{Announcement, Message};
use herald::network::{download_verified, ApiClient, ClientEvent, PollingClient};
use herald::server::UpdateServer;
use herald::service::DiscoveryClient;
use herald::store::{MessageStore, VersionInfo};

#[derive(Parser, Debug)]
#[command(name = "herald", author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.herald/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the update server and discovery responder until Ctrl-C
    Serve,
    /// Append an announcement to the local store (a running server serves it on its next request)
    Announce {
        title: String,
        content: String,
        #[arg(long, default_value = "1.0")]
        version: String,
    },
    /// Retract an announcement by id
    Retract { id: Uuid },
    /// Publish an artifact as a new version
    Publish {
        file: PathBuf,
        #[arg(long)]
        version: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Print the local message log
    Messages {
        /// Print raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Poll the configured server and print changes until Ctrl-C
    Watch,
    /// Broadcast one discovery packet and list the servers that answer
    Discover {
        #[arg(long, default_value_t = 1500)]
        wait_ms: u64,
    },
    /// Download a version from the configured server and verify its hash
    Download { version: String, dest: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Announce {
            title,
            content,
            version,
        } => {
            let msg = open_store(&config)?.append_announcement(&title, &content, &version)?;
            println!("Announced {}", msg.id());
            Ok(())
        }
        Command::Retract { id } => {
            let msg = open_store(&config)?.append_delete(id)?;
            println!("Retracted {} (tombstone {})", id, msg.id());
            Ok(())
        }
        Command::Publish {
            file,
            version,
            description,
        } => {
            let info = open_store(&config)?.publish_version(&version, &file, &description)?;
            println!("Published {} ({}, sha256 {})", info.version, info.filename, info.file_hash);
            Ok(())
        }
        Command::Messages { json } => {
            let messages = open_store(&config)?.messages();
            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else {
                messages.iter().for_each(print_message);
            }
            Ok(())
        }
        Command::Watch => watch(config).await,
        Command::Discover { wait_ms } => discover(config, Duration::from_millis(wait_ms)).await,
        Command::Download { version, dest } => download(config, &version, dest).await,
    }
}

fn open_store(config: &Config) -> Result<MessageStore> {
    MessageStore::open(&config.server.storage_dir).with_context(|| {
        format!(
            "Failed to open store at {}",
            config.server.storage_dir.display()
        )
    })
}

async fn serve(config: Config) -> Result<()> {
    let server = UpdateServer::new(config.server)?;
    let addrs = server.start().await?;

    eprintln!("✓ Serving updates on http://{}", addrs.http);
    if let Some(udp) = addrs.udp {
        eprintln!("✓ Answering discovery on udp://{}", udp);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    eprintln!("Shutting down...");
    server.stop().await;
    Ok(())
}

async fn watch(config: Config) -> Result<()> {
    let poller = PollingClient::new(&config.client)?;
    let mut events = poller.subscribe();

    if let Some(current) = poller.current_announcement() {
        print_announcement(&current);
    }
    poller.start();

    let discovery = match DiscoveryClient::bind(&config.client, poller.event_sender()).await {
        Ok(discovery) => {
            discovery.start();
            if let Err(e) = discovery.broadcast_discovery().await {
                tracing::warn!("Discovery broadcast failed: {e:#}");
            }
            Some(discovery)
        }
        Err(e) => {
            tracing::warn!("Discovery unavailable: {e:#}");
            None
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    poller.stop().await;
    if let Some(discovery) = discovery {
        discovery.stop().await;
    }
    Ok(())
}

async fn discover(config: Config, wait: Duration) -> Result<()> {
    let (tx, _rx) = tokio::sync::broadcast::channel(16);
    let client = DiscoveryClient::bind(&config.client, tx).await?;
    let peers = client.discover(wait).await?;
    client.stop().await;

    if peers.is_empty() {
        println!("No update servers answered on {}", client.target());
    }
    for peer in peers {
        println!("{} (from {})", peer.ip, peer.addr);
        if let Some(ann) = &peer.announcement {
            println!("  announcement: {} [{}]", ann.title, ann.id);
        }
        if let Some(info) = &peer.version_info {
            println!("  latest version: {}", info.version);
        }
    }
    Ok(())
}

async fn download(config: Config, version: &str, dest: PathBuf) -> Result<()> {
    let api = ApiClient::new(&config.client.server_url, config.client.request_timeout())?;
    let info: VersionInfo = api
        .version_info(version)
        .await?
        .with_context(|| format!("Version {version} not found on {}", api.base_url()))?;

    let dest = if dest.is_dir() {
        dest.join(&info.filename)
    } else {
        dest
    };
    let path = download_verified(&api, &info, &dest, &CancellationToken::new()).await?;
    println!("✓ Downloaded {} to {} (sha256 verified)", info.version, path.display());
    Ok(())
}

fn print_message(msg: &Message) {
    match msg {
        Message::Announcement {
            id,
            title,
            version,
            timestamp,
            ..
        } => println!("{timestamp}  announce  {id}  {title} (v{version})"),
        Message::Delete {
            id,
            deleted_id,
            timestamp,
        } => println!("{timestamp}  delete    {id}  -> {deleted_id}"),
    }
}

fn print_announcement(ann: &Announcement) {
    println!("📢 {} (v{}, {})", ann.title, ann.version, ann.publish_time);
    if !ann.content.is_empty() {
        println!("   {}", ann.content);
    }
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::AnnouncementChanged(Some(ann)) => print_announcement(ann),
        ClientEvent::AnnouncementChanged(None) => println!("📢 (no current announcement)"),
        ClientEvent::VersionsChanged(versions) => {
            if let Some(latest) = versions.first() {
                println!("⬆ Latest version: {} ({} available)", latest.version, versions.len());
            }
        }
        ClientEvent::PeerDiscovered(peer) => println!("🔎 Found server at {}", peer.ip),
        ClientEvent::PollFailed(reason) => eprintln!("⚠ Poll failed: {reason}"),
    }
}
