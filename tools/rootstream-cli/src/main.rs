//! RootStream CLI - headless client for RootStream hosts
//!
//! Browse for hosts on the local network, or connect to one and watch the
//! link metrics.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rootstream_client::{ClientContext, ConnectionState, TransportSession};
use rootstream_core::{Credentials, SecuritySession, StaticAuthBackend};
use rootstream_discovery::{DiscoveryService, Peer};
use rootstream_transport::TcpConnector;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::CliConfig;

/// RootStream - low-latency remote desktop streaming client
#[derive(Parser)]
#[command(name = "rootstream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List hosts advertised on the local network
    Discover {
        /// How long to browse (seconds)
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },

    /// Connect to a host and report link metrics
    Connect {
        /// Host address; browse for `--name` if omitted
        host: Option<String>,

        /// Host port
        #[arg(short, long, default_value_t = rootstream_core::DEFAULT_PORT)]
        port: u16,

        /// Advertised host name to look up
        #[arg(short, long)]
        name: Option<String>,

        /// Username
        #[arg(short, long, env = "ROOTSTREAM_USER")]
        user: Option<String>,

        /// Password
        #[arg(long, env = "ROOTSTREAM_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Key shared with the host (64 hex characters)
        #[arg(long, env = "ROOTSTREAM_KEY", hide_env_values = true)]
        key: Option<String>,

        /// Send and receive plaintext
        #[arg(long)]
        no_encrypt: bool,

        /// Metrics report interval (seconds)
        #[arg(short, long, default_value = "2")]
        interval: u64,

        /// Disconnect after this many seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;
    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Discover { seconds } => discover(config, Duration::from_secs(seconds)).await,
        Commands::Connect {
            host,
            port,
            name,
            user,
            password,
            key,
            no_encrypt,
            interval,
            duration,
        } => {
            let mut config = config;
            if no_encrypt {
                config.session.encrypt = false;
            }
            if user.is_some() {
                config.auth.username = user;
            }
            if password.is_some() {
                config.auth.password = password;
            }
            if key.is_some() {
                config.auth.shared_key = key;
            }
            connect(
                config,
                host,
                port,
                name,
                Duration::from_secs(interval.max(1)),
                Duration::from_secs(duration),
            )
            .await
        }
    }
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

async fn discover(config: CliConfig, period: Duration) -> Result<()> {
    println!(
        "{} Browsing for {} ({}s)",
        "RootStream".cyan().bold(),
        config.discovery.service_type,
        period.as_secs()
    );

    let service = DiscoveryService::new(config.discovery);
    service.start()?;
    tokio::select! {
        _ = tokio::time::sleep(period) => {}
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }
    service.stop().await;

    let peers = service.peers();
    if peers.is_empty() {
        println!("{}", "No hosts found".yellow());
        return Ok(());
    }
    for peer in peers.iter() {
        println!(
            "  {} {} {}",
            peer.name.green().bold(),
            peer.address(),
            peer.id.dimmed()
        );
    }
    Ok(())
}

fn security(config: &CliConfig) -> Result<Arc<SecuritySession>> {
    let auth = &config.auth;
    let (Some(username), Some(password)) = (&auth.username, &auth.password) else {
        if config.session.encrypt {
            bail!("encryption needs --user and --password (or --no-encrypt)");
        }
        return Ok(Arc::new(SecuritySession::new(Arc::new(StaticAuthBackend::new()))));
    };

    let mut backend = StaticAuthBackend::new().with_user(username.clone(), password);
    match &auth.shared_key {
        Some(hex) => backend = backend.with_shared_key(config::parse_key(hex)?),
        None if config.session.encrypt => {
            warn!("No shared key configured; the host will not be able to read this session")
        }
        None => {}
    }

    let session = SecuritySession::new(Arc::new(backend));
    session
        .authenticate(&Credentials::new(username.clone(), password.clone()))
        .context("Authentication failed")?;
    Ok(Arc::new(session))
}

async fn find_peer(config: &CliConfig, name: &str) -> Result<Peer> {
    let service = DiscoveryService::new(config.discovery.clone());
    service.start()?;

    let mut peers = service.registry().subscribe();
    let found = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(peer) = peers.borrow().iter().find(|p| p.name == name) {
                return Some(peer.clone());
            }
            if peers.changed().await.is_err() {
                return None;
            }
        }
    })
    .await;
    service.stop().await;

    match found {
        Ok(Some(peer)) => Ok(peer),
        _ => bail!("host {:?} not found", name),
    }
}

async fn connect(
    config: CliConfig,
    host: Option<String>,
    port: u16,
    name: Option<String>,
    interval: Duration,
    duration: Duration,
) -> Result<()> {
    let peer = match (host, name) {
        (Some(host), name) => {
            let name = name.unwrap_or_else(|| host.clone());
            Peer::manual(name, host, port)
        }
        (None, Some(name)) => find_peer(&config, &name).await?,
        (None, None) => bail!("give a host address or --name"),
    };

    let ctx = ClientContext::new(security(&config)?)
        .with_connector(Arc::new(TcpConnector::new(config.transport.clone())));
    let session = TransportSession::builder()
        .config(config.session.clone())
        .build(&ctx);

    println!(
        "{} Connecting to {} at {}",
        "RootStream".cyan().bold(),
        peer.name.green(),
        peer.address()
    );
    let mut states = session.connect(&peer).await?;

    // Stand-in renderer: count presented frames
    let frames = session.frames();
    let presenter = tokio::spawn(async move {
        let mut presented = 0u64;
        loop {
            frames.pop().await;
            presented += 1;
            if presented % 300 == 0 {
                info!("{} frames presented", presented);
            }
        }
    });

    let deadline = async {
        if duration.is_zero() {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(duration).await;
        }
    };
    tokio::pin!(deadline);

    let mut report = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print_state(&state);
            }
            _ = report.tick() => {
                let m = session.metrics();
                let stats = session.stats();
                println!(
                    "  {:>5.1} fps  {:>8.0} kbps  latency {:>4}ms (avg {:.1}, jitter {:.1})  loss {:.2}%  drops {}/{}",
                    m.fps,
                    m.bitrate_bps / 1000.0,
                    m.latency_ms,
                    m.rolling_latency_ms,
                    m.jitter_stddev_ms(),
                    m.loss_percentage(),
                    stats.protocol_drops,
                    stats.crypto_drops,
                );
            }
        }
    }

    presenter.abort();
    session.disconnect().await;
    println!("{}", "Disconnected".yellow());
    Ok(())
}

fn print_state(state: &ConnectionState) {
    let label = match state {
        ConnectionState::Connected | ConnectionState::Streaming => state.to_string().green(),
        ConnectionState::Connecting | ConnectionState::Reconnecting => state.to_string().yellow(),
        ConnectionState::Error(_) => state.to_string().red(),
        ConnectionState::Disconnected => state.to_string().normal(),
    };
    println!("{} {}", "State:".bold(), label);
}
