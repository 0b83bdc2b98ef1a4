//! Tether agent entry point
//!
//! Accepts protocol channels over TCP, serves the `Locator` on each of
//! them and takes part in UDP discovery. All protocol work runs on one
//! dispatch thread; the async main only waits for a shutdown signal.

use anyhow::{Context, Result};
use clap::Parser;
use network::channel::{Channel, ChannelListener};
use network::discovery::{keys, Locator, LocatorListener, LocatorService, Peer, UdpDiscovery};
use network::{ChannelError, Dispatcher, ProtocolConfig, TcpTransportListener};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); TETHER_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP address to accept channels on
    #[arg(long)]
    bind: Option<String>,

    /// Host advertised in discovery; defaults to the bind address
    #[arg(long)]
    host: Option<String>,

    /// Peer name advertised in discovery
    #[arg(long, default_value = "tether-agent")]
    name: String,

    /// Do not take part in UDP discovery
    #[arg(long)]
    no_discovery: bool,

    /// Default log level; RUST_LOG overrides it
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

/// What this agent advertises about itself
#[derive(Debug, Clone)]
struct Identity {
    agent_id: String,
    name: String,
    host: Option<String>,
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("network={level},tether_agent={level},warn")));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_json);

    let mut config = ProtocolConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = &args.bind {
        config.tcp.bind_address = bind.clone();
    }
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let identity = Identity {
        agent_id: uuid::Uuid::new_v4().to_string(),
        name: args.name.clone(),
        host: args.host.clone(),
    };
    info!(agent = %identity.agent_id, version = env!("CARGO_PKG_VERSION"), "Starting agent");

    let dispatcher = Dispatcher::start(config.dispatch.thread_name.clone()).context("starting dispatcher")?;
    let locator = Locator::new(dispatcher.clone(), &config.locator);

    let (ready_tx, ready_rx) = oneshot::channel();
    dispatcher.spawn(serve(
        dispatcher.clone(),
        config,
        locator,
        identity,
        !args.no_discovery,
        ready_tx,
    ))?;

    let outcome = match ready_rx.await {
        Ok(Ok(addr)) => {
            info!(addr = %addr, "Agent ready");
            tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
            info!("Shutdown signal received");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(anyhow::anyhow!("dispatcher stopped during startup")),
    };

    tokio::task::spawn_blocking(move || dispatcher.shutdown())
        .await
        .context("joining dispatcher")?;
    if let Err(e) = &outcome {
        error!(error = %e, "Agent failed");
    }
    outcome
}

/// Runs on the dispatch thread for the lifetime of the agent
async fn serve(
    dispatcher: Dispatcher,
    config: ProtocolConfig,
    locator: Locator,
    identity: Identity,
    discovery: bool,
    ready: oneshot::Sender<Result<SocketAddr>>,
) {
    let (listener, service) = match start(&config, &locator, &identity, discovery).await {
        Ok(started) => started,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    match listener.local_addr() {
        Ok(addr) => {
            let _ = ready.send(Ok(addr));
        }
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    }

    loop {
        match listener.accept().await {
            Ok(transport) => {
                let peer = transport.peer_addr();
                if let Err(e) = open_channel(&dispatcher, &config, &service, Arc::new(transport)) {
                    warn!(peer = %peer, error = %e, "Failed to open channel");
                }
            }
            Err(e) => warn!(error = %e, "Accept failed"),
        }
    }
}

async fn start(
    config: &ProtocolConfig,
    locator: &Locator,
    identity: &Identity,
    discovery: bool,
) -> Result<(TcpTransportListener, Arc<LocatorService>)> {
    let bind = config.tcp.bind_addr()?;
    let listener = TcpTransportListener::bind(bind, config.channel.max_frame_size)
        .await
        .with_context(|| format!("binding {bind}"))?;
    let addr = listener.local_addr()?;

    let service = LocatorService::register(locator.clone())?;
    locator.add_listener(Arc::new(PeerLog))?;
    locator.add_local_peer(local_peer(identity, addr))?;

    if discovery {
        let udp = UdpDiscovery::bind(&config.locator).await.context("binding discovery socket")?;
        udp.start(locator, &config.locator)?;
        info!(addr = %udp.local_addr(), role = ?udp.role(), "Discovery running");
    }
    Ok((listener, service))
}

fn local_peer(identity: &Identity, addr: SocketAddr) -> Peer {
    let host = identity.host.clone().unwrap_or_else(|| {
        if addr.ip().is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            addr.ip().to_string()
        }
    });
    let mut peer = Peer::tcp(&host, addr.port())
        .with_attribute(keys::NAME, identity.name.as_str())
        .with_attribute(keys::AGENT_ID, identity.agent_id.as_str())
        .with_attribute(keys::OS_NAME, std::env::consts::OS);
    if let Ok(user) = std::env::var("USER") {
        peer = peer.with_attribute(keys::USER_NAME, user);
    }
    peer
}

fn open_channel(
    dispatcher: &Dispatcher,
    config: &ProtocolConfig,
    service: &Arc<LocatorService>,
    transport: Arc<network::TcpTransport>,
) -> Result<(), ChannelError> {
    let channel = Channel::new(dispatcher.clone(), transport, config);
    channel.add_service(service.clone())?;
    channel.add_channel_listener(Arc::new(ConnectionLog))?;
    channel.start()
}

struct ConnectionLog;

impl ChannelListener for ConnectionLog {
    fn on_channel_opened(&self, channel: &Channel) {
        info!(channel = %channel.id(), peer = %channel.remote_peer_name(), services = ?channel.remote_services(), "Client connected");
    }

    fn on_channel_closed(&self, channel: &Channel, error: Option<&ChannelError>) {
        match error {
            Some(e) => info!(channel = %channel.id(), error = %e, "Client disconnected"),
            None => info!(channel = %channel.id(), "Client channel closed"),
        }
    }

    fn congestion_level(&self, channel: &Channel, level: i32) {
        debug!(channel = %channel.id(), level, "Client congestion");
    }
}

struct PeerLog;

impl LocatorListener for PeerLog {
    fn peer_added(&self, peer: &Peer) {
        info!(peer = %peer.id(), name = ?peer.name(), host = ?peer.host(), "Peer added");
    }

    fn peer_changed(&self, peer: &Peer) {
        info!(peer = %peer.id(), "Peer changed");
    }

    fn peer_removed(&self, id: &str) {
        info!(peer = %id, "Peer removed");
    }

    fn peer_heart_beat(&self, id: &str) {
        trace!(peer = %id, "Peer heartbeat");
    }
}
