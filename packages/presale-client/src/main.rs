//! Presale Client headless runner
//!
//! Connects to the configured network, keeps presale, stake and countdown
//! state in sync and prints every bus event as one JSON line on stdout until
//! Ctrl+C / SIGTERM. Logs go to stderr.

use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use presale_client::config::Config;
use presale_client::evm::{AuthorizationCache, LocalSignerConnector, WsStreamConnector};
use presale_client::types::NetworkTarget;
use presale_client::{Event, Session};

#[derive(Parser)]
#[command(name = "presale-client")]
#[command(about = "Headless presale dapp client", long_about = None)]
struct Cli {
    /// Connect the configured signing wallet after startup
    #[arg(long)]
    connect: bool,

    /// Network to target (overrides PRESALE_NETWORK and PRESALE_APP_URL)
    #[arg(long)]
    network: Option<String>,

    /// Emit logs as JSON (same as LOG_FORMAT=json)
    #[arg(long)]
    json_logs: bool,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    info!("Starting presale client");

    let mut config = Config::load()?;
    if let Some(network) = cli.network {
        config.network = NetworkTarget::new(network);
    }
    info!(
        network = %config.network,
        private_node = %config.endpoints.private_node,
        signer = config.wallet_private_key.is_some(),
        "Configuration loaded"
    );

    let wallets = Arc::new(LocalSignerConnector::new(
        config.endpoints.clone(),
        config.wallet_private_key.clone(),
        AuthorizationCache::new(config.auth_cache_path.clone()),
    ));
    let streams = Arc::new(WsStreamConnector::new(config.endpoints.clone()));
    let session = Session::create(config.session_config(), wallets, streams)?;

    let events = session.subscribe();
    let hard_cap = config.hard_cap;
    let printer = tokio::spawn(print_events(events, hard_cap));

    session.autoconnect().await;
    if cli.connect {
        session.connect().await;
    }

    wait_for_shutdown_signal().await;

    session.shutdown().await;
    printer.abort();

    info!("Presale client stopped");
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<Event>, hard_cap: f64) {
    loop {
        match events.recv().await {
            Ok(event) => {
                match &event {
                    Event::ConnectivityChanged(state) => {
                        info!(kind = %state.kind, display = %state.display_name(), "Connectivity");
                    }
                    Event::PresaleStateResult(Ok(snapshot)) => {
                        info!(
                            progress = format!("{:.2}%", snapshot.progress_percent(hard_cap)),
                            "Sale progress"
                        );
                    }
                    _ => {}
                }
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer lagged behind the bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,presale_client=debug"));

    let json = json || std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
