mod cli;
mod error;
mod mqtt;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hcmqtt_api::{CredentialStore, MemoryCredentialStore, OAuthClient};
use hcmqtt_config::Config;
use hcmqtt_core::Bridge;

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

const INBOUND_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(hcmqtt_config::config_path);
    let config = hcmqtt_config::load_config(Some(&path)).map_err(|e| CliError::config(&path, e))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_bridge(&config, &path).await,
        Command::AuthorizeUrl => {
            let oauth = oauth_client(&config, &path, Arc::new(MemoryCredentialStore::new()))?;
            println!("{}", oauth.authorization_url()?);
            Ok(())
        }
        Command::Authorize { code } => {
            let store = config
                .credential_store()
                .map_err(|e| CliError::config(&path, e))?;
            let location = store.path().to_path_buf();
            let oauth = oauth_client(&config, &path, Arc::new(store))?;
            oauth.exchange_code(&code).await?;
            println!("Authorized. Refresh token stored in {}", location.display());
            Ok(())
        }
        Command::Config => {
            let rendered = config
                .to_redacted_toml()
                .map_err(|e| CliError::config(&path, e))?;
            println!("# {}\n{rendered}", path.display());
            Ok(())
        }
    }
}

fn oauth_client(
    config: &Config,
    path: &Path,
    store: Arc<dyn CredentialStore>,
) -> Result<OAuthClient, CliError> {
    let bridge_config = config
        .bridge_config()
        .map_err(|e| CliError::config(path, e))?;
    Ok(OAuthClient::new(
        bridge_config.oauth,
        store,
        &bridge_config.transport,
    )?)
}

// ── Bridge lifecycle ─────────────────────────────────────────────────

async fn run_bridge(config: &Config, path: &Path) -> Result<(), CliError> {
    let bridge_config = config
        .bridge_config()
        .map_err(|e| CliError::config(path, e))?;
    let settings = config
        .mqtt_settings()
        .map_err(|e| CliError::config(path, e))?;
    let store = config
        .credential_store()
        .map_err(|e| CliError::config(path, e))?;

    info!(
        api = %bridge_config.api_url,
        broker = %format!("{}:{}", settings.host, settings.port),
        tls = settings.tls,
        keep_alive_timeout = %humantime::format_duration(bridge_config.keep_alive_timeout),
        restart_interval = ?bridge_config.restart_interval.map(humantime::format_duration),
        credentials = %store.path().display(),
        "starting bridge"
    );

    let (bridge, publications) = Bridge::connect(bridge_config, Arc::new(store))?;
    let topics = bridge.topics().clone();

    let (client, eventloop) = mqtt::client(&settings, &topics);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let connection_cancel = CancellationToken::new();
    let connection = tokio::spawn(mqtt::drive(
        eventloop,
        client.clone(),
        topics.clone(),
        inbound_tx,
        connection_cancel.clone(),
    ));
    let forwarder = tokio::spawn(mqtt::forward(client.clone(), publications));

    bridge.start(inbound_rx).await;
    let signalled = shutdown_signal().await;
    info!("shutting down");

    bridge.stop().await;
    drop(bridge);
    if tokio::time::timeout(SHUTDOWN_GRACE, forwarder).await.is_err() {
        warn!("pending publications dropped");
    }

    if let Err(e) = mqtt::shutdown(&client, &topics).await {
        warn!(error = %e, "failed to mark bridge offline");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, connection).await.is_err() {
        warn!("MQTT connection did not close in time");
        connection_cancel.cancel();
    }

    signalled
}

/// Wait for SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() -> Result<(), CliError> {
    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(CliError::Signal)?;
    #[cfg(unix)]
    let terminate = sigterm.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => result.map_err(CliError::Signal),
        _ = terminate => Ok(()),
    }
}
