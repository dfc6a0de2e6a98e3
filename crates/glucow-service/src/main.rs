//! Glucow Service - background glucose sync and HTTP API.
//!
//! Run with: `cargo run -p glucow-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use glucow_core::units::format_value;
use glucow_core::{Credentials, LibreLinkUpClient, SystemClock};
use glucow_service::{AppState, Config, PreferenceCredentials, api};
use glucow_store::{HistoryStore, PreferenceStore};

/// Glucow Service - background glucose sync and HTTP REST API.
#[derive(Parser, Debug)]
#[command(name = "glucow-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Data directory (overrides config).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Disable the HTTP API (sync only).
    #[arg(long, global = true)]
    no_api: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service in the foreground (default behavior).
    Run,

    /// Print the newest stored readings in the configured unit.
    History {
        /// Number of readings to print.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Store LibreLinkUp session credentials.
    Credentials {
        /// Bearer token.
        #[arg(long)]
        token: String,
        /// Account user id.
        #[arg(long)]
        user_id: String,
        /// SHA-256 of the user id.
        #[arg(long)]
        account_id_hash: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("glucow_service=info".parse()?)
                .add_directive("glucow_core=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    match args.command {
        Some(Command::History { limit }) => print_history(&config, limit),
        Some(Command::Credentials {
            token,
            user_id,
            account_id_hash,
        }) => store_credentials(&config, token, user_id, account_id_hash),
        Some(Command::Run) | None => run_server(config, args.no_api).await,
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn open_history(config: &Config) -> HistoryStore {
    let prefs = PreferenceStore::open(config.storage.preferences_path());
    HistoryStore::open(config.storage.history_path(), prefs)
}

fn print_history(config: &Config, limit: usize) -> anyhow::Result<()> {
    let history = open_history(config);
    let unit = history.prefs().display_unit().unwrap_or(config.display.unit);
    let readings = history.readings();
    let start = readings.len().saturating_sub(limit);

    for reading in &readings[start..] {
        println!(
            "{}  {:>5} {}",
            reading.timestamp,
            format_value(unit, reading.value_mgdl),
            unit
        );
    }
    println!("{} of {} readings", readings.len() - start, readings.len());
    Ok(())
}

fn store_credentials(
    config: &Config,
    token: String,
    user_id: String,
    account_id_hash: String,
) -> anyhow::Result<()> {
    let credentials = Credentials::new(token, user_id, account_id_hash)
        .context("token, user id and account id hash must all be non-empty")?;
    let prefs = PreferenceStore::open(config.storage.preferences_path());
    PreferenceCredentials::new(prefs.clone()).store(&credentials)?;
    println!("Credentials saved to {}", prefs.path().display());
    Ok(())
}

async fn run_server(config: Config, no_api: bool) -> anyhow::Result<()> {
    info!("Data directory: {}", config.storage.data_dir.display());
    let history = open_history(&config);
    info!("Loaded {} readings", history.len());

    let client = LibreLinkUpClient::new(config.source.client_config())?;
    info!("Syncing from {}", client.base_url());

    let serve_api = config.server.api_enabled && !no_api;
    let bind = config.server.bind.clone();
    let state = AppState::new(config, history, Arc::new(client), Arc::new(SystemClock));

    let handles = state.spawn_background();
    state.scheduler.start();

    if serve_api {
        let app = Router::new()
            .merge(api::router())
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(Arc::clone(&state));

        let addr: SocketAddr = bind.parse()?;
        info!("Starting server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        info!("HTTP API disabled");
        shutdown_signal().await;
    }

    info!("Shutting down");
    state.shutdown(handles).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
