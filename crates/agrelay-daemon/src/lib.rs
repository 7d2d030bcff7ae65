mod args;
mod auth;
mod hooks;
mod push;
mod routes;
mod sse;
mod state;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use agrelay_logs::LogReader;
use agrelay_runtime::{Daemon, RuntimeConfig};

pub use args::{Cli, Commands, ServeArgs};
pub use push::{PushStore, PushSubscription};
pub use routes::router;
pub use state::AppState;

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => serve(args).await,
        Commands::Token { data_dir } => {
            let data_dir = resolve_data_dir(data_dir)?;
            let token = auth::load_or_create_token(&data_dir)?;
            println!("{}", token);
            Ok(())
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AGRELAY_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn resolve_data_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    dirs::home_dir()
        .map(|home| home.join(".agrelay"))
        .context("cannot determine a home directory for the daemon data dir")
}

fn resolve_log_root(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    LogReader::default_root().context("cannot determine the agent's home directory")
}

async fn serve(args: ServeArgs) -> Result<()> {
    init_tracing();

    let log_root = resolve_log_root(args.log_root.clone())?;
    let data_dir = resolve_data_dir(args.data_dir.clone())?;
    let token = auth::load_or_create_token(&data_dir)?;

    let mut config = RuntimeConfig::new(&log_root);
    config.agent_binary = args.agent_binary.clone();

    // Orphan sweep happens inside Daemon::start, before anything is served
    let daemon = Arc::new(Daemon::start(config));
    let push = push::PushStore::open(&data_dir)?;
    let state = AppState::new(Arc::clone(&daemon), token.clone(), push);

    let addr = format!("{}:{}", args.bind, args.port);
    let hook_endpoint = format!("http://{}/api/claude-hook", addr);
    if !args.no_hooks {
        if let Err(err) = hooks::install(&log_root, &hook_endpoint, &token) {
            warn!(error = %err, "could not register the agent notification hook");
        }
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(%addr, log_root = %log_root.display(), "agrelay daemon listening");
    info!("bearer token: {}", token);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down");
    if !args.no_hooks
        && let Err(err) = hooks::uninstall(&log_root)
    {
        warn!(error = %err, "could not unregister the agent notification hook");
    }
    daemon.shutdown().await;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
