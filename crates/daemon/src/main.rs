use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ami_daemon::api;
use ami_daemon::bootstrap::build_app_state;
use ami_domain::config::Config;

#[derive(Parser)]
#[command(name = "amid", about = "Local daemon orchestrating long-running AI tasks")]
struct Cli {
    /// Path to a TOML config file (defaults apply when absent).
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("amid {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None | Some(Command::Serve) => {
            let config = Arc::new(load_config(cli.config.as_deref())?);
            let _log_guard = init_tracing(&config);
            run_server(config).await
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config '{}'", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config '{}'", path.display()))
        }
        None => Ok(Config::default()),
    }
}

/// Structured logs: env-filtered stdout plus a daily-rotated file under
/// `~/.ami/logs/`.
fn init_tracing(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let logs_dir = config.home.logs_dir();
    let _ = std::fs::create_dir_all(&logs_dir);
    let file_appender = tracing_appender::rolling::daily(logs_dir, "app.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ami_engine=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    guard
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("ami daemon starting");

    let state = build_app_state(config.clone())?;
    state.registry.spawn_gc();

    let app = api::app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let local_addr = listener.local_addr()?;

    // Pre-startup rendezvous with the UI: publish the bound port.
    std::fs::write(config.home.port_file(), local_addr.port().to_string())
        .context("writing daemon.port")?;
    tracing::info!(addr = %local_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = std::fs::remove_file(config.home.port_file());
    tracing::info!("ami daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
