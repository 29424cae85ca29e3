//! minikv - A single-threaded in-memory key-value server
//!
//! This is the main entry point for the minikv server.
//! It loads the configuration, sets up logging and runs the event loop on the
//! main thread.

use anyhow::Context;
use clap::Parser;
use minikv::config::Config;
use minikv::server::{Server, ShutdownHandle};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "minikv", version, about = "A single-threaded in-memory key-value server")]
struct Cli {
    /// Path to a JSON configuration file
    config: Option<PathBuf>,

    /// Host to bind to (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter, e.g. "info" or "minikv=debug" (RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.validate()?;
        Ok(config)
    }
}

fn print_banner(config: &Config) {
    println!(
        r#"
minikv v{} - single-threaded in-memory key-value server
──────────────────────────────────────────────────────────────
Listening on {}
Use Ctrl+C to shutdown gracefully.
"#,
        minikv::VERSION,
        config.bind_addr()
    );
}

/// Trips `handle` on Ctrl+C. The event loop notices on its next cron run.
fn watch_ctrl_c(handle: ShutdownHandle) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("minikv-signals".into())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Shutdown signal received, stopping server...");
                        handle.shutdown();
                    }
                    Err(e) => warn!(error = %e, "failed to listen for Ctrl+C"),
                }
            })
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    // Set up logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let mut server = Server::bind(config.clone())
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;

    print_banner(&config);
    watch_ctrl_c(server.shutdown_handle())?;

    server.run()?;
    info!("Server shutdown complete");
    Ok(())
}
