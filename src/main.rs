//! Cache server binary
//!
//! Resolves configuration from flags or a TOML file, opens the selected
//! storage backend, wires signal handling to the shutdown flag, and runs
//! the server until it drains.

use anyhow::Context;
use cache_server::config::{Config, Driver};
use cache_server::server::CacheServer;
use cache_server::shutdown::ShutdownFlag;
use cache_server::storage;
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cache-server")]
#[command(about = "Content-addressable cache server", long_about = None)]
struct Args {
    /// TOML configuration file; the flags below are ignored when set
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage driver
    #[arg(long, value_enum, default_value = "sqlite")]
    driver: Driver,

    /// Database source specifier (file path for the kv and sqlite drivers)
    #[arg(long, default_value = "cache.db")]
    source: String,

    /// Access the relational database from multiple threads without a lock
    #[arg(long)]
    lockless: bool,

    /// Do not respond to discovery broadcasts
    #[arg(long)]
    no_broadcast: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::from_flags(args.driver, &args.source, args.lockless, !args.no_broadcast),
    };

    env_logger::Builder::from_env(
        Env::default().default_filter_or(config.server.log_level.as_str()),
    )
    .init();

    log::info!(
        "opening database: {:?} {:?} (lockless: {})",
        config.storage.driver,
        config.storage.source,
        config.storage.lockless
    );
    let database =
        storage::open_database(&config.storage).context("failed to open storage backend")?;

    let shutdown = ShutdownFlag::new();
    shutdown
        .install_signal_handler()
        .context("failed to install signal handler")?;

    let server = CacheServer::bind(&config, database, shutdown)
        .context("failed to bind listeners")?;
    server.run().context("server error")?;

    log::info!("database closed");
    Ok(())
}
