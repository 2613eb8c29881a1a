//! Userphone Engine - Maintenance Worker Entry Point
//!
//! Modes:
//! - Default: periodic cleanup loop with metrics logging
//! - --cleanup-once: one cleanup sweep, then exit

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use userphone_engine::{CallStore, EngineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let once_mode = args.iter().any(|a| a == "--cleanup-once" || a == "-1");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Userphone Engine v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: userphone-engine [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --cleanup-once, -1  Run one cleanup sweep and exit");
        println!("  --help, -h          Show this help");
        println!();
        println!("Default: Run the periodic maintenance loop");
        println!();
        println!("Environment variables:");
        println!("  USERPHONE_DB_PATH               SQLite database path");
        println!("  REDIS_URL                       Distributed state mirror");
        println!("  USERPHONE_CLEANUP_MAX_AGE_SECS  Ended-call retention (default 172800)");
        println!("  USERPHONE_CLEANUP_INTERVAL_SECS Sweep interval (default 3600)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Userphone Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::from_env()?;
    let store = CallStore::open(&config.db_path)?;

    if once_mode {
        let removed = store.cleanup_ended_before(config.cleanup_max_age)?;
        info!("Cleanup sweep removed {} ended calls", removed);
        return Ok(());
    }

    info!(
        "Maintenance loop: sweeping every {}s, max age {}s",
        config.cleanup_interval.as_secs(),
        config.cleanup_max_age.as_secs()
    );

    let mut interval = tokio::time::interval(config.cleanup_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.cleanup_ended_before(config.cleanup_max_age) {
                    Ok(removed) => info!("Cleanup sweep removed {} ended calls", removed),
                    Err(e) => tracing::warn!("Cleanup sweep failed: {:#}", e),
                }
                if let Ok((active, ended)) = store.status_counts() {
                    info!("Store: {} active calls, {} ended retained", active, ended);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
