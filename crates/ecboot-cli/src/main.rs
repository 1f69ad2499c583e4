//! quick-reboot entry point.
//!
//! Binds to a network interface, finds the requested slave and forces it
//! through PRE_OP → INIT → BOOT → INIT so it restarts its firmware.

use anyhow::{Context, Result};
use clap::Parser;
use ecboot_common::config::{RebootConfig, SyncManagerWritePolicy};
use ecboot_fieldbus::{MasterStack, RebootOrchestrator, RebootReport, SimulatedMaster};
use std::path::PathBuf;
use tracing::{info, warn};

/// quick-reboot command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "quick-reboot",
    about = "Restart an EtherCAT slave by cycling it through BOOT",
    version,
    long_about = None
)]
struct Args {
    /// Network interface the EtherCAT segment is attached to (e.g. eth0).
    #[arg(value_name = "INTERFACE")]
    interface: String,

    /// 1-based position of the slave to restart.
    #[arg(value_name = "SLAVE", value_parser = clap::value_parser!(u16).range(1..))]
    slave: u16,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run against the simulated master (no real fieldbus).
    #[arg(long, short = 's')]
    simulated: bool,

    /// Read back sync-manager registers after writing them.
    #[arg(long)]
    verify_sm: bool,

    /// Print the final report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting quick-reboot");

    let mut config = load_config(&args)?;
    if args.verify_sm {
        config.sync_manager.write_policy = SyncManagerWritePolicy::Verify;
    }

    info!(
        state_timeout = ?config.timeouts.state,
        write_policy = ?config.sync_manager.write_policy,
        "Configuration loaded"
    );

    let master = create_master(&args)?;
    let mut orchestrator = RebootOrchestrator::new(config, master);
    let report = orchestrator.reboot(&args.interface, args.slave);

    // The sequence outcome never changes the exit status
    println!("{}", render_report(&report, args.json)?);
    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("ecboot_cli={level},ecboot_fieldbus={level},ecboot_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `ECBOOT_CONFIG_PATH` environment variable
/// 3. `/etc/ecboot/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<RebootConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return RebootConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("ECBOOT_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from ECBOOT_CONFIG_PATH");
            return RebootConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from ECBOOT_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "ECBOOT_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from("/etc/ecboot/config.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return RebootConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {system_path:?}"));
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return RebootConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(RebootConfig::default())
}

/// Pick the master-stack backend.
///
/// A hardware run needs the SOEM backend; without it only `--simulated`
/// is accepted.
fn create_master(args: &Args) -> Result<Box<dyn MasterStack>> {
    if args.simulated {
        info!("Using simulated master");
        return Ok(Box::new(SimulatedMaster::with_boot_capable_slave()));
    }

    #[cfg(all(feature = "soem", target_os = "linux"))]
    {
        info!(interface = %args.interface, "Using SOEM master");
        Ok(Box::new(ecboot_fieldbus::SoemMaster::new()))
    }

    #[cfg(not(all(feature = "soem", target_os = "linux")))]
    {
        anyhow::bail!(
            "cannot open {}: built without SOEM support \
             (rebuild with --features soem or pass --simulated)",
            args.interface
        )
    }
}

/// Render the final report for stdout.
fn render_report(report: &RebootReport, json: bool) -> Result<String> {
    if json {
        serde_json::to_string_pretty(report).context("Failed to serialize report")
    } else {
        Ok(report.to_string())
    }
}
