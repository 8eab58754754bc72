//! Main entry point for the thermal daemon

use anyhow::Context;
use clap::Parser;
use hp_thermal_daemon::{args::Args, daemon::ThermalDaemon, logging};
use log::debug;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Print version and build metadata for binary identity verification
    let pkg_version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let git_desc = option_env!("GIT_DESC").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    eprintln!(
        "hp-thermal-daemon v{} (git {} / {}) built {}",
        pkg_version, git_hash, git_desc, build_time
    );

    let args = Args::parse();
    logging::setup(args.verbose).context("failed to set up logging")?;

    debug!(
        "Starting with arguments: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );

    ThermalDaemon::new(args.policy.policy())
        .run()
        .await
        .context("thermal daemon terminated")?;

    Ok(())
}
