use anyhow::Result;
use clap::Parser;
use tracing::Level;

use mq_sim::config::Config;
use mq_sim::{report, supervisor};

fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.debug, config.dashboard);
    let outcome = supervisor::run(&config)?;
    report::print_report(&config, &outcome);
    Ok(())
}

fn init_tracing(verbosity: u8, dashboard: bool) {
    // The dashboard gauge replaces the per-event execution log.
    let level = match verbosity {
        _ if dashboard => Level::WARN,
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}
