use std::env;

use mq_core::clock;

use crate::config::Config;
use crate::supervisor::{RunOutcome, StopCause};

/// Prints the end-of-run report: system info, parameter echo, per-worker
/// counters, totals with the balance check, the analytics summary and the
/// capacity recommendation.
pub fn print_report(config: &Config, outcome: &RunOutcome) {
    let summary = &outcome.summary;

    println!();
    println!("================ simulation report ================");
    println!(
        "host {}  user {}  unix-time {}",
        hostname(),
        username(),
        clock::wall_secs()
    );
    println!(
        "parameters: producers={} consumers={} capacity={} timeout={}s aging={}ms seed={}",
        config.producers,
        config.consumers,
        config.capacity,
        config.timeout_secs,
        config.aging_ms,
        config
            .seed
            .map_or_else(|| String::from("none"), |s| s.to_string()),
    );
    println!(
        "stopped by: {}",
        match outcome.stop_cause {
            StopCause::Timeout => "timeout",
            StopCause::Signal => "signal",
        }
    );
    println!();
    for stats in &outcome.producer_stats {
        println!(
            "  producer {:>2}  produced {:>6}  blocked {:>5}",
            stats.id, stats.processed, stats.blocked
        );
    }
    for stats in &outcome.consumer_stats {
        println!(
            "  consumer {:>2}  consumed {:>6}  blocked {:>5}",
            stats.id, stats.processed, stats.blocked
        );
    }
    println!();
    println!("{}", format_balance(outcome));
    println!();
    println!(
        "runtime {:.2}s  samples {} (occupancy min {} peak {} avg {:.2})",
        summary.runtime_secs,
        summary.sample_count,
        summary.min_occupancy,
        summary.peak_occupancy,
        summary.avg_occupancy
    );
    println!(
        "utilisation {:.1}%  full {:.1}%  empty {:.1}% of samples",
        summary.avg_utilisation_pct, summary.pct_samples_full, summary.pct_samples_empty
    );
    println!(
        "rates: produce {:.1}/s  consume {:.1}/s  avg latency {:.1}ms",
        summary.produce_rate, summary.consume_rate, summary.avg_latency_ms
    );
    println!(
        "blocks: producers {}  consumers {}",
        summary.producer_blocks, summary.consumer_blocks
    );
    println!("recommendation: {}", summary.recommendation);
    println!("samples written to {}", outcome.csv_path.display());
    println!("===================================================");
}

pub fn format_balance(outcome: &RunOutcome) -> String {
    let verdict = if outcome.balanced() { "OK" } else { "MISMATCH" };
    format!(
        "balance: produced {} = consumed {} + residual {}  [{}]",
        outcome.produced, outcome.consumed, outcome.residual, verdict
    )
}

fn hostname() -> String {
    env::var("HOSTNAME")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| String::from("localhost"))
}

fn username() -> String {
    env::var("USER")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| String::from("unknown"))
}
