use std::path::PathBuf;

use clap::Parser;

/// Bounded, priority-aware producer/consumer simulation.
///
/// Producers push randomly prioritised messages into a bounded queue while
/// consumers drain the currently most-important one. The run ends at the
/// timeout or on an interrupt/termination signal; either way every worker is
/// joined, a report is printed and an occupancy CSV is written.
#[derive(Parser, Debug, Clone)]
#[command(name = "mq-sim", version)]
pub struct Config {
    /// Number of producer threads
    #[arg(value_parser = clap::value_parser!(u64).range(1..=10))]
    pub producers: u64,

    /// Number of consumer threads
    #[arg(value_parser = clap::value_parser!(u64).range(1..=3))]
    pub consumers: u64,

    /// Queue capacity in messages
    #[arg(value_parser = clap::value_parser!(u64).range(1..=20))]
    pub capacity: u64,

    /// Run duration in seconds
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: u64,

    /// Debug verbosity: 0 warnings only, 1 info, 2 debug, 3 trace
    #[arg(short = 'd', long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub debug: u8,

    /// Print a periodic occupancy gauge instead of relying on the event log
    #[arg(long)]
    pub dashboard: bool,

    /// RNG seed for deterministic runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Aging interval in milliseconds; 0 disables aging
    #[arg(long, default_value_t = 0)]
    pub aging_ms: u64,

    /// Producer maximum sleep between messages, in seconds
    #[arg(long, default_value_t = 1.0)]
    pub producer_max_wait: f64,

    /// Consumer maximum sleep between messages, in seconds
    #[arg(long, default_value_t = 1.0)]
    pub consumer_max_wait: f64,

    /// Analytics sampling interval, in seconds
    #[arg(long, default_value_t = 1.0)]
    pub sample_interval: f64,

    /// Directory the occupancy CSV is written to
    #[arg(long, default_value = ".")]
    pub csv_dir: PathBuf,
}

impl Config {
    /// CSV file name is a pure function of the run shape, so repeated runs
    /// with the same parameters overwrite their previous artifact.
    pub fn csv_path(&self) -> PathBuf {
        self.csv_dir.join(format!(
            "queue_stats_{}p_{}c_{}cap.csv",
            self.producers, self.consumers, self.capacity
        ))
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Config::command().debug_assert();
    }

    #[test]
    fn parses_positionals_and_options() {
        let config = Config::try_parse_from([
            "mq-sim", "2", "1", "5", "3", "--seed", "42", "--aging-ms", "250",
        ])
        .unwrap();
        assert_eq!(config.producers, 2);
        assert_eq!(config.consumers, 1);
        assert_eq!(config.capacity, 5);
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.aging_ms, 250);
        assert!(!config.dashboard);
    }

    #[test]
    fn rejects_out_of_range_arguments() {
        assert!(Config::try_parse_from(["mq-sim", "11", "1", "5", "3"]).is_err());
        assert!(Config::try_parse_from(["mq-sim", "2", "4", "5", "3"]).is_err());
        assert!(Config::try_parse_from(["mq-sim", "2", "1", "21", "3"]).is_err());
        assert!(Config::try_parse_from(["mq-sim", "2", "1", "5", "0"]).is_err());
    }

    #[test]
    fn csv_name_derives_from_run_shape() {
        let config = Config::try_parse_from(["mq-sim", "2", "1", "5", "3"]).unwrap();
        assert!(
            config
                .csv_path()
                .ends_with("queue_stats_2p_1c_5cap.csv")
        );
    }
}
