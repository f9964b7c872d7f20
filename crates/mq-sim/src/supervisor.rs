use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use mq_sync::SyncAgingQueue;
use tracing::{info, warn};

use crate::analytics::{Analytics, AnalyticsSummary, DEFAULT_MAX_SAMPLES, sampler_loop};
use crate::config::Config;
use crate::worker::{WorkerStats, consumer_loop, consumer_tag, producer_loop, producer_tag, worker_rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    Timeout,
    Signal,
}

/// Everything a finished run hands back: per-worker counters, totals, the
/// queue residual, the analytics summary and where the CSV went.
#[derive(Debug)]
pub struct RunOutcome {
    pub stop_cause: StopCause,
    pub producer_stats: Vec<WorkerStats>,
    pub consumer_stats: Vec<WorkerStats>,
    pub produced: u64,
    pub consumed: u64,
    pub residual: usize,
    pub summary: AnalyticsSummary,
    pub csv_path: PathBuf,
}

impl RunOutcome {
    /// The top-level conservation invariant: every produced message was
    /// either consumed or is still resident in the queue.
    pub fn balanced(&self) -> bool {
        self.produced == self.consumed + self.residual as u64
    }
}

/// Runs one complete simulation: construct queue and analytics, spawn the
/// sampler and the workers, wait for the deadline or a signal, shut down
/// exactly once, join everything, export the CSV and return the outcome.
pub fn run(config: &Config) -> Result<RunOutcome> {
    let queue = SyncAgingQueue::new(config.capacity as usize, config.aging_ms)
        .context("queue construction failed")?;
    let analytics = Arc::new(Analytics::new(DEFAULT_MAX_SAMPLES));
    let running = Arc::new(AtomicBool::new(true));
    let shutdown_guard = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = bounded::<StopCause>(1);

    install_signal_handler(&queue, &running, &shutdown_guard, &stop_tx);

    let sampler = {
        let queue = queue.clone();
        let analytics = Arc::clone(&analytics);
        let running = Arc::clone(&running);
        let interval = Duration::from_secs_f64(config.sample_interval.max(0.05));
        let dashboard = config.dashboard;
        thread::Builder::new()
            .name("sampler".into())
            .spawn(move || sampler_loop(queue, analytics, running, interval, dashboard))
            .context("failed to spawn sampler thread")?
    };

    // Join discipline: only successfully spawned workers get joined; the
    // first spawn failure stops creation and shuts the run down.
    let producer_wait = Duration::from_secs_f64(config.producer_max_wait.max(0.0));
    let consumer_wait = Duration::from_secs_f64(config.consumer_max_wait.max(0.0));
    let mut producers: Vec<JoinHandle<WorkerStats>> = Vec::new();
    let mut consumers: Vec<JoinHandle<WorkerStats>> = Vec::new();
    let mut spawn_failure = None;

    for id in 1..=config.producers as usize {
        let queue = queue.clone();
        let analytics = Arc::clone(&analytics);
        let running = Arc::clone(&running);
        let rng = worker_rng(config.seed, producer_tag(id));
        match thread::Builder::new()
            .name(format!("producer-{id}"))
            .spawn(move || producer_loop(id, queue, analytics, running, rng, producer_wait))
        {
            Ok(handle) => producers.push(handle),
            Err(err) => {
                spawn_failure = Some(err);
                break;
            }
        }
    }
    if spawn_failure.is_none() {
        for id in 1..=config.consumers as usize {
            let queue = queue.clone();
            let analytics = Arc::clone(&analytics);
            let running = Arc::clone(&running);
            let rng = worker_rng(config.seed, consumer_tag(id));
            match thread::Builder::new()
                .name(format!("consumer-{id}"))
                .spawn(move || consumer_loop(id, queue, analytics, running, rng, consumer_wait))
            {
                Ok(handle) => consumers.push(handle),
                Err(err) => {
                    spawn_failure = Some(err);
                    break;
                }
            }
        }
    }

    let stop_cause = if spawn_failure.is_none() {
        info!(
            "{} producers and {} consumers running, deadline in {}s",
            producers.len(),
            consumers.len(),
            config.timeout_secs
        );
        match stop_rx.recv_timeout(Duration::from_secs(config.timeout_secs)) {
            Ok(cause) => cause,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                StopCause::Timeout
            }
        }
    } else {
        StopCause::Timeout
    };

    initiate_shutdown(&queue, &running, &shutdown_guard);

    let producer_stats = join_workers(producers);
    let consumer_stats = join_workers(consumers);
    if sampler.join().is_err() {
        warn!("sampler thread panicked");
    }
    analytics.finalise();

    if let Some(err) = spawn_failure {
        bail!("failed to spawn worker thread: {err}");
    }

    let produced: u64 = producer_stats.iter().map(|s| s.processed).sum();
    let consumed: u64 = consumer_stats.iter().map(|s| s.processed).sum();
    let residual = queue.occupancy();
    let summary = analytics.summary(config.capacity as usize);
    let csv_path = config.csv_path();
    analytics
        .export_csv(&csv_path)
        .with_context(|| format!("failed to write {}", csv_path.display()))?;
    info!("run complete: produced {produced}, consumed {consumed}, residual {residual}");

    Ok(RunOutcome {
        stop_cause,
        producer_stats,
        consumer_stats,
        produced,
        consumed,
        residual,
        summary,
        csv_path,
    })
}

/// Converges the timeout and signal paths onto one idempotent sequence:
/// clear the running flag, then wake every parked worker via the queue.
fn initiate_shutdown(queue: &SyncAgingQueue, running: &AtomicBool, guard: &AtomicBool) {
    if guard.swap(true, Ordering::SeqCst) {
        return;
    }
    running.store(false, Ordering::SeqCst);
    queue.shutdown();
}

/// The handler thread performs only flag stores, the semaphore-posting queue
/// shutdown, one constant line and a non-blocking channel send; everything
/// that allocates or joins stays on the supervisor thread.
fn install_signal_handler(
    queue: &SyncAgingQueue,
    running: &Arc<AtomicBool>,
    guard: &Arc<AtomicBool>,
    stop_tx: &Sender<StopCause>,
) {
    let queue = queue.clone();
    let running = Arc::clone(running);
    let guard = Arc::clone(guard);
    let stop_tx = stop_tx.clone();
    let installed = ctrlc::set_handler(move || {
        if guard.swap(true, Ordering::SeqCst) {
            return;
        }
        running.store(false, Ordering::SeqCst);
        queue.shutdown();
        println!("signal received, shutting down");
        let _ = stop_tx.try_send(StopCause::Signal);
    });
    if let Err(err) = installed {
        // The process-wide handler slot can already be taken when run() is
        // re-entered in one process (tests, embedding); such runs stop via
        // the timeout path instead.
        warn!("signal handler not installed: {err}");
    }
}

fn join_workers(handles: Vec<JoinHandle<WorkerStats>>) -> Vec<WorkerStats> {
    handles
        .into_iter()
        .filter_map(|handle| match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("worker thread panicked");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;

    fn test_config(producers: u64, consumers: u64, capacity: u64, seed: u64) -> Config {
        Config {
            producers,
            consumers,
            capacity,
            timeout_secs: 1,
            debug: 0,
            dashboard: false,
            seed: Some(seed),
            aging_ms: 0,
            producer_max_wait: 0.05,
            consumer_max_wait: 0.05,
            sample_interval: 0.2,
            csv_dir: env::temp_dir(),
        }
    }

    #[test]
    fn conservation_holds_for_minimal_run() {
        let config = test_config(1, 1, 1, 42);
        let outcome = run(&config).unwrap();
        assert!(outcome.balanced());
        assert_eq!(outcome.stop_cause, StopCause::Timeout);
        assert_eq!(outcome.produced, outcome.summary.produced);
        assert_eq!(outcome.consumed, outcome.summary.consumed);
        assert!(outcome.summary.sample_count >= 1);
        assert!(outcome.csv_path.exists());
        std::fs::remove_file(&outcome.csv_path).ok();
    }

    #[test]
    fn producers_block_under_tight_capacity() {
        let mut config = test_config(5, 1, 2, 42);
        config.producer_max_wait = 0.0;
        config.consumer_max_wait = 0.05;
        let outcome = run(&config).unwrap();
        assert!(outcome.balanced());
        assert!(outcome.summary.producer_blocks > 0);
        std::fs::remove_file(&outcome.csv_path).ok();
    }

    #[test]
    fn consumers_block_when_production_is_slow() {
        let mut config = test_config(1, 3, 10, 42);
        config.producer_max_wait = 0.2;
        config.consumer_max_wait = 0.0;
        let outcome = run(&config).unwrap();
        assert!(outcome.balanced());
        assert!(outcome.summary.consumer_blocks > 0);
        assert_eq!(
            outcome.producer_stats.len() + outcome.consumer_stats.len(),
            4
        );
        std::fs::remove_file(&outcome.csv_path).ok();
    }
}
