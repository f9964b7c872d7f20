use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mq_aging::{MAX_CAPACITY, MIN_CAPACITY};
use mq_core::clock::RunClock;
use mq_sync::SyncAgingQueue;
use tracing::debug;

use crate::worker::interruptible_sleep;

/// Occupancy samples kept per run; later samples are dropped silently.
pub const DEFAULT_MAX_SAMPLES: usize = 600;

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub t_secs: f64,
    pub occupancy: usize,
    pub capacity: usize,
}

#[derive(Default)]
struct Totals {
    produced: u64,
    consumed: u64,
    producer_blocks: u64,
    consumer_blocks: u64,
    latency_sum_ms: u64,
    latency_count: u64,
}

struct AnalyticsState {
    samples: Vec<Sample>,
    totals: Totals,
    min_occupancy: Option<usize>,
    peak_occupancy: usize,
    end_secs: Option<f64>,
}

/// Shared analytics aggregate. Workers call the `record_*` operations; the
/// sampler appends occupancy snapshots; the supervisor finalises and reads
/// the summary after every worker has been joined.
///
/// All state sits behind one mutex that is only ever held for a counter
/// update, never across a sleep or a queue operation.
pub struct Analytics {
    state: Mutex<AnalyticsState>,
    max_samples: usize,
    clock: RunClock,
}

impl Analytics {
    pub fn new(max_samples: usize) -> Self {
        Self {
            state: Mutex::new(AnalyticsState {
                samples: Vec::new(),
                totals: Totals::default(),
                min_occupancy: None,
                peak_occupancy: 0,
                end_secs: None,
            }),
            max_samples,
            clock: RunClock::new(),
        }
    }

    // This is observation data: when a peer thread panicked with the lock
    // held, the partial state is still worth reporting.
    fn with_state<R>(&self, f: impl FnOnce(&mut AnalyticsState) -> R) -> R {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut st)
    }

    pub fn record_produce(&self) {
        self.with_state(|st| st.totals.produced += 1);
    }

    pub fn record_consume(&self) {
        self.with_state(|st| st.totals.consumed += 1);
    }

    pub fn record_producer_block(&self) {
        self.with_state(|st| st.totals.producer_blocks += 1);
    }

    pub fn record_consumer_block(&self) {
        self.with_state(|st| st.totals.consumer_blocks += 1);
    }

    pub fn record_latency_ms(&self, latency_ms: u64) {
        self.with_state(|st| {
            st.totals.latency_sum_ms += latency_ms;
            st.totals.latency_count += 1;
        });
    }

    pub fn record_sample(&self, occupancy: usize, capacity: usize) {
        let t_secs = self.clock.elapsed_secs();
        self.with_state(|st| {
            st.min_occupancy = Some(st.min_occupancy.map_or(occupancy, |m| m.min(occupancy)));
            st.peak_occupancy = st.peak_occupancy.max(occupancy);
            if st.samples.len() < self.max_samples {
                st.samples.push(Sample {
                    t_secs,
                    occupancy,
                    capacity,
                });
            }
        });
    }

    /// Freezes the run end time. Later record calls still count but no
    /// longer move the runtime used for rate computations.
    pub fn finalise(&self) {
        let t_secs = self.clock.elapsed_secs();
        self.with_state(|st| {
            if st.end_secs.is_none() {
                st.end_secs = Some(t_secs);
            }
        });
    }

    /// Derived aggregates; every division is guarded against zero samples,
    /// zero runtime and zero capacity.
    pub fn summary(&self, capacity: usize) -> AnalyticsSummary {
        self.with_state(|st| {
            let runtime_secs = st.end_secs.unwrap_or_else(|| self.clock.elapsed_secs());
            let sample_count = st.samples.len();
            let mut full = 0usize;
            let mut empty = 0usize;
            let mut occ_sum = 0usize;
            for sample in &st.samples {
                if sample.capacity > 0 && sample.occupancy >= sample.capacity {
                    full += 1;
                }
                if sample.occupancy == 0 {
                    empty += 1;
                }
                occ_sum += sample.occupancy;
            }
            let frac = |n: usize| {
                if sample_count == 0 {
                    0.0
                } else {
                    n as f64 / sample_count as f64
                }
            };
            let avg_occupancy = frac(occ_sum);
            let avg_utilisation_pct = if capacity == 0 {
                0.0
            } else {
                100.0 * avg_occupancy / capacity as f64
            };
            let avg_latency_ms = if st.totals.latency_count == 0 {
                0.0
            } else {
                st.totals.latency_sum_ms as f64 / st.totals.latency_count as f64
            };
            let rate = |count: u64| {
                if runtime_secs > 0.0 {
                    count as f64 / runtime_secs
                } else {
                    0.0
                }
            };
            AnalyticsSummary {
                runtime_secs,
                produced: st.totals.produced,
                consumed: st.totals.consumed,
                producer_blocks: st.totals.producer_blocks,
                consumer_blocks: st.totals.consumer_blocks,
                sample_count,
                min_occupancy: st.min_occupancy.unwrap_or(0),
                peak_occupancy: st.peak_occupancy,
                avg_occupancy,
                avg_utilisation_pct,
                pct_samples_full: 100.0 * frac(full),
                pct_samples_empty: 100.0 * frac(empty),
                avg_latency_ms,
                produce_rate: rate(st.totals.produced),
                consume_rate: rate(st.totals.consumed),
                recommendation: recommend(
                    capacity,
                    st.totals.producer_blocks,
                    st.totals.consumer_blocks,
                    frac(full),
                    frac(empty),
                    avg_utilisation_pct,
                ),
            }
        })
    }

    /// One header row, then one row per sample in time order.
    pub fn export_csv(&self, path: &Path) -> io::Result<()> {
        self.with_state(|st| {
            let mut out = BufWriter::new(File::create(path)?);
            writeln!(out, "time,occupancy,capacity,utilisation_percent")?;
            for sample in &st.samples {
                let utilisation = if sample.capacity == 0 {
                    0.0
                } else {
                    100.0 * sample.occupancy as f64 / sample.capacity as f64
                };
                writeln!(
                    out,
                    "{:.3},{},{},{:.1}",
                    sample.t_secs, sample.occupancy, sample.capacity, utilisation
                )?;
            }
            out.flush()
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnalyticsSummary {
    pub runtime_secs: f64,
    pub produced: u64,
    pub consumed: u64,
    pub producer_blocks: u64,
    pub consumer_blocks: u64,
    pub sample_count: usize,
    pub min_occupancy: usize,
    pub peak_occupancy: usize,
    pub avg_occupancy: f64,
    pub avg_utilisation_pct: f64,
    pub pct_samples_full: f64,
    pub pct_samples_empty: f64,
    pub avg_latency_ms: f64,
    pub produce_rate: f64,
    pub consume_rate: f64,
    pub recommendation: Recommendation,
}

/// Capacity advice derived from the run, surfaced in the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    IncreaseCapacity { to: usize },
    AddProducers,
    DecreaseCapacity { to: usize },
    Maintain,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::IncreaseCapacity { to } => {
                write!(f, "increase capacity to {} (queue often full, producers blocked)", to)
            }
            Recommendation::AddProducers => {
                write!(f, "add producers (queue often empty, consumers blocked)")
            }
            Recommendation::DecreaseCapacity { to } => {
                write!(f, "decrease capacity to {} (low utilisation)", to)
            }
            Recommendation::Maintain => write!(f, "maintain current configuration"),
        }
    }
}

fn recommend(
    capacity: usize,
    producer_blocks: u64,
    consumer_blocks: u64,
    frac_full: f64,
    frac_empty: f64,
    utilisation_pct: f64,
) -> Recommendation {
    if frac_full > 0.10 && producer_blocks > 0 {
        Recommendation::IncreaseCapacity {
            to: (capacity * 2).min(MAX_CAPACITY),
        }
    } else if frac_empty > 0.30 && consumer_blocks > 0 {
        Recommendation::AddProducers
    } else if utilisation_pct < 30.0 {
        Recommendation::DecreaseCapacity {
            to: ((capacity as f64 * 0.7).round() as usize).max(MIN_CAPACITY),
        }
    } else {
        Recommendation::Maintain
    }
}

/// Background sampling task: one occupancy snapshot per interval, first one
/// immediately so even a one-second run yields a sample. The occupancy read
/// is the queue's atomic mirror; the queue mutex is never touched here and a
/// stale value is acceptable, this observes rather than decides.
pub fn sampler_loop(
    queue: SyncAgingQueue,
    analytics: Arc<Analytics>,
    running: Arc<AtomicBool>,
    interval: Duration,
    dashboard: bool,
) {
    debug!("sampler started");
    while running.load(Ordering::Relaxed) {
        let occupancy = queue.occupancy();
        let capacity = queue.capacity();
        analytics.record_sample(occupancy, capacity);
        if dashboard {
            print_gauge(occupancy, capacity);
        }
        interruptible_sleep(&running, interval);
    }
    debug!("sampler stopped");
}

fn print_gauge(occupancy: usize, capacity: usize) {
    let filled = occupancy.min(capacity);
    println!(
        "queue [{}{}] {}/{}",
        "#".repeat(filled),
        ".".repeat(capacity - filled),
        occupancy,
        capacity
    );
}
