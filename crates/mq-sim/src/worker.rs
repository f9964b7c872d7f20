use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Duration;

use mq_aging::{MAX_PRIORITY, Message};
use mq_core::{QueueError, clock};
use mq_sync::SyncAgingQueue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::analytics::Analytics;

/// Poll granularity of worker sleeps; the running flag is observed at least
/// this often.
pub const SLEEP_CHUNK: Duration = Duration::from_millis(200);

/// Counters a worker accumulates privately and hands back on join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub id: usize,
    pub processed: u64,
    pub blocked: u64,
}

impl WorkerStats {
    fn new(id: usize) -> Self {
        Self {
            id,
            processed: 0,
            blocked: 0,
        }
    }
}

/// Per-worker RNG stream: deterministic under a fixed seed, distinct per
/// worker tag. Without a seed the wall clock provides the base.
pub fn worker_rng(seed: Option<u64>, tag: u64) -> StdRng {
    let base = seed.unwrap_or_else(clock::wall_ms);
    StdRng::seed_from_u64(base ^ tag.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

pub fn producer_tag(id: usize) -> u64 {
    id as u64
}

pub fn consumer_tag(id: usize) -> u64 {
    (1 << 32) | id as u64
}

/// Sleeps up to `total` in [`SLEEP_CHUNK`] steps, returning early once
/// `running` clears.
pub fn interruptible_sleep(running: &AtomicBool, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Relaxed) {
        let chunk = remaining.min(SLEEP_CHUNK);
        sleep(chunk);
        remaining = remaining.saturating_sub(chunk);
    }
}

fn random_pause(rng: &mut StdRng, max_wait: Duration) -> Duration {
    let max_ms = max_wait.as_millis() as u64;
    Duration::from_millis(rng.random_range(0..=max_ms))
}

pub fn producer_loop(
    id: usize,
    queue: SyncAgingQueue,
    analytics: Arc<Analytics>,
    running: Arc<AtomicBool>,
    mut rng: StdRng,
    max_wait: Duration,
) -> WorkerStats {
    let mut stats = WorkerStats::new(id);
    info!("producer {id} started");
    while running.load(Ordering::Relaxed) {
        let payload: i32 = rng.random_range(0..=9);
        let priority: u8 = rng.random_range(0..=MAX_PRIORITY);
        let msg = Message::new(payload, priority, id, clock::wall_ms());
        match queue.enqueue(msg) {
            Ok(receipt) => {
                if receipt.blocked {
                    stats.blocked += 1;
                    analytics.record_producer_block();
                }
                stats.processed += 1;
                analytics.record_produce();
                debug!("producer {id} enqueued payload {payload} priority {priority}");
            }
            Err(QueueError::Shutdown) => break,
            Err(err) => {
                warn!("producer {id} stopping on fault: {err}");
                break;
            }
        }
        interruptible_sleep(&running, random_pause(&mut rng, max_wait));
    }
    info!("producer {id} stopped after {} messages", stats.processed);
    stats
}

pub fn consumer_loop(
    id: usize,
    queue: SyncAgingQueue,
    analytics: Arc<Analytics>,
    running: Arc<AtomicBool>,
    mut rng: StdRng,
    max_wait: Duration,
) -> WorkerStats {
    let mut stats = WorkerStats::new(id);
    info!("consumer {id} started");
    while running.load(Ordering::Relaxed) {
        match queue.dequeue() {
            Ok(receipt) => {
                if receipt.blocked {
                    stats.blocked += 1;
                    analytics.record_consumer_block();
                }
                let latency_ms = receipt.msg.age_ms(clock::wall_ms());
                stats.processed += 1;
                analytics.record_consume();
                analytics.record_latency_ms(latency_ms);
                debug!(
                    "consumer {id} dequeued payload {} priority {} latency {latency_ms}ms",
                    receipt.msg.payload, receipt.msg.priority
                );
            }
            Err(QueueError::Shutdown) => break,
            Err(err) => {
                warn!("consumer {id} stopping on fault: {err}");
                break;
            }
        }
        interruptible_sleep(&running, random_pause(&mut rng, max_wait));
    }
    info!("consumer {id} stopped after {} messages", stats.processed);
    stats
}
