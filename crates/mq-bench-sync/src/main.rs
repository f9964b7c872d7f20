//! Micro-benchmark: per-operation latency & throughput of the bounded aging
//! queue under contention, with clean shutdown EXCLUDED from the
//! measurement window.
//!
//! Measurement window:
//! - Start when producers are released by a barrier.
//! - Stop once consumers have drained exactly n_items messages.
//! - Queue shutdown happens OUTSIDE the window.
//!
//! Each worker times its own enqueue/dequeue calls, so the p99 columns show
//! how long callers actually sat blocked on a full or empty queue.
//!
//! Output CSV (one header + one data row):
//! producers,consumers,capacity,aging_ms,n_items,enq_p50_ns,enq_p99_ns,deq_p50_ns,deq_p99_ns,producer_blocks,consumer_blocks,throughput_items_per_s
//!
//! Run (release build to reduce noise):
//!   cargo build --release
//!   target/release/mq-bench --producers 4 --consumers 2 --n-items 200000 --capacity 16
//!   target/release/mq-bench --producers 4 --consumers 2 --aging-ms 1 --capacity 16

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel as channel;
use mq_aging::{MAX_PRIORITY, Message};
use mq_core::clock;
use mq_sync::SyncAgingQueue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser, Debug, Clone)]
struct Args {
    /// number of producer threads
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// number of consumer threads
    #[arg(long, default_value_t = 2)]
    consumers: usize,

    /// total messages pushed through the queue
    #[arg(long, default_value_t = 200_000)]
    n_items: usize,

    /// queue capacity (the queue enforces 1..=20)
    #[arg(long, default_value_t = 16)]
    capacity: usize,

    /// aging interval in milliseconds; 0 disables aging
    #[arg(long, default_value_t = 0u64)]
    aging_ms: u64,

    /// RNG seed for the priority draws
    #[arg(long, default_value_t = 1u64)]
    seed: u64,
}

/// Per-worker measurement: call durations in ns plus the block count.
struct OpSample {
    latencies_ns: Vec<u64>,
    blocks: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let queue =
        SyncAgingQueue::new(args.capacity, args.aging_ms).context("queue construction failed")?;

    let start_barrier = Arc::new(Barrier::new(args.producers + 1));
    let consumed = Arc::new(AtomicU64::new(0));
    let (enq_tx, enq_rx) = channel::unbounded::<OpSample>();
    let (deq_tx, deq_rx) = channel::unbounded::<OpSample>();

    // Consumers: drain until shutdown, timing every dequeue.
    let mut consumer_handles = Vec::with_capacity(args.consumers);
    for _ in 0..args.consumers {
        let queue = queue.clone();
        let consumed = Arc::clone(&consumed);
        let deq_tx = deq_tx.clone();
        consumer_handles.push(thread::spawn(move || {
            let mut sample = OpSample {
                latencies_ns: Vec::new(),
                blocks: 0,
            };
            loop {
                let t0 = Instant::now();
                match queue.dequeue() {
                    Ok(receipt) => {
                        sample.latencies_ns.push(t0.elapsed().as_nanos() as u64);
                        if receipt.blocked {
                            sample.blocks += 1;
                        }
                        consumed.fetch_add(1, Ordering::Relaxed);
                    }
                    // Shutdown is the expected exit; a primitive fault also
                    // ends the run rather than skewing the numbers.
                    Err(_) => break,
                }
            }
            let _ = deq_tx.send(sample);
        }));
    }

    // Producers: a fixed share each, random priorities, timing every enqueue.
    let base = args.n_items / args.producers;
    let extra = args.n_items % args.producers;
    let mut producer_handles = Vec::with_capacity(args.producers);
    for pid in 0..args.producers {
        let queue = queue.clone();
        let barrier = Arc::clone(&start_barrier);
        let enq_tx = enq_tx.clone();
        let n = base + usize::from(pid < extra);
        let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(pid as u64));
        producer_handles.push(thread::spawn(move || {
            let mut sample = OpSample {
                latencies_ns: Vec::with_capacity(n),
                blocks: 0,
            };
            barrier.wait();
            for i in 0..n {
                let msg = Message::new(
                    i as i32,
                    rng.random_range(0..=MAX_PRIORITY),
                    pid,
                    clock::wall_ms(),
                );
                let t0 = Instant::now();
                match queue.enqueue(msg) {
                    Ok(receipt) => {
                        sample.latencies_ns.push(t0.elapsed().as_nanos() as u64);
                        if receipt.blocked {
                            sample.blocks += 1;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = enq_tx.send(sample);
        }));
    }
    drop(enq_tx);
    drop(deq_tx);

    // Measurement window: barrier release → last message drained.
    let t0 = Instant::now();
    start_barrier.wait();
    while consumed.load(Ordering::Relaxed) < args.n_items as u64 {
        thread::sleep(Duration::from_millis(1));
    }
    let elapsed = t0.elapsed();

    // Outside the window: release the parked consumers and join everyone.
    for handle in producer_handles {
        handle.join().expect("producer panicked");
    }
    queue.shutdown();
    for handle in consumer_handles {
        handle.join().expect("consumer panicked");
    }

    let (mut enq_ns, producer_blocks) = collect(enq_rx);
    let (mut deq_ns, consumer_blocks) = collect(deq_rx);
    enq_ns.sort_unstable();
    deq_ns.sort_unstable();
    let throughput = args.n_items as f64 / elapsed.as_secs_f64();

    println!(
        "producers,consumers,capacity,aging_ms,n_items,enq_p50_ns,enq_p99_ns,deq_p50_ns,deq_p99_ns,producer_blocks,consumer_blocks,throughput_items_per_s"
    );
    println!(
        "{},{},{},{},{},{},{},{},{},{},{},{}",
        args.producers,
        args.consumers,
        args.capacity,
        args.aging_ms,
        args.n_items,
        percentile(&enq_ns, 50.0) as u64,
        percentile(&enq_ns, 99.0) as u64,
        percentile(&deq_ns, 50.0) as u64,
        percentile(&deq_ns, 99.0) as u64,
        producer_blocks,
        consumer_blocks,
        throughput as u64
    );

    Ok(())
}

/// Merges the per-worker batches of one role.
fn collect(rx: channel::Receiver<OpSample>) -> (Vec<u64>, u64) {
    let mut latencies = Vec::new();
    let mut blocks = 0u64;
    while let Ok(sample) = rx.recv() {
        latencies.extend(sample.latencies_ns);
        blocks += sample.blocks;
    }
    (latencies, blocks)
}

/// Nearest-rank percentile on sorted ns.
fn percentile(sorted_ns: &[u64], p: f64) -> f64 {
    if sorted_ns.is_empty() {
        return 0.0;
    }
    let n = sorted_ns.len();
    let rank = ((p / 100.0) * (n as f64 - 1.0)).round() as usize;
    sorted_ns[rank] as f64
}
