use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mq_aging::{AgingQueue, Message};
use mq_core::{QueueError, Result, clock};

mod semaphore;
pub use semaphore::Semaphore;

/// Outcome of a successful enqueue.
///
/// `blocked` is true iff the caller had to wait for a free slot; it is
/// derived solely from the first, non-blocking semaphore acquire, never from
/// inspecting the buffer (an occupancy pre-check races with other callers
/// and over-counts).
#[derive(Debug, Clone, Copy)]
pub struct EnqueueReceipt {
    pub blocked: bool,
}

/// Outcome of a successful dequeue.
#[derive(Debug)]
pub struct DequeueReceipt {
    pub msg: Message,
    /// True iff the caller had to wait for a message.
    pub blocked: bool,
    /// Time spent inside `dequeue` before the message was obtained; zero
    /// when the call did not block.
    pub waited: Duration,
}

struct Inner {
    state: Mutex<AgingQueue>,
    slots: Semaphore,
    items: Semaphore,
    shutdown: AtomicBool,
    // Mirror of the buffer length, written inside the critical section, so
    // observers (the analytics sampler) never touch the mutex.
    occupancy: AtomicUsize,
    capacity: usize,
}

/// Bounded, priority-aware, aging-enabled blocking queue.
///
/// Safe to call from any number of threads; clone the handle freely, all
/// clones share one queue. Internally a mutex-guarded [`AgingQueue`] sits
/// between two counting semaphores: `slots` (free capacity, initially the
/// full capacity) and `items` (resident messages, initially zero). Each
/// operation takes a token from its semaphore, mutates the buffer under the
/// mutex, then posts one token to the sibling semaphore. Semaphores are
/// never acquired while the mutex is held and the mutex is never held
/// across a wait.
#[derive(Clone)]
pub struct SyncAgingQueue {
    inner: Arc<Inner>,
}

impl SyncAgingQueue {
    /// Creates a queue with the given capacity and aging interval.
    ///
    /// # Arguments
    ///
    /// * `capacity` — maximum resident messages, in [1, 20].
    /// * `aging_interval_ms` — wall-clock milliseconds after which a
    ///   resident message's effective priority rises by one level; 0
    ///   disables aging.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::BadCapacity`] when `capacity` is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use mq_aging::Message;
    /// use mq_sync::SyncAgingQueue;
    ///
    /// let queue = SyncAgingQueue::new(4, 0).unwrap();
    /// queue.enqueue(Message::new(7, 3, 1, 0)).unwrap();
    /// let receipt = queue.dequeue().unwrap();
    /// assert_eq!(receipt.msg.payload, 7);
    /// ```
    pub fn new(capacity: usize, aging_interval_ms: u64) -> Result<Self> {
        let buf = AgingQueue::new(capacity, aging_interval_ms)?;
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(buf),
                slots: Semaphore::new(capacity),
                items: Semaphore::new(0),
                shutdown: AtomicBool::new(false),
                occupancy: AtomicUsize::new(0),
                capacity,
            }),
        })
    }

    /// Inserts a message, waiting for a free slot if necessary.
    ///
    /// # Behavior
    ///
    /// - A free slot is taken immediately when available; otherwise the
    ///   caller parks until a consumer frees one or shutdown is requested.
    /// - The receipt's `blocked` flag records whether the caller had to
    ///   wait (the non-blocking acquire failed on first try).
    /// - After acquiring a slot token the shutdown flag is re-checked; if it
    ///   is set the token goes back to `slots` and the message is not
    ///   stored.
    ///
    /// # Errors
    ///
    /// * [`QueueError::Shutdown`] — shutdown was requested; the message was
    ///   not stored.
    /// * [`QueueError::LockError`] — a synchronisation primitive failed;
    ///   any token taken has been returned.
    pub fn enqueue(&self, msg: Message) -> Result<EnqueueReceipt> {
        let blocked = !self.inner.slots.try_acquire()?;
        if blocked {
            self.inner.slots.acquire()?;
        }
        if self.inner.shutdown.load(Ordering::Acquire) {
            self.inner.slots.post();
            return Err(QueueError::Shutdown);
        }
        {
            let mut buf = match self.inner.state.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    self.inner.slots.post();
                    return Err(QueueError::LockError);
                }
            };
            if buf.push(msg).is_some() {
                drop(buf);
                self.inner.slots.post();
                return Err(QueueError::Internal("slot token without a free slot"));
            }
            self.inner.occupancy.store(buf.len(), Ordering::Release);
        }
        // Infallible: the stored message must become visible to a consumer.
        self.inner.items.post();
        Ok(EnqueueReceipt { blocked })
    }

    /// Removes and returns the most important resident message, waiting for
    /// one if necessary.
    ///
    /// # Behavior
    ///
    /// - The message with the highest effective priority (base priority
    ///   plus age-driven boost, ties to the oldest timestamp) is selected
    ///   inside the critical section, so concurrent enqueues cannot change
    ///   the candidate set mid-scan.
    /// - The receipt reports whether the caller blocked and for how long
    ///   (`waited` is zero when it did not block).
    ///
    /// # Errors
    ///
    /// * [`QueueError::Shutdown`] — shutdown was requested before a message
    ///   could be handed over.
    /// * [`QueueError::LockError`] — a synchronisation primitive failed;
    ///   any token taken has been returned.
    pub fn dequeue(&self) -> Result<DequeueReceipt> {
        let entered = Instant::now();
        let blocked = !self.inner.items.try_acquire()?;
        if blocked {
            self.inner.items.acquire()?;
        }
        if self.inner.shutdown.load(Ordering::Acquire) {
            self.inner.items.post();
            return Err(QueueError::Shutdown);
        }
        let msg = {
            let mut buf = match self.inner.state.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    self.inner.items.post();
                    return Err(QueueError::LockError);
                }
            };
            let msg = buf.take_highest(clock::wall_ms());
            self.inner.occupancy.store(buf.len(), Ordering::Release);
            msg
        };
        let Some(msg) = msg else {
            return Err(QueueError::Internal("item token without a message"));
        };
        // Infallible: the freed slot must become visible to a producer.
        self.inner.slots.post();
        let waited = if blocked { entered.elapsed() } else { Duration::ZERO };
        Ok(DequeueReceipt {
            msg,
            blocked,
            waited,
        })
    }

    /// Requests shutdown. Idempotent and infallible.
    ///
    /// Sets the shutdown flag, then closes both semaphores so that every
    /// parked caller wakes in bounded time; callers that wake after shutdown
    /// observe the flag and return [`QueueError::Shutdown`] without touching
    /// the buffer. Both closes always run (closing recovers from a poisoned
    /// lock), so no waiter can stay parked on either semaphore. Messages
    /// still resident stay resident (the residual of the balance check)
    /// until the queue is dropped.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.slots.close();
        self.inner.items.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Resident message count, readable without the queue mutex. May be
    /// momentarily stale; meant for observation, not decisions.
    pub fn occupancy(&self) -> usize {
        self.inner.occupancy.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::thread::{sleep, spawn};
    use std::time::Duration;

    use super::*;

    fn msg(priority: u8, producer: usize) -> Message {
        Message::new(0, priority, producer, clock::wall_ms())
    }

    #[test]
    fn fast_paths_do_not_block() {
        let queue = SyncAgingQueue::new(5, 0).unwrap();
        for p in 0..3 {
            let receipt = queue.enqueue(msg(p, 1)).unwrap();
            assert!(!receipt.blocked);
        }
        assert_eq!(queue.occupancy(), 3);
        for _ in 0..3 {
            let receipt = queue.dequeue().unwrap();
            assert!(!receipt.blocked);
            assert_eq!(receipt.waited, Duration::ZERO);
        }
        assert_eq!(queue.occupancy(), 0);
    }

    #[test]
    fn dequeue_follows_effective_priority() {
        let queue = SyncAgingQueue::new(5, 0).unwrap();
        for p in [2u8, 7, 1, 9, 5] {
            queue.enqueue(msg(p, 1)).unwrap();
        }
        let order: Vec<u8> = (0..5)
            .map(|_| queue.dequeue().unwrap().msg.priority)
            .collect();
        assert_eq!(order, vec![9, 7, 5, 2, 1]);
    }

    #[test]
    fn producer_block_signal_is_accurate() {
        let queue = SyncAgingQueue::new(1, 0).unwrap();
        assert!(!queue.enqueue(msg(1, 1)).unwrap().blocked);

        let queue2 = queue.clone();
        let handle = spawn(move || queue2.enqueue(msg(2, 2)));
        sleep(Duration::from_millis(50));
        queue.dequeue().unwrap();

        let receipt = handle.join().unwrap().unwrap();
        assert!(receipt.blocked);
    }

    #[test]
    fn consumer_block_signal_reports_wait_time() {
        let queue = SyncAgingQueue::new(1, 0).unwrap();
        let queue2 = queue.clone();
        let handle = spawn(move || queue2.dequeue());
        sleep(Duration::from_millis(50));
        queue.enqueue(msg(3, 1)).unwrap();

        let receipt = handle.join().unwrap().unwrap();
        assert!(receipt.blocked);
        assert!(receipt.waited >= Duration::from_millis(10));
    }

    #[test]
    fn shutdown_unparks_every_waiter() {
        let full = SyncAgingQueue::new(1, 0).unwrap();
        full.enqueue(msg(1, 1)).unwrap();
        let empty = SyncAgingQueue::new(1, 0).unwrap();

        let mut handles = Vec::new();
        for producer in 0..3 {
            let queue = full.clone();
            handles.push(spawn(move || queue.enqueue(msg(1, producer)).map(|_| ())));
        }
        for _ in 0..3 {
            let queue = empty.clone();
            handles.push(spawn(move || queue.dequeue().map(|_| ())));
        }
        sleep(Duration::from_millis(50));
        full.shutdown();
        empty.shutdown();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Err(QueueError::Shutdown));
        }
    }

    #[test]
    fn shutdown_is_idempotent_and_preserves_residual() {
        let queue = SyncAgingQueue::new(5, 0).unwrap();
        queue.enqueue(msg(1, 1)).unwrap();
        queue.enqueue(msg(2, 1)).unwrap();

        queue.shutdown();
        queue.shutdown();

        assert!(matches!(queue.enqueue(msg(3, 1)), Err(QueueError::Shutdown)));
        assert!(matches!(queue.dequeue(), Err(QueueError::Shutdown)));
        assert_eq!(queue.occupancy(), 2);
        assert!(queue.is_shut_down());
    }

    #[test]
    fn enqueue_happens_before_matching_dequeue() {
        let queue = SyncAgingQueue::new(4, 0).unwrap();
        let queue2 = queue.clone();
        let consumer = spawn(move || {
            let mut payloads = Vec::new();
            for _ in 0..20 {
                payloads.push(queue2.dequeue().unwrap().msg.payload);
            }
            payloads
        });
        for i in 0..20 {
            queue.enqueue(Message::new(i, 0, 1, clock::wall_ms())).unwrap();
        }
        let payloads = consumer.join().unwrap();
        // Single producer at one priority level: arrival order is preserved.
        assert_eq!(payloads, (0..20).collect::<Vec<i32>>());
    }
}
