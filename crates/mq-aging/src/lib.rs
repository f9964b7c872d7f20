use mq_core::{QueueError, Result};

/// Highest priority level; level 9 beats level 0.
pub const MAX_PRIORITY: u8 = 9;

pub const MIN_CAPACITY: usize = 1;
pub const MAX_CAPACITY: usize = 20;

/// A queued unit of work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: i32,
    pub priority: u8,
    pub producer: usize,
    pub created_ms: u64,
}

impl Message {
    /// Priorities above [`MAX_PRIORITY`] are clamped down.
    pub fn new(payload: i32, priority: u8, producer: usize, created_ms: u64) -> Self {
        Self {
            payload,
            priority: priority.min(MAX_PRIORITY),
            producer,
            created_ms,
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_ms)
    }

    /// Base priority plus one level per elapsed aging interval, capped at
    /// [`MAX_PRIORITY`]. An interval of 0 disables aging.
    pub fn effective_priority(&self, now_ms: u64, aging_interval_ms: u64) -> u8 {
        if aging_interval_ms == 0 {
            return self.priority;
        }
        let boost = self.age_ms(now_ms) / aging_interval_ms;
        let boosted = u64::from(self.priority).saturating_add(boost);
        boosted.min(u64::from(MAX_PRIORITY)) as u8
    }
}

/// Bounded ring of messages with priority-plus-aging extraction.
///
/// Single-threaded on purpose: the synchronised queue in `mq-sync` owns one
/// of these behind its mutex. `take_highest` recomputes effective priorities
/// at call time, so aging keeps working while messages sit in the buffer.
pub struct AgingQueue {
    slots: Vec<Option<Message>>,
    front: usize,
    len: usize,
    aging_interval_ms: u64,
}

impl AgingQueue {
    /// Capacity must lie in [`MIN_CAPACITY`]..=[`MAX_CAPACITY`].
    pub fn new(capacity: usize, aging_interval_ms: u64) -> Result<Self> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
            return Err(QueueError::BadCapacity(capacity));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            front: 0,
            len: 0,
            aging_interval_ms,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn aging_interval_ms(&self) -> u64 {
        self.aging_interval_ms
    }

    fn index_at(&self, offset: usize) -> usize {
        (self.front + offset) % self.slots.len()
    }

    /// Appends at the rear. A full buffer hands the message back to the
    /// caller instead of dropping it.
    pub fn push(&mut self, msg: Message) -> Option<Message> {
        if self.is_full() {
            return Some(msg);
        }
        let rear = self.index_at(self.len);
        self.slots[rear] = Some(msg);
        self.len += 1;
        None
    }

    /// Removes and returns the message with the highest effective priority
    /// at `now_ms`; ties go to the oldest creation timestamp, and equal
    /// timestamps to insertion order.
    ///
    /// Removal from the middle closes the hole by shifting the predecessors
    /// one slot rear-ward and advancing the front index, so the occupied
    /// region stays contiguous.
    pub fn take_highest(&mut self, now_ms: u64) -> Option<Message> {
        let mut best: Option<(usize, u8, u64)> = None;
        for offset in 0..self.len {
            let idx = self.index_at(offset);
            if let Some(msg) = self.slots[idx].as_ref() {
                let eff = msg.effective_priority(now_ms, self.aging_interval_ms);
                let wins = match best {
                    None => true,
                    Some((_, best_eff, best_created)) => {
                        eff > best_eff || (eff == best_eff && msg.created_ms < best_created)
                    }
                };
                if wins {
                    best = Some((offset, eff, msg.created_ms));
                }
            }
        }
        let (offset, _, _) = best?;
        let idx = self.index_at(offset);
        let msg = self.slots[idx].take();
        for o in (1..=offset).rev() {
            let dst = self.index_at(o);
            let src = self.index_at(o - 1);
            self.slots[dst] = self.slots[src].take();
        }
        self.front = self.index_at(1);
        self.len -= 1;
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(priority: u8, producer: usize, created_ms: u64) -> Message {
        Message::new(0, priority, producer, created_ms)
    }

    #[test]
    fn rejects_capacity_out_of_range() {
        assert_eq!(
            AgingQueue::new(0, 0).err(),
            Some(QueueError::BadCapacity(0))
        );
        assert_eq!(
            AgingQueue::new(21, 0).err(),
            Some(QueueError::BadCapacity(21))
        );
        assert!(AgingQueue::new(1, 0).is_ok());
        assert!(AgingQueue::new(20, 0).is_ok());
    }

    #[test]
    fn push_on_full_returns_message() {
        let mut q = AgingQueue::new(1, 0).unwrap();
        assert!(q.push(msg(1, 1, 0)).is_none());
        let back = q.push(msg(2, 1, 0));
        assert!(back.is_some());
        assert_eq!(back.unwrap().priority, 2);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn priority_dominance_without_aging() {
        let mut q = AgingQueue::new(5, 0).unwrap();
        for (i, p) in [2u8, 7, 1, 9, 5].into_iter().enumerate() {
            assert!(q.push(msg(p, 1, 1000 + i as u64)).is_none());
        }
        let mut out = Vec::new();
        while let Some(m) = q.take_highest(2000) {
            out.push(m.priority);
        }
        assert_eq!(out, vec![9, 7, 5, 2, 1]);
        assert!(q.is_empty());
    }

    #[test]
    fn fifo_within_priority_band() {
        let mut q = AgingQueue::new(5, 0).unwrap();
        assert!(q.push(msg(5, 1, 1000)).is_none());
        assert!(q.push(msg(5, 2, 1001)).is_none());
        assert!(q.push(msg(5, 3, 1002)).is_none());
        let producers: Vec<usize> = (0..3)
            .filter_map(|_| q.take_highest(2000).map(|m| m.producer))
            .collect();
        assert_eq!(producers, vec![1, 2, 3]);
    }

    #[test]
    fn fifo_holds_for_identical_timestamps() {
        let mut q = AgingQueue::new(5, 0).unwrap();
        for producer in 1..=3 {
            assert!(q.push(msg(5, producer, 1000)).is_none());
        }
        let producers: Vec<usize> = (0..3)
            .filter_map(|_| q.take_highest(1000).map(|m| m.producer))
            .collect();
        assert_eq!(producers, vec![1, 2, 3]);
    }

    #[test]
    fn aging_boosts_and_caps_effective_priority() {
        let m = msg(3, 1, 0);
        assert_eq!(m.effective_priority(500, 100), 8);
        assert_eq!(m.effective_priority(10_000, 100), 9);
        assert_eq!(m.effective_priority(99, 100), 3);
        // aging disabled
        assert_eq!(m.effective_priority(10_000, 0), 3);
    }

    #[test]
    fn aging_overtakes_a_higher_base_priority() {
        let mut q = AgingQueue::new(5, 100).unwrap();
        assert!(q.push(msg(3, 1, 0)).is_none());
        assert!(q.push(msg(7, 2, 590)).is_none());
        // At t=600 the old message has aged to min(3 + 6, 9) = 9 and beats 7.
        let first = q.take_highest(600).unwrap();
        assert_eq!(first.producer, 1);
        let second = q.take_highest(600).unwrap();
        assert_eq!(second.producer, 2);
    }

    #[test]
    fn middle_removal_keeps_order_across_wraparound() {
        let mut q = AgingQueue::new(3, 0).unwrap();
        assert!(q.push(msg(1, 1, 10)).is_none());
        assert!(q.push(msg(9, 2, 11)).is_none());
        assert!(q.push(msg(5, 3, 12)).is_none());
        // Middle-of-ring extraction.
        assert_eq!(q.take_highest(100).unwrap().producer, 2);
        // Wrap the ring: front has advanced, rear wraps past the end.
        assert!(q.push(msg(9, 4, 13)).is_none());
        assert_eq!(q.take_highest(100).unwrap().producer, 4);
        assert_eq!(q.take_highest(100).unwrap().producer, 3);
        assert_eq!(q.take_highest(100).unwrap().producer, 1);
        assert!(q.take_highest(100).is_none());
    }

    #[test]
    fn priority_above_max_is_clamped() {
        let m = Message::new(0, 42, 1, 0);
        assert_eq!(m.priority, MAX_PRIORITY);
    }
}
