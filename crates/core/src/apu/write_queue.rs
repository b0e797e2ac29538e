//! Bounded FIFO of timestamped register writes.
//!
//! Each entry carries the time in seconds since the previous write, not an
//! absolute time. The consumer walks the queue front to back converting those
//! deltas into sample offsets, and may shorten the front entry's delta when a
//! write lands beyond the end of the buffer being rendered.

use serde::{Deserialize, Serialize};

use crate::logging::{log, LogCategory, LogLevel};

/// Default number of writes held before overflow handling kicks in
pub const DEFAULT_CAPACITY: usize = 512;

/// A single register write waiting to be applied
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegisterWrite {
    /// Chip register address
    pub address: u16,
    /// Value written
    pub value: u8,
    /// Seconds since the previous write
    pub delta: f64,
}

impl RegisterWrite {
    pub fn new(address: u16, value: u8, delta: f64) -> Self {
        Self {
            address,
            value,
            delta,
        }
    }
}

/// What to do with a write that arrives while the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum OverflowPolicy {
    /// Discard the new write and log it
    #[default]
    Drop,
    /// Double the capacity up to `max_capacity`, then drop
    Grow { max_capacity: usize },
}

/// Fixed-capacity ring buffer of [`RegisterWrite`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "QueueState")]
pub struct RegisterWriteQueue {
    slots: Vec<RegisterWrite>,
    head: usize,
    len: usize,
    policy: OverflowPolicy,
    /// Writes discarded since creation
    dropped: u64,
}

/// Unchecked form of a saved queue
#[derive(Deserialize)]
struct QueueState {
    slots: Vec<RegisterWrite>,
    head: usize,
    len: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl TryFrom<QueueState> for RegisterWriteQueue {
    type Error = String;

    fn try_from(state: QueueState) -> Result<Self, Self::Error> {
        let capacity = state.slots.len();
        if capacity == 0 {
            return Err("register write queue has no slots".into());
        }
        if state.head >= capacity || state.len > capacity {
            return Err(format!(
                "register write queue head {} / len {} out of range for {} slots",
                state.head, state.len, capacity
            ));
        }
        let queue = Self {
            slots: state.slots,
            head: state.head,
            len: state.len,
            policy: state.policy,
            dropped: state.dropped,
        };
        if let Some(bad) = queue.iter().find(|w| !(w.delta.is_finite() && w.delta >= 0.0)) {
            return Err(format!("register write queue holds invalid delta {}", bad.delta));
        }
        Ok(queue)
    }
}

impl Default for RegisterWriteQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RegisterWriteQueue {
    /// Create a queue that drops writes once `capacity` are pending.
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::Drop)
    }

    pub fn with_policy(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            slots: vec![RegisterWrite::default(); capacity.max(1)],
            head: 0,
            len: 0,
            policy,
            dropped: 0,
        }
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

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of writes discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append a write. Returns false if it was dropped.
    pub fn enqueue(&mut self, write: RegisterWrite) -> bool {
        if self.len == self.slots.len() && !self.try_grow() {
            self.dropped += 1;
            let dropped = self.dropped;
            log(LogCategory::Queue, LogLevel::Warn, || {
                format!(
                    "Queue: full ({} entries), dropped write ${:02X}=${:02X} ({} total)",
                    self.len, write.address, write.value, dropped
                )
            });
            return false;
        }

        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = write;
        self.len += 1;
        true
    }

    fn try_grow(&mut self) -> bool {
        let max_capacity = match self.policy {
            OverflowPolicy::Drop => return false,
            OverflowPolicy::Grow { max_capacity } => max_capacity,
        };
        let capacity = self.slots.len();
        if capacity >= max_capacity {
            return false;
        }

        let new_capacity = (capacity * 2).min(max_capacity);
        // Unroll the ring so the oldest entry sits at index 0
        self.slots.rotate_left(self.head);
        self.slots.resize(new_capacity, RegisterWrite::default());
        self.head = 0;
        log(LogCategory::Queue, LogLevel::Debug, || {
            format!("Queue: grew from {} to {} entries", capacity, new_capacity)
        });
        true
    }

    /// Remove the oldest write. Does nothing on an empty queue.
    pub fn dequeue_front(&mut self) -> Option<RegisterWrite> {
        if self.len == 0 {
            return None;
        }
        let write = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        Some(write)
    }

    /// The oldest write.
    ///
    /// Asking for the front of an empty queue is a caller bug: debug builds
    /// panic, release builds get `None`.
    pub fn front(&self) -> Option<&RegisterWrite> {
        debug_assert!(self.len > 0, "front() on empty register write queue");
        (self.len > 0).then(|| &self.slots[self.head])
    }

    /// Mutable access to the oldest write, with the same contract as [`front`](Self::front).
    pub fn front_mut(&mut self) -> Option<&mut RegisterWrite> {
        debug_assert!(self.len > 0, "front_mut() on empty register write queue");
        if self.len == 0 {
            return None;
        }
        Some(&mut self.slots[self.head])
    }

    /// Pending writes in order, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &RegisterWrite> {
        let capacity = self.slots.len();
        (0..self.len).map(move |i| &self.slots[(self.head + i) % capacity])
    }

    /// Sum of all pending deltas in seconds
    pub fn total_pending_duration(&self) -> f64 {
        self.iter().map(|w| w.delta).sum()
    }

    /// Discard every pending write
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
