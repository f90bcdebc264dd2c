//! Bounded queues between the client façade and the engine worker.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::message::Message;
use crate::presence::RichPresence;
use crate::subscription::EventType;

/// A command from the façade to the engine.
#[derive(Debug, Clone)]
pub(crate) enum Command {
    /// `SetActivity` with `{pid, activity}`. A `None` presence clears
    /// Rich Presence for this application.
    Presence {
        pid: u32,
        presence: Option<RichPresence>,
    },

    /// `Subscribe` or `Unsubscribe` for one event.
    Subscribe { event: EventType, unsubscribe: bool },

    /// Answer to an `ACTIVITY_JOIN_REQUEST`.
    Respond { user_id: u64, accept: bool },

    /// Local shutdown request; never serialized to the wire as a command.
    Close,
}

/// Outbound FIFO drained by the engine worker.
///
/// Pushing never blocks the caller: when the queue is at capacity the
/// oldest entry is evicted and returned so the caller can surface an
/// overflow error. A condvar wakes the worker as soon as work arrives.
pub(crate) struct CommandQueue {
    inner: Mutex<VecDeque<Command>>,
    wakeup: Condvar,
    /// Zero means unbounded.
    capacity: usize,
}

impl CommandQueue {
    pub const DEFAULT_CAPACITY: usize = 128;

    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a command, returning the evicted oldest entry when full.
    pub fn push(&self, command: Command) -> Option<Command> {
        let mut queue = self.inner.lock();
        let evicted = if self.capacity > 0 && queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(command);
        drop(queue);

        self.wakeup.notify_one();
        evicted
    }

    /// Pop up to `max` commands in submission order.
    pub fn drain(&self, max: usize) -> Vec<Command> {
        let mut queue = self.inner.lock();
        let count = queue.len().min(max);
        queue.drain(..count).collect()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Sleep until the queue is non-empty, a notification arrives, or
    /// `timeout` passes. The engine's inter-tick wait.
    pub fn wait_for_work(&self, timeout: Duration) {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            self.wakeup.wait_for(&mut queue, timeout);
        }
    }

    /// Wake the worker without enqueueing anything (shutdown signal).
    pub fn interrupt(&self) {
        self.wakeup.notify_all();
    }
}

/// Inbound message FIFO, drained by `invoke` in pull mode.
///
/// Bounded the same way as [`CommandQueue`]: the oldest message is
/// silently discarded when the application stops draining.
pub(crate) struct MessageQueue {
    inner: Mutex<VecDeque<Message>>,
    /// Zero means unbounded.
    capacity: usize,
}

impl MessageQueue {
    pub const DEFAULT_CAPACITY: usize = 128;

    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Returns `true` when an old message had to be discarded.
    pub fn push(&self, message: Message) -> bool {
        let mut queue = self.inner.lock();
        let overflowed = self.capacity > 0 && queue.len() >= self.capacity;
        if overflowed {
            queue.pop_front();
        }
        queue.push_back(message);
        overflowed
    }

    pub fn drain(&self) -> Vec<Message> {
        self.inner.lock().drain(..).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
