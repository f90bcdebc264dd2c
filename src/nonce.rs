//! Nonce assignment and outstanding-command tracking.
//!
//! Every outbound command carries a fresh nonce drawn from a process-wide
//! monotonically increasing counter, rendered as a decimal string. Discord
//! echoes the nonce in its acknowledgement, which lets the engine correlate
//! `ok`/`Error` responses back to the command that caused them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::ipc::protocol::CommandKind;
use crate::subscription::EventType;

static NONCE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Produce the next nonce. Unique across every client in the process.
pub fn next_nonce() -> String {
    NONCE_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// A command awaiting acknowledgement from Discord.
#[derive(Debug, Clone)]
pub(crate) struct PendingCommand {
    pub cmd: CommandKind,
    /// Event the command subscribed to or unsubscribed from, if any.
    pub event: Option<EventType>,
    pub issued_at: Instant,
}

/// Nonce-keyed map of commands still waiting for their ack.
///
/// Entries leave the map when the ack arrives or when they outlive
/// the expiry window (Discord occasionally swallows responses across
/// a reconnect).
#[derive(Debug, Default)]
pub(crate) struct PendingAcks {
    entries: HashMap<String, PendingCommand>,
}

impl PendingAcks {
    pub fn record(&mut self, nonce: String, cmd: CommandKind, event: Option<EventType>) {
        self.entries.insert(
            nonce,
            PendingCommand {
                cmd,
                event,
                issued_at: Instant::now(),
            },
        );
    }

    /// Remove and return the command the nonce belongs to.
    pub fn take(&mut self, nonce: &str) -> Option<PendingCommand> {
        self.entries.remove(nonce)
    }

    /// Drop entries older than `ttl`. Returns how many were discarded.
    pub fn expire(&mut self, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, pending| pending.issued_at.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
