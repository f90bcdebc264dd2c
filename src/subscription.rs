//! Event subscription bitset.

use crate::ipc::protocol::ServerEvent;

/// Inbound events an application can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Another user accepted a join invite; carries the join secret.
    Join,
    /// Another user started spectating; carries the spectate secret.
    Spectate,
    /// Another user asked to join the party.
    JoinRequest,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Join, EventType::Spectate, EventType::JoinRequest];

    pub(crate) fn bit(self) -> u8 {
        match self {
            EventType::Join => 1 << 0,
            EventType::Spectate => 1 << 1,
            EventType::JoinRequest => 1 << 2,
        }
    }

    /// The wire name Discord expects in the `evt` envelope slot.
    pub(crate) fn server_event(self) -> ServerEvent {
        match self {
            EventType::Join => ServerEvent::ActivityJoin,
            EventType::Spectate => ServerEvent::ActivitySpectate,
            EventType::JoinRequest => ServerEvent::ActivityJoinRequest,
        }
    }
}

/// Set of [`EventType`] values, stored as a small bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subscription(u8);

impl Subscription {
    pub const EMPTY: Subscription = Subscription(0);

    pub fn contains(self, event: EventType) -> bool {
        self.0 & event.bit() != 0
    }

    pub fn insert(&mut self, event: EventType) {
        self.0 |= event.bit();
    }

    pub fn remove(&mut self, event: EventType) {
        self.0 &= !event.bit();
    }

    pub fn with(mut self, event: EventType) -> Self {
        self.insert(event);
        self
    }

    pub fn without(mut self, event: EventType) -> Self {
        self.remove(event);
        self
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Events present in `self` but not in `other`.
    pub fn difference(self, other: Subscription) -> impl Iterator<Item = EventType> {
        EventType::ALL
            .into_iter()
            .filter(move |event| self.contains(*event) && !other.contains(*event))
    }

    pub fn iter(self) -> impl Iterator<Item = EventType> {
        EventType::ALL
            .into_iter()
            .filter(move |event| self.contains(*event))
    }
}
