//! Typed messages delivered to the application.
//!
//! Everything the engine wants the application to know arrives as a
//! [`Message`]: lifecycle changes, server events, command acknowledgements.
//! In auto-event mode handlers fire on the engine thread as messages are
//! produced; in pull mode messages queue up until
//! [`crate::DiscordRpcClient::invoke`] drains them.

use std::time::SystemTime;

use crate::presence::RichPresence;
use crate::subscription::EventType;
use crate::user::{Configuration, User};

/// A message from the connection engine, stamped with its creation time.
#[derive(Debug, Clone)]
pub struct Message {
    pub body: MessageBody,
    pub timestamp: SystemTime,
}

impl Message {
    pub(crate) fn new(body: MessageBody) -> Self {
        Self {
            body,
            timestamp: SystemTime::now(),
        }
    }

    /// Discriminant of the body, used to route handlers.
    pub fn kind(&self) -> MessageKind {
        match self.body {
            MessageBody::Ready { .. } => MessageKind::Ready,
            MessageBody::Close { .. } => MessageKind::Close,
            MessageBody::Error { .. } => MessageKind::Error,
            MessageBody::PresenceUpdate { .. } => MessageKind::PresenceUpdate,
            MessageBody::Subscribe { .. } => MessageKind::Subscribe,
            MessageBody::Unsubscribe { .. } => MessageKind::Unsubscribe,
            MessageBody::Join { .. } => MessageKind::Join,
            MessageBody::Spectate { .. } => MessageKind::Spectate,
            MessageBody::JoinRequest { .. } => MessageKind::JoinRequest,
            MessageBody::ConnectionEstablished { .. } => MessageKind::ConnectionEstablished,
            MessageBody::ConnectionFailed { .. } => MessageKind::ConnectionFailed,
        }
    }
}

/// The payload of a [`Message`].
#[derive(Debug, Clone)]
pub enum MessageBody {
    /// Handshake completed; Discord told us who is logged in.
    Ready {
        version: u32,
        config: Configuration,
        user: User,
    },

    /// The connection closed, by either side.
    Close { code: i64, reason: String },

    /// Discord rejected a command, or the outbound queue overflowed.
    Error { code: i64, message: String },

    /// Server acknowledgement of a `SetActivity`, echoing the presence
    /// with server-resolved asset ids.
    PresenceUpdate { presence: RichPresence },

    /// A `Subscribe` command was acknowledged.
    Subscribe { event: EventType },

    /// An `Unsubscribe` command was acknowledged.
    Unsubscribe { event: EventType },

    /// The user accepted a join invite somewhere; connect with this secret.
    Join { secret: String },

    /// The user started spectating; connect with this secret.
    Spectate { secret: String },

    /// Somebody wants to join the party. Answer with
    /// [`crate::DiscordRpcClient::respond`].
    JoinRequest { user: User },

    /// A pipe accepted our connection.
    ConnectionEstablished { pipe: i32 },

    /// Every candidate pipe refused the connection.
    ConnectionFailed { pipe: i32 },
}

/// Discriminant-only view of [`MessageBody`], used as the handler
/// registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ready,
    Close,
    Error,
    PresenceUpdate,
    Subscribe,
    Unsubscribe,
    Join,
    Spectate,
    JoinRequest,
    ConnectionEstablished,
    ConnectionFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_body() {
        let msg = Message::new(MessageBody::Join {
            secret: "s".into(),
        });
        assert_eq!(msg.kind(), MessageKind::Join);

        let msg = Message::new(MessageBody::ConnectionFailed { pipe: -1 });
        assert_eq!(msg.kind(), MessageKind::ConnectionFailed);
    }

    #[test]
    fn messages_are_timestamped() {
        let before = SystemTime::now();
        let msg = Message::new(MessageBody::Close {
            code: 0,
            reason: "bye".into(),
        });
        assert!(msg.timestamp >= before);
    }
}
