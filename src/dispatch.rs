//! Message delivery and the state it keeps coherent.
//!
//! Both delivery modes funnel through [`Dispatcher`]: auto-event clients
//! get their handlers invoked on the engine thread the moment a message is
//! produced; pull clients accumulate messages until `invoke` drains them
//! on the calling thread. Either way the client's shared state is folded
//! forward before any handler observes the message.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::queue::MessageQueue;
use crate::logging::{log_at, Logger};
use crate::message::{Message, MessageBody, MessageKind};
use crate::presence::RichPresence;
use crate::subscription::Subscription;
use crate::user::{Configuration, User};

/// Callback invoked for a delivered [`Message`].
pub type EventHandler = Arc<dyn Fn(&Message) + Send + Sync + 'static>;

/// Everything guarded by the single client-wide mutex.
#[derive(Default)]
pub(crate) struct SharedState {
    pub current_presence: Option<RichPresence>,
    pub current_user: Option<User>,
    pub configuration: Option<Configuration>,
    pub subscription: Subscription,
    pub initialized: bool,
    pub disposed: bool,
    pub uri_scheme_registered: bool,
}

impl SharedState {
    /// Fold a message into the client's view of the world.
    fn apply(&mut self, message: &Message) {
        match &message.body {
            MessageBody::Ready { config, user, .. } => {
                self.configuration = Some(config.clone());
                self.current_user = Some(user.clone());
            }
            MessageBody::PresenceUpdate { presence } => match &mut self.current_presence {
                Some(current) => current.merge(presence),
                None => self.current_presence = Some(presence.clone()),
            },
            MessageBody::Subscribe { event } => self.subscription.insert(*event),
            MessageBody::Unsubscribe { event } => self.subscription.remove(*event),
            _ => {}
        }
    }
}

/// Per-kind handler slots.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    slots: Mutex<HashMap<MessageKind, Vec<EventHandler>>>,
}

impl HandlerRegistry {
    pub fn add(&self, kind: MessageKind, handler: EventHandler) {
        self.slots.lock().entry(kind).or_default().push(handler);
    }

    fn fire(&self, message: &Message) {
        // Run handlers outside the lock so they may register new ones.
        let handlers: Vec<EventHandler> = self
            .slots
            .lock()
            .get(&message.kind())
            .map(|handlers| handlers.to_vec())
            .unwrap_or_default();
        for handler in &handlers {
            handler(message);
        }
    }
}

/// Routes messages from producers (mostly the engine worker) to the
/// application.
pub(crate) struct Dispatcher {
    auto_events: bool,
    queue: MessageQueue,
    handlers: HandlerRegistry,
    shared: Arc<Mutex<SharedState>>,
    logger: Arc<dyn Logger>,
}

impl Dispatcher {
    pub fn new(
        auto_events: bool,
        max_queue_size: usize,
        shared: Arc<Mutex<SharedState>>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            auto_events,
            queue: MessageQueue::new(max_queue_size),
            handlers: HandlerRegistry::default(),
            shared,
            logger,
        }
    }

    pub fn auto_events(&self) -> bool {
        self.auto_events
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Hand a message to the application.
    pub fn deliver(&self, message: Message) {
        if self.auto_events {
            self.consume(&message);
        } else if self.queue.push(message) {
            log_at!(
                self.logger,
                Warning,
                "inbound queue full, discarded the oldest message; call invoke() more often"
            );
        }
    }

    /// Drain queued messages, folding state and firing handlers in FIFO
    /// order. Pull mode only.
    pub fn drain(&self) -> Vec<Message> {
        let messages = self.queue.drain();
        for message in &messages {
            self.consume(message);
        }
        messages
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn consume(&self, message: &Message) {
        self.shared.lock().apply(message);
        self.handlers.fire(message);
    }
}
