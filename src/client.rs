//! The managed Rich Presence client.
//!
//! [`DiscordRpcClient`] is safe to call from any thread: every public
//! operation takes a short critical section on a single client-wide mutex
//! and hands real work to the engine worker through the command queue.
//! Nothing here ever blocks on pipe I/O.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::dispatch::{Dispatcher, SharedState};
use crate::engine::{Command, ConnectionEngine, EngineConfig};
use crate::error::{DiscordRpcError, Result};
use crate::ipc::transport::{NativeTransport, Transport};
use crate::logging::{log_at, Logger, TracingLogger};
use crate::message::{Message, MessageBody, MessageKind};
use crate::presence::{PresenceParty, PresenceSecrets, RichPresence};
use crate::registrar::SchemeRegistrar;
use crate::subscription::{EventType, Subscription};
use crate::user::{Configuration, User};

/// Error code used for locally synthesized [`MessageBody::Error`]
/// messages, distinguishing them from server-assigned codes.
pub const LOCAL_ERROR_CODE: i64 = -1;

/// The process id Discord uses to reap a presence when its owner exits.
/// Resolved once at client construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity(u32);

impl ProcessIdentity {
    pub fn current() -> Self {
        Self(std::process::id())
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Construction options for [`DiscordRpcClient`].
pub struct ClientOptions {
    /// Pipe index to connect to; `-1` scans pipes 0 through 9.
    pub pipe: i32,

    /// When `true` (the default) event handlers run on the engine thread
    /// as messages arrive. When `false` messages queue until
    /// [`DiscordRpcClient::invoke`] drains them.
    pub auto_events: bool,

    /// Inbound message queue bound for pull mode; 0 means unbounded.
    pub max_queue_size: usize,

    /// Outbound command queue bound; 0 means unbounded.
    pub command_queue_size: usize,

    pub logger: Arc<dyn Logger>,

    pub engine: EngineConfig,

    /// Replacement transport, mainly for tests. `None` uses the
    /// platform's pipes.
    pub transport: Option<Box<dyn Transport>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            pipe: -1,
            auto_events: true,
            max_queue_size: 128,
            command_queue_size: 128,
            logger: Arc::new(TracingLogger::default()),
            engine: EngineConfig::default(),
            transport: None,
        }
    }
}

/// A Discord Rich Presence client with a managed background connection.
///
/// ```no_run
/// use presencewire::{DiscordRpcClient, PresenceBuilder};
///
/// # fn main() -> presencewire::Result {
/// let client = DiscordRpcClient::new("424087019149328395")?;
/// client.initialize()?;
///
/// let presence = PresenceBuilder::new()
///     .state("In a group")?
///     .details("Competitive")?
///     .build();
/// client.set_presence(Some(presence))?;
/// # Ok(())
/// # }
/// ```
pub struct DiscordRpcClient {
    application_id: String,
    pid: ProcessIdentity,
    pipe: i32,
    command_queue_size: usize,
    logger: Arc<dyn Logger>,
    engine_config: EngineConfig,
    shared: Arc<Mutex<SharedState>>,
    dispatcher: Arc<Dispatcher>,
    /// Transport waiting for (re-)initialize; the engine owns it while
    /// running and returns it on stop.
    transport_slot: Mutex<Option<Box<dyn Transport>>>,
    engine: Mutex<Option<ConnectionEngine>>,
}

impl DiscordRpcClient {
    /// Create a client with default options (pipe scan, auto events).
    pub fn new<S: Into<String>>(application_id: S) -> Result<Self> {
        Self::with_options(application_id, ClientOptions::default())
    }

    pub fn with_options<S: Into<String>>(
        application_id: S,
        options: ClientOptions,
    ) -> Result<Self> {
        let application_id = application_id.into();
        if application_id.trim().is_empty() {
            return Err(DiscordRpcError::InvalidConfiguration(
                "application id must not be empty".into(),
            ));
        }
        // Application ids are snowflakes; anything else is a typo'd token.
        if !application_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(DiscordRpcError::InvalidConfiguration(
                "application id must be numeric".into(),
            ));
        }

        let shared = Arc::new(Mutex::new(SharedState::default()));
        let dispatcher = Arc::new(Dispatcher::new(
            options.auto_events,
            options.max_queue_size,
            shared.clone(),
            options.logger.clone(),
        ));

        Ok(Self {
            application_id,
            pid: ProcessIdentity::current(),
            pipe: options.pipe,
            command_queue_size: options.command_queue_size,
            logger: options.logger,
            engine_config: options.engine,
            shared,
            dispatcher,
            transport_slot: Mutex::new(options.transport),
            engine: Mutex::new(None),
        })
    }

    // ---- lifecycle -------------------------------------------------------

    /// Start the engine worker.
    pub fn initialize(&self) -> Result {
        {
            let mut shared = self.shared.lock();
            if shared.disposed {
                return Err(DiscordRpcError::Disposed);
            }
            if shared.initialized {
                return Err(DiscordRpcError::AlreadyInitialized);
            }
            shared.initialized = true;
        }

        let transport = self
            .transport_slot
            .lock()
            .take()
            .unwrap_or_else(|| Box::new(NativeTransport::new()));

        match ConnectionEngine::start(
            self.engine_config.clone(),
            self.application_id.clone(),
            self.pid.get(),
            self.pipe,
            self.command_queue_size,
            transport,
            self.dispatcher.clone(),
            self.logger.clone(),
        ) {
            Ok(engine) => {
                *self.engine.lock() = Some(engine);
                log_at!(self.logger, Info, "client initialized");
                Ok(())
            }
            Err(e) => {
                self.shared.lock().initialized = false;
                Err(e)
            }
        }
    }

    /// Stop the engine worker gracefully. The client may be initialized
    /// again afterwards; the stored presence survives for
    /// [`Self::synchronize_state`].
    pub fn deinitialize(&self) -> Result {
        {
            let mut shared = self.shared.lock();
            if shared.disposed {
                return Err(DiscordRpcError::Disposed);
            }
            if !shared.initialized {
                return Err(DiscordRpcError::Uninitialized);
            }
            shared.initialized = false;
        }

        let engine = self.engine.lock().take();
        if let Some(engine) = engine {
            // In-band close lets a connected worker say goodbye before the
            // stop signal lands.
            engine.enqueue(Command::Close);
            if let Some(transport) = engine.stop() {
                *self.transport_slot.lock() = Some(transport);
            }
        }
        log_at!(self.logger, Info, "client deinitialized");
        Ok(())
    }

    /// Terminal stop. Idempotent; queued outbound commands are dropped.
    pub fn dispose(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.disposed {
                return;
            }
            shared.disposed = true;
            shared.initialized = false;
        }

        let engine = self.engine.lock().take();
        if let Some(engine) = engine {
            let _ = engine.stop();
        }
        log_at!(self.logger, Info, "client disposed");
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock().initialized
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    // ---- rich presence ---------------------------------------------------

    /// Publish (or, with `None`, clear) the Rich Presence.
    ///
    /// The record is validated, stored as the client's current presence,
    /// and shipped to the engine as a deep clone so later mutation by the
    /// caller cannot race the write. Before `initialize` the record is
    /// only stored; `synchronize_state` or the first `update_*` after
    /// initialize will send it.
    pub fn set_presence(&self, presence: Option<RichPresence>) -> Result {
        let initialized = {
            let mut shared = self.shared.lock();
            if shared.disposed {
                return Err(DiscordRpcError::Disposed);
            }
            if let Some(p) = &presence {
                p.validate()?;
                if p.secrets.is_some() && !shared.uri_scheme_registered {
                    return Err(DiscordRpcError::BadPresence(
                        "presence secrets require a registered uri scheme".into(),
                    ));
                }
                if p.has_secrets_without_party() {
                    log_at!(
                        self.logger,
                        Warning,
                        "presence has secrets but no party; Discord will not offer join or spectate"
                    );
                }
            }
            shared.current_presence = presence.clone();
            shared.initialized
        };

        if !initialized {
            log_at!(
                self.logger,
                Info,
                "client not initialized; presence stored for a later synchronize"
            );
            return Ok(());
        }

        self.enqueue(Command::Presence {
            pid: self.pid.get(),
            presence,
        });
        Ok(())
    }

    /// Clear the Rich Presence for this application.
    pub fn clear_presence(&self) -> Result {
        self.set_presence(None)
    }

    /// Re-send the stored presence and subscription, typically after a
    /// fresh Ready.
    pub fn synchronize_state(&self) -> Result {
        let (presence, subscription, registered) = {
            let shared = self.shared.lock();
            if shared.disposed {
                return Err(DiscordRpcError::Disposed);
            }
            if !shared.initialized {
                return Err(DiscordRpcError::Uninitialized);
            }
            (
                shared.current_presence.clone(),
                shared.subscription,
                shared.uri_scheme_registered,
            )
        };

        self.enqueue(Command::Presence {
            pid: self.pid.get(),
            presence,
        });
        if registered {
            for event in subscription.iter() {
                self.enqueue(Command::Subscribe {
                    event,
                    unsubscribe: false,
                });
            }
        }
        Ok(())
    }

    pub fn update_state<S: Into<String>>(&self, state: S) -> Result {
        let state = state.into();
        self.mutate_presence(move |p| {
            p.state = Some(state.trim().to_owned());
            Ok(())
        })
    }

    pub fn update_details<S: Into<String>>(&self, details: S) -> Result {
        let details = details.into();
        self.mutate_presence(move |p| {
            p.details = Some(details.trim().to_owned());
            Ok(())
        })
    }

    pub fn update_party(&self, party: PresenceParty) -> Result {
        self.mutate_presence(move |p| {
            p.party = Some(party);
            Ok(())
        })
    }

    /// Resize the current party. Sizes are coerced so the rendered count
    /// never reads "3 of 2".
    pub fn update_party_size(&self, size: u32, max: u32) -> Result {
        self.mutate_presence(move |p| {
            let party = p.party.as_mut().ok_or_else(|| {
                DiscordRpcError::BadPresence("no party to resize; set a party first".into())
            })?;
            party.size = size.max(1);
            party.max = max.max(party.size);
            Ok(())
        })
    }

    pub fn update_large_asset<K: Into<String>, T: Into<String>>(&self, key: K, tooltip: T) -> Result {
        let (key, tooltip) = (key.into(), tooltip.into());
        self.mutate_presence(move |p| {
            let assets = p.assets.get_or_insert_with(Default::default);
            assets.large_image = Some(key.trim().to_owned());
            assets.large_text = Some(tooltip.trim().to_owned());
            Ok(())
        })
    }

    pub fn update_small_asset<K: Into<String>, T: Into<String>>(&self, key: K, tooltip: T) -> Result {
        let (key, tooltip) = (key.into(), tooltip.into());
        self.mutate_presence(move |p| {
            let assets = p.assets.get_or_insert_with(Default::default);
            assets.small_image = Some(key.trim().to_owned());
            assets.small_text = Some(tooltip.trim().to_owned());
            Ok(())
        })
    }

    pub fn update_secrets(&self, secrets: PresenceSecrets) -> Result {
        self.mutate_presence(move |p| {
            p.secrets = Some(secrets);
            Ok(())
        })
    }

    /// Set the start instant, milliseconds since the Unix epoch.
    pub fn update_start_time(&self, millis: u64) -> Result {
        self.mutate_presence(move |p| {
            p.timestamps.get_or_insert_with(Default::default).start = Some(millis);
            Ok(())
        })
    }

    /// Set the end instant, milliseconds since the Unix epoch.
    pub fn update_end_time(&self, millis: u64) -> Result {
        self.mutate_presence(move |p| {
            p.timestamps.get_or_insert_with(Default::default).end = Some(millis);
            Ok(())
        })
    }

    /// Remove both timestamps.
    pub fn update_clear_time(&self) -> Result {
        self.mutate_presence(|p| {
            p.timestamps = None;
            Ok(())
        })
    }

    /// Read-modify-write on a clone of the current presence, then re-issue
    /// `set_presence` with the result.
    fn mutate_presence<F>(&self, mutate: F) -> Result
    where
        F: FnOnce(&mut RichPresence) -> Result,
    {
        let presence = {
            let shared = self.shared.lock();
            if shared.disposed {
                return Err(DiscordRpcError::Disposed);
            }
            if !shared.initialized {
                return Err(DiscordRpcError::Uninitialized);
            }
            let mut presence = shared.current_presence.clone().unwrap_or_default();
            mutate(&mut presence)?;
            presence
        };
        self.set_presence(Some(presence))
    }

    // ---- subscriptions ---------------------------------------------------

    /// Subscribe to one event. Requires a registered URI scheme.
    pub fn subscribe(&self, event: EventType) -> Result {
        let current = self.subscription();
        self.set_subscription(current.with(event))
    }

    /// Unsubscribe from one event.
    pub fn unsubscribe(&self, event: EventType) -> Result {
        let current = self.subscription();
        self.set_subscription(current.without(event))
    }

    /// Replace the whole subscription set, sending `Subscribe` for bits
    /// newly set and `Unsubscribe` for bits newly cleared. A no-change
    /// mask produces no wire traffic at all.
    pub fn set_subscription(&self, subscription: Subscription) -> Result {
        let (added, removed) = {
            let mut shared = self.shared.lock();
            if shared.disposed {
                return Err(DiscordRpcError::Disposed);
            }
            if !shared.initialized {
                return Err(DiscordRpcError::Uninitialized);
            }
            if !shared.uri_scheme_registered {
                return Err(DiscordRpcError::InvalidConfiguration(
                    "event subscriptions require a registered uri scheme".into(),
                ));
            }

            let old = shared.subscription;
            if old == subscription {
                return Ok(());
            }
            shared.subscription = subscription;

            let added: Vec<EventType> = subscription.difference(old).collect();
            let removed: Vec<EventType> = old.difference(subscription).collect();
            (added, removed)
        };

        for event in added {
            self.enqueue(Command::Subscribe {
                event,
                unsubscribe: false,
            });
        }
        for event in removed {
            self.enqueue(Command::Subscribe {
                event,
                unsubscribe: true,
            });
        }
        Ok(())
    }

    /// Answer an `ACTIVITY_JOIN_REQUEST`.
    pub fn respond(&self, user_id: u64, accept: bool) -> Result {
        {
            let shared = self.shared.lock();
            if shared.disposed {
                return Err(DiscordRpcError::Disposed);
            }
            if !shared.initialized {
                return Err(DiscordRpcError::Uninitialized);
            }
        }
        self.enqueue(Command::Respond { user_id, accept });
        Ok(())
    }

    /// Run the platform registrar and record its verdict, unlocking
    /// secrets and subscriptions.
    pub fn register_uri_scheme(&self, registrar: &dyn SchemeRegistrar) -> Result<bool> {
        let registered = registrar.register(&self.application_id);
        let mut shared = self.shared.lock();
        if shared.disposed {
            return Err(DiscordRpcError::Disposed);
        }
        shared.uri_scheme_registered = registered;
        Ok(registered)
    }

    // ---- message delivery ------------------------------------------------

    /// Register a handler for one message kind. Handlers run on the engine
    /// thread in auto-event mode, on the `invoke` caller otherwise.
    pub fn on<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.dispatcher.handlers().add(kind, Arc::new(handler));
    }

    /// Drain pending messages, folding their state changes into the client
    /// and firing handlers in arrival order. Pull mode only: with auto
    /// events enabled this logs and returns nothing.
    pub fn invoke(&self) -> Vec<Message> {
        if self.shared.lock().disposed {
            return Vec::new();
        }
        if self.dispatcher.auto_events() {
            log_at!(
                self.logger,
                Warning,
                "invoke() does nothing while auto events are enabled"
            );
            return Vec::new();
        }
        self.dispatcher.drain()
    }

    // ---- getters ---------------------------------------------------------

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    /// Deep copy of the current presence, if any has been set.
    pub fn current_presence(&self) -> Option<RichPresence> {
        self.shared.lock().current_presence.clone()
    }

    /// The logged-in user, once a Ready has been observed.
    pub fn current_user(&self) -> Option<User> {
        self.shared.lock().current_user.clone()
    }

    /// Server endpoints, once a Ready has been observed.
    pub fn configuration(&self) -> Option<Configuration> {
        self.shared.lock().configuration.clone()
    }

    pub fn subscription(&self) -> Subscription {
        self.shared.lock().subscription
    }

    fn enqueue(&self, command: Command) {
        let evicted = self
            .engine
            .lock()
            .as_ref()
            .map(|engine| engine.enqueue(command));

        if let Some(Some(_dropped)) = evicted {
            log_at!(
                self.logger,
                Warning,
                "outbound command queue overflowed, dropped the oldest command"
            );
            self.dispatcher.deliver(Message::new(MessageBody::Error {
                code: LOCAL_ERROR_CODE,
                message: "outbound command queue overflowed; oldest command dropped".into(),
            }));
        }
    }
}

impl Drop for DiscordRpcClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_application_id_is_rejected() {
        assert!(matches!(
            DiscordRpcClient::new(""),
            Err(DiscordRpcError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            DiscordRpcClient::new("   "),
            Err(DiscordRpcError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn non_numeric_application_id_is_rejected() {
        assert!(matches!(
            DiscordRpcClient::new("abc"),
            Err(DiscordRpcError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            DiscordRpcClient::new("4240870191abc28395"),
            Err(DiscordRpcError::InvalidConfiguration(_))
        ));
        assert!(DiscordRpcClient::new("424087019149328395").is_ok());
    }

    #[test]
    fn process_identity_is_stable() {
        let a = ProcessIdentity::current();
        let b = ProcessIdentity::current();
        assert_eq!(a, b);
        assert_eq!(a.get(), std::process::id());
    }
}
