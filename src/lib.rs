//! # presencewire
//!
//! Discord Rich Presence over the local IPC pipe, with a managed
//! background connection.
//!
//! A worker thread owns the pipe end to end: it discovers Discord's
//! socket (Unix domain sockets on Linux and macOS, named pipes on
//! Windows), performs the handshake, keeps the connection alive with
//! ping/pong, reconnects with backoff when Discord restarts, and turns
//! inbound frames into typed [`Message`]s. The [`DiscordRpcClient`]
//! façade is callable from any thread and never blocks on I/O.
//!
//! ## Publishing a presence
//!
//! ```no_run
//! use presencewire::{DiscordRpcClient, PresenceBuilder};
//!
//! # fn main() -> presencewire::Result {
//! let client = DiscordRpcClient::new("your_application_id")?;
//! client.initialize()?;
//!
//! let presence = PresenceBuilder::new()
//!     .state("In a group")?
//!     .details("Competitive - Rank 7")?
//!     .start_timestamp_now()?
//!     .large_image("map_nexus")?
//!     .large_text("The Nexus")?
//!     .build();
//!
//! client.set_presence(Some(presence))?;
//!
//! // ... play ...
//!
//! client.clear_presence()?;
//! client.dispose();
//! # Ok(())
//! # }
//! ```
//!
//! ## Receiving events
//!
//! With the default `auto_events`, handlers run on the engine thread as
//! messages arrive:
//!
//! ```no_run
//! use presencewire::{DiscordRpcClient, MessageBody, MessageKind};
//!
//! # fn main() -> presencewire::Result {
//! let client = DiscordRpcClient::new("your_application_id")?;
//! client.on(MessageKind::Ready, |message| {
//!     if let MessageBody::Ready { user, .. } = &message.body {
//!         println!("connected as {}", user.username);
//!     }
//! });
//! client.initialize()?;
//! # Ok(())
//! # }
//! ```
//!
//! With `auto_events` off, messages queue until
//! [`DiscordRpcClient::invoke`] drains them on the calling thread, which
//! suits applications with their own main loop.

pub mod client;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod message;
pub mod nonce;
pub mod presence;
pub mod registrar;
pub mod subscription;
pub mod user;

mod dispatch;

pub use client::{ClientOptions, DiscordRpcClient, ProcessIdentity, LOCAL_ERROR_CODE};
pub use engine::EngineConfig;
pub use error::{DiscordRpcError, Result};
pub use ipc::{Frame, NativeTransport, Opcode, Transport};
pub use logging::{LogLevel, Logger, NullLogger, TracingLogger};
pub use message::{Message, MessageBody, MessageKind};
pub use presence::{
    PresenceAssets, PresenceBuilder, PresenceParty, PresenceSecrets, PresenceTimestamps,
    RichPresence,
};
pub use registrar::{AlreadyRegistered, SchemeRegistrar};
pub use subscription::{EventType, Subscription};
pub use user::{Configuration, User};
