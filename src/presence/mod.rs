//! The Rich Presence record and its builder.

mod builder;
mod types;

pub use builder::PresenceBuilder;
pub use types::{
    PresenceAssets, PresenceParty, PresenceSecrets, PresenceTimestamps, RichPresence,
};
