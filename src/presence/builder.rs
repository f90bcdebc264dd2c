use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{DiscordRpcError, Result};
use crate::presence::types::{
    PresenceAssets, PresenceParty, PresenceSecrets, PresenceTimestamps, RichPresence,
    MAX_ASSET_KEY_BYTES, MAX_TEXT_BYTES,
};

/// Builder for [`RichPresence`] records.
///
/// Text setters trim surrounding whitespace and enforce Discord's byte
/// budgets at assignment time, so a successfully built record is always
/// within bounds.
#[derive(Debug, Default)]
pub struct PresenceBuilder {
    presence: RichPresence,
}

impl PresenceBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the party status line, e.g. "In a group".
    pub fn state<S: Into<String>>(mut self, state: S) -> Result<Self> {
        self.presence.state = Some(bounded("state", state, MAX_TEXT_BYTES)?);
        Ok(self)
    }

    /// Set the detail line, e.g. "Competitive - Rank 7".
    pub fn details<S: Into<String>>(mut self, details: S) -> Result<Self> {
        self.presence.details = Some(bounded("details", details, MAX_TEXT_BYTES)?);
        Ok(self)
    }

    /// Set the start instant to the current system time.
    ///
    /// # Errors
    ///
    /// Fails with [`DiscordRpcError::BadPresence`] if the system clock is
    /// before the Unix epoch.
    pub fn start_timestamp_now(mut self) -> Result<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DiscordRpcError::BadPresence(format!("system clock before epoch: {e}")))?;
        self.timestamps().start = Some(now.as_millis() as u64);
        Ok(self)
    }

    /// Set the start instant, milliseconds since the Unix epoch.
    pub fn start_timestamp(mut self, millis: u64) -> Self {
        self.timestamps().start = Some(millis);
        self
    }

    /// Set the end instant, milliseconds since the Unix epoch.
    pub fn end_timestamp(mut self, millis: u64) -> Self {
        self.timestamps().end = Some(millis);
        self
    }

    /// Set the large artwork by asset key.
    pub fn large_image<S: Into<String>>(mut self, key: S) -> Result<Self> {
        self.assets().large_image =
            Some(bounded("assets.large_image", key, MAX_ASSET_KEY_BYTES)?);
        Ok(self)
    }

    /// Set the tooltip for the large artwork.
    pub fn large_text<S: Into<String>>(mut self, text: S) -> Result<Self> {
        self.assets().large_text = Some(bounded("assets.large_text", text, MAX_TEXT_BYTES)?);
        Ok(self)
    }

    /// Set the small corner artwork by asset key.
    pub fn small_image<S: Into<String>>(mut self, key: S) -> Result<Self> {
        self.assets().small_image =
            Some(bounded("assets.small_image", key, MAX_ASSET_KEY_BYTES)?);
        Ok(self)
    }

    /// Set the tooltip for the small artwork.
    pub fn small_text<S: Into<String>>(mut self, text: S) -> Result<Self> {
        self.assets().small_text = Some(bounded("assets.small_text", text, MAX_TEXT_BYTES)?);
        Ok(self)
    }

    /// Set party membership. `size` must be between 1 and `max`.
    pub fn party<S: Into<String>>(mut self, id: S, size: u32, max: u32) -> Result<Self> {
        if size < 1 {
            return Err(DiscordRpcError::BadPresence(
                "party size must be at least 1".into(),
            ));
        }
        if max < size {
            return Err(DiscordRpcError::BadPresence(
                "party size cannot exceed its maximum".into(),
            ));
        }
        self.presence.party = Some(PresenceParty {
            id: Some(bounded("party.id", id, MAX_TEXT_BYTES)?),
            size,
            max,
        });
        Ok(self)
    }

    /// Secret token handed to users who accept a join invite.
    pub fn join_secret<S: Into<String>>(mut self, secret: S) -> Result<Self> {
        self.secrets().join = Some(bounded("secrets.join", secret, MAX_TEXT_BYTES)?);
        Ok(self)
    }

    /// Secret token handed to spectators.
    pub fn spectate_secret<S: Into<String>>(mut self, secret: S) -> Result<Self> {
        self.secrets().spectate = Some(bounded("secrets.spectate", secret, MAX_TEXT_BYTES)?);
        Ok(self)
    }

    /// Secret identifying the match instance itself.
    pub fn match_secret<S: Into<String>>(mut self, secret: S) -> Result<Self> {
        self.secrets().match_secret = Some(bounded("secrets.match", secret, MAX_TEXT_BYTES)?);
        Ok(self)
    }

    /// Finish the record.
    pub fn build(self) -> RichPresence {
        self.presence
    }

    fn timestamps(&mut self) -> &mut PresenceTimestamps {
        self.presence
            .timestamps
            .get_or_insert_with(PresenceTimestamps::default)
    }

    fn assets(&mut self) -> &mut PresenceAssets {
        self.presence
            .assets
            .get_or_insert_with(PresenceAssets::default)
    }

    fn secrets(&mut self) -> &mut PresenceSecrets {
        self.presence
            .secrets
            .get_or_insert_with(PresenceSecrets::default)
    }
}

fn bounded<S: Into<String>>(field: &'static str, value: S, max: usize) -> Result<String> {
    let trimmed = value.into().trim().to_owned();
    if trimmed.len() > max {
        return Err(DiscordRpcError::StringOutOfRange { field, max });
    }
    Ok(trimmed)
}
