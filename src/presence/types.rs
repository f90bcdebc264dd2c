use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DiscordRpcError, Result};

/// Byte budget for state, details, text fields, party ids and secrets.
pub(crate) const MAX_TEXT_BYTES: usize = 128;
/// Byte budget for asset keys.
pub(crate) const MAX_ASSET_KEY_BYTES: usize = 32;

/// What the user is doing, as shown on their Discord profile.
///
/// All fields are optional; an empty record clears nothing by itself (a
/// `None` presence does). Field lengths are measured in bytes of the
/// whitespace-trimmed UTF-8 text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RichPresence {
    /// The user's current party status, e.g. "In a group".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// What the player is currently doing, e.g. "Competitive - Rank 7".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<PresenceTimestamps>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<PresenceAssets>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<PresenceParty>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<PresenceSecrets>,
}

impl RichPresence {
    /// Check the record against Discord's field budgets.
    ///
    /// Returns `Ok(())` when every field fits, [`DiscordRpcError::StringOutOfRange`]
    /// when a text field exceeds its byte budget, and
    /// [`DiscordRpcError::BadPresence`] for structural violations such as a
    /// party larger than its own maximum.
    pub fn validate(&self) -> Result {
        check_len("state", self.state.as_deref(), MAX_TEXT_BYTES)?;
        check_len("details", self.details.as_deref(), MAX_TEXT_BYTES)?;

        if let Some(assets) = &self.assets {
            check_len(
                "assets.large_image",
                assets.large_image.as_deref(),
                MAX_ASSET_KEY_BYTES,
            )?;
            check_len(
                "assets.small_image",
                assets.small_image.as_deref(),
                MAX_ASSET_KEY_BYTES,
            )?;
            check_len("assets.large_text", assets.large_text.as_deref(), MAX_TEXT_BYTES)?;
            check_len("assets.small_text", assets.small_text.as_deref(), MAX_TEXT_BYTES)?;
        }

        if let Some(party) = &self.party {
            check_len("party.id", party.id.as_deref(), MAX_TEXT_BYTES)?;
            if party.size < 1 {
                return Err(DiscordRpcError::BadPresence(
                    "party size must be at least 1".into(),
                ));
            }
            if party.max < party.size {
                return Err(DiscordRpcError::BadPresence(
                    "party size cannot exceed its maximum".into(),
                ));
            }
        }

        if let Some(secrets) = &self.secrets {
            check_len("secrets.join", secrets.join.as_deref(), MAX_TEXT_BYTES)?;
            check_len("secrets.spectate", secrets.spectate.as_deref(), MAX_TEXT_BYTES)?;
            check_len("secrets.match", secrets.match_secret.as_deref(), MAX_TEXT_BYTES)?;
        }

        Ok(())
    }

    /// Secrets without a party are legal but usually a mistake: Discord
    /// will not render join or spectate prompts for a partyless presence.
    pub fn has_secrets_without_party(&self) -> bool {
        self.secrets.is_some() && self.party.is_none()
    }

    /// Fold a server-echoed presence into this one.
    ///
    /// Scalar text fields are replaced; timestamps, party and secrets are
    /// replaced wholesale; assets go through [`PresenceAssets::merge`] so
    /// that server-assigned numeric image ids are adopted without losing
    /// the application's asset keys.
    pub fn merge(&mut self, other: &RichPresence) {
        self.state = other.state.clone();
        self.details = other.details.clone();
        self.timestamps = other.timestamps.clone();
        self.party = other.party.clone();
        self.secrets = other.secrets.clone();

        match (&mut self.assets, &other.assets) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (mine @ None, Some(theirs)) => {
                let mut adopted = PresenceAssets::default();
                adopted.merge(theirs);
                *mine = Some(adopted);
            }
            (mine, None) => *mine = None,
        }
    }
}

fn check_len(field: &'static str, value: Option<&str>, max: usize) -> Result {
    match value {
        Some(text) if text.trim().len() > max => {
            Err(DiscordRpcError::StringOutOfRange { field, max })
        }
        _ => Ok(()),
    }
}

/// Start and end instants, unsigned milliseconds since the Unix epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceTimestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

/// Artwork shown on the presence card.
///
/// `large_image_id` and `small_image_id` are assigned by the server when it
/// echoes a presence back: Discord resolves asset keys to numeric ids and
/// returns the id in the key slot. They never travel outbound.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,

    #[serde(skip)]
    pub large_image_id: Option<u64>,

    #[serde(skip)]
    pub small_image_id: Option<u64>,
}

impl PresenceAssets {
    /// Adopt a server echo. A key slot that parses as `u64` is the resolved
    /// numeric id: store it and keep the original key. Anything else
    /// replaces the key and clears the stale id.
    pub fn merge(&mut self, other: &PresenceAssets) {
        self.large_text = other.large_text.clone();
        self.small_text = other.small_text.clone();

        adopt_key(
            &mut self.large_image,
            &mut self.large_image_id,
            other.large_image.as_deref(),
        );
        adopt_key(
            &mut self.small_image,
            &mut self.small_image_id,
            other.small_image.as_deref(),
        );
    }
}

fn adopt_key(key: &mut Option<String>, id: &mut Option<u64>, echoed: Option<&str>) {
    match echoed {
        Some(value) => match value.parse::<u64>() {
            Ok(numeric) => *id = Some(numeric),
            Err(_) => {
                *key = Some(value.to_owned());
                *id = None;
            }
        },
        None => {
            *key = None;
            *id = None;
        }
    }
}

/// Party membership. Serialized as `{"id": ..., "size": [current, max]}`
/// with the pair coerced to `[max(1, size), max(size, max)]` so a
/// malformed count can never render as "3 of 2".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceParty {
    pub id: Option<String>,
    pub size: u32,
    pub max: u32,
}

#[derive(Serialize, Deserialize)]
struct PartyWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<[u32; 2]>,
}

impl Serialize for PresenceParty {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let current = self.size.max(1);
        let wire = PartyWire {
            id: self.id.clone(),
            size: Some([current, self.max.max(current)]),
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PresenceParty {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let wire = PartyWire::deserialize(deserializer)?;
        let [size, max] = wire.size.unwrap_or([0, 0]);
        if wire.id.is_none() && size == 0 && max == 0 {
            return Err(D::Error::custom("empty party"));
        }
        Ok(PresenceParty {
            id: wire.id,
            size,
            max,
        })
    }
}

/// Opaque tokens for join and spectate flows. Passed through to other
/// clients, never interpreted by Discord.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceSecrets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectate: Option<String>,

    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_secret: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_presence_passes_validation() {
        let presence = RichPresence {
            state: Some("In a group".into()),
            details: Some("Competitive".into()),
            assets: Some(PresenceAssets {
                large_image: Some("map_nexus".into()),
                large_text: Some("The Nexus".into()),
                ..PresenceAssets::default()
            }),
            party: Some(PresenceParty {
                id: Some("party-1".into()),
                size: 2,
                max: 5,
            }),
            ..RichPresence::default()
        };

        assert!(presence.validate().is_ok());
    }

    #[test]
    fn oversized_state_is_rejected() {
        let presence = RichPresence {
            state: Some("x".repeat(129)),
            ..RichPresence::default()
        };

        match presence.validate() {
            Err(DiscordRpcError::StringOutOfRange { field, max }) => {
                assert_eq!(field, "state");
                assert_eq!(max, 128);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn trimmed_text_within_budget_is_accepted() {
        let padded = format!("  {}  ", "y".repeat(128));
        let presence = RichPresence {
            details: Some(padded),
            ..RichPresence::default()
        };
        assert!(presence.validate().is_ok());
    }

    #[test]
    fn asset_key_budget_is_32_bytes() {
        let presence = RichPresence {
            assets: Some(PresenceAssets {
                large_image: Some("k".repeat(33)),
                ..PresenceAssets::default()
            }),
            ..RichPresence::default()
        };
        assert!(matches!(
            presence.validate(),
            Err(DiscordRpcError::StringOutOfRange {
                field: "assets.large_image",
                ..
            })
        ));
    }

    #[test]
    fn oversized_party_is_rejected() {
        let presence = RichPresence {
            party: Some(PresenceParty {
                id: Some("p".into()),
                size: 3,
                max: 2,
            }),
            ..RichPresence::default()
        };
        assert!(matches!(
            presence.validate(),
            Err(DiscordRpcError::BadPresence(_))
        ));
    }

    #[test]
    fn party_serialization_coerces_sizes() {
        let party = PresenceParty {
            id: Some("p".into()),
            size: 3,
            max: 2,
        };
        let json = serde_json::to_value(&party).unwrap();
        assert_eq!(json["size"], serde_json::json!([3, 3]));

        let zero = PresenceParty {
            id: Some("q".into()),
            size: 0,
            max: 4,
        };
        let json = serde_json::to_value(&zero).unwrap();
        assert_eq!(json["size"], serde_json::json!([1, 4]));
    }

    #[test]
    fn secrets_without_party_flagged_but_legal() {
        let presence = RichPresence {
            secrets: Some(PresenceSecrets {
                join: Some("j".into()),
                ..PresenceSecrets::default()
            }),
            ..RichPresence::default()
        };

        assert!(presence.has_secrets_without_party());
        assert!(presence.validate().is_ok());
    }

    #[test]
    fn clone_is_deep() {
        let mut original = RichPresence {
            state: Some("before".into()),
            party: Some(PresenceParty {
                id: Some("p".into()),
                size: 1,
                max: 2,
            }),
            ..RichPresence::default()
        };
        let snapshot = original.clone();

        original.state = Some("after".into());
        original.party.as_mut().unwrap().size = 2;

        assert_eq!(snapshot.state.as_deref(), Some("before"));
        assert_eq!(snapshot.party.as_ref().unwrap().size, 1);
    }

    #[test]
    fn merge_adopts_numeric_asset_ids() {
        let mut presence = RichPresence {
            assets: Some(PresenceAssets {
                large_image: Some("map_nexus".into()),
                large_text: Some("The Nexus".into()),
                ..PresenceAssets::default()
            }),
            ..RichPresence::default()
        };

        let echo = RichPresence {
            assets: Some(PresenceAssets {
                large_image: Some("8812334136".into()),
                large_text: Some("The Nexus".into()),
                ..PresenceAssets::default()
            }),
            ..RichPresence::default()
        };

        presence.merge(&echo);
        let assets = presence.assets.unwrap();
        assert_eq!(assets.large_image.as_deref(), Some("map_nexus"));
        assert_eq!(assets.large_image_id, Some(8812334136));
    }

    #[test]
    fn merge_replaces_non_numeric_asset_keys() {
        let mut presence = RichPresence {
            assets: Some(PresenceAssets {
                small_image: Some("old_key".into()),
                small_image_id: Some(42),
                ..PresenceAssets::default()
            }),
            ..RichPresence::default()
        };

        let echo = RichPresence {
            assets: Some(PresenceAssets {
                small_image: Some("new_key".into()),
                ..PresenceAssets::default()
            }),
            ..RichPresence::default()
        };

        presence.merge(&echo);
        let assets = presence.assets.unwrap();
        assert_eq!(assets.small_image.as_deref(), Some("new_key"));
        assert_eq!(assets.small_image_id, None);
    }

    #[test]
    fn merge_replaces_structured_fields_wholesale() {
        let mut presence = RichPresence {
            state: Some("old".into()),
            party: Some(PresenceParty {
                id: Some("p".into()),
                size: 1,
                max: 4,
            }),
            timestamps: Some(PresenceTimestamps {
                start: Some(1),
                end: None,
            }),
            ..RichPresence::default()
        };

        let echo = RichPresence {
            state: Some("new".into()),
            ..RichPresence::default()
        };

        presence.merge(&echo);
        assert_eq!(presence.state.as_deref(), Some("new"));
        assert!(presence.party.is_none());
        assert!(presence.timestamps.is_none());
    }

    #[test]
    fn presence_round_trips_through_json() {
        let presence = RichPresence {
            details: Some("Hello".into()),
            timestamps: Some(PresenceTimestamps {
                start: Some(1_507_665_886_000),
                end: Some(1_507_665_936_000),
            }),
            party: Some(PresenceParty {
                id: Some("party-9".into()),
                size: 1,
                max: 3,
            }),
            ..RichPresence::default()
        };

        let json = serde_json::to_string(&presence).unwrap();
        let back: RichPresence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, presence);
    }
}
