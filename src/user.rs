//! The Discord user and server configuration captured from `READY`.

use serde::{Deserialize, Deserializer, Serialize};

/// A Discord user, as delivered in `READY` and `ACTIVITY_JOIN_REQUEST`
/// payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Snowflake id. Discord serializes these as strings to survive
    /// JSON number precision limits.
    #[serde(deserialize_with = "snowflake", default)]
    pub id: u64,

    #[serde(default)]
    pub username: String,

    /// Legacy four-digit tag. Zero on the new username system.
    #[serde(deserialize_with = "numeric_string", default)]
    pub discriminator: u16,

    /// Avatar image hash, absent when the user has no custom avatar.
    #[serde(default)]
    pub avatar: Option<String>,
}

impl User {
    /// CDN URL of the user's avatar, if one is set.
    pub fn avatar_url(&self, config: &Configuration) -> Option<String> {
        let hash = self.avatar.as_deref()?;
        let host = config.cdn_host.as_deref().unwrap_or("cdn.discordapp.com");
        Some(format!("https://{host}/avatars/{}/{hash}.png", self.id))
    }
}

/// Endpoint configuration handed out by the server during `READY`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    #[serde(default)]
    pub cdn_host: Option<String>,

    #[serde(default)]
    pub api_endpoint: Option<String>,

    #[serde(default)]
    pub environment: Option<String>,
}

fn snowflake<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn numeric_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u16),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_deserializes_string_snowflake() {
        let user: User = serde_json::from_str(
            r#"{"id":"81","username":"wumpus","discriminator":"0007","avatar":"abc123"}"#,
        )
        .expect("valid user");

        assert_eq!(user.id, 81);
        assert_eq!(user.username, "wumpus");
        assert_eq!(user.discriminator, 7);
        assert_eq!(user.avatar.as_deref(), Some("abc123"));
    }

    #[test]
    fn user_tolerates_numeric_fields_and_extras() {
        let user: User = serde_json::from_str(
            r#"{"id":81,"username":"wumpus","discriminator":0,"flags":64,"premium_type":1}"#,
        )
        .expect("unknown fields ignored");

        assert_eq!(user.id, 81);
        assert_eq!(user.discriminator, 0);
        assert!(user.avatar.is_none());
    }

    #[test]
    fn avatar_url_uses_config_cdn_host() {
        let user = User {
            id: 81,
            username: "wumpus".into(),
            discriminator: 0,
            avatar: Some("abc".into()),
        };
        let config = Configuration {
            cdn_host: Some("cdn.discordapp.com".into()),
            ..Configuration::default()
        };

        assert_eq!(
            user.avatar_url(&config).as_deref(),
            Some("https://cdn.discordapp.com/avatars/81/abc.png")
        );

        let no_avatar = User {
            avatar: None,
            ..user
        };
        assert!(no_avatar.avatar_url(&config).is_none());
    }
}
