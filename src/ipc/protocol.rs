//! Wire-level protocol vocabulary: opcodes, command and event tags, and
//! the JSON envelope shapes that ride inside `Frame` opcode payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DiscordRpcError;

/// Frame discriminator on the pipe.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl TryFrom<u32> for Opcode {
    type Error = DiscordRpcError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(DiscordRpcError::Protocol(format!(
                "invalid opcode value: {other}"
            ))),
        }
    }
}

impl From<Opcode> for u32 {
    fn from(opcode: Opcode) -> Self {
        opcode as u32
    }
}

/// Command tags accepted by the Discord client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Dispatch,
    Subscribe,
    Unsubscribe,
    SetActivity,
    SendActivityJoinInvite,
    CloseActivityJoinRequest,
    /// Forward-compatibility catch-all; never sent.
    #[serde(other)]
    Unknown,
}

/// Event tags Discord dispatches or acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    Ready,
    Error,
    ActivityJoin,
    ActivitySpectate,
    ActivityJoinRequest,
    /// Forward-compatibility catch-all; never sent.
    #[serde(other)]
    Unknown,
}

/// Outbound argument envelope: `{cmd, nonce, evt?, args?}`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandPayload {
    pub cmd: CommandKind,
    pub nonce: String,
    /// Only un/subscribe commands name an event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evt: Option<ServerEvent>,
    /// Arguments for every command other than un/subscribe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

/// Inbound event envelope: `{cmd?, evt?, data?, nonce?}`. Unknown fields
/// are ignored so additive protocol changes do not break decoding.
#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub cmd: Option<CommandKind>,
    #[serde(default)]
    pub evt: Option<ServerEvent>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// First frame on a fresh pipe: `{"v":1,"client_id":"..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub v: u32,
    pub client_id: String,
}

/// Payload of an opcode=Close frame, in either direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClosePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// Discord uses `message`; we send `reason` alongside our pid so the
    /// server can reap the presence.
    #[serde(default, alias = "reason", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// `data` of a `DISPATCH`/`READY` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadyData {
    #[serde(default)]
    pub v: u32,
    #[serde(default)]
    pub config: crate::user::Configuration,
    #[serde(default)]
    pub user: Option<crate::user::User>,
}

/// `data` of an `ERROR` event or error acknowledgement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// `data` of `ACTIVITY_JOIN` and `ACTIVITY_SPECTATE` events.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretData {
    pub secret: String,
}

/// `data` of an `ACTIVITY_JOIN_REQUEST` event.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequestData {
    pub user: crate::user::User,
}

/// Protocol constants.
pub mod constants {
    /// IPC protocol version carried in the handshake.
    pub const IPC_VERSION: u32 = 1;

    /// Discord numbers its pipes `discord-ipc-0` through `discord-ipc-9`;
    /// one per running client instance (stable, PTB, canary).
    pub const PIPE_COUNT: i32 = 10;

    /// Pipe name prefix shared by every platform.
    pub const PIPE_PREFIX: &str = "discord-ipc-";

    /// Frame header: 4-byte opcode then 4-byte length, both little-endian.
    pub const FRAME_HEADER_SIZE: usize = 8;

    /// Largest inbound payload we accept. Real Rich Presence traffic stays
    /// under 1 KiB; anything bigger than this is a corrupt or hostile peer.
    pub const MAX_INBOUND_PAYLOAD: u32 = 16 * 1024;

    /// How long an unacknowledged nonce stays in the correlation map.
    pub const NONCE_TTL_SECS: u64 = 30;
}
