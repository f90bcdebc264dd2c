//! IPC wire protocol: frames, payload envelopes, and the pipe transport.

pub mod frame;
pub mod protocol;
pub mod transport;

pub use frame::Frame;
pub use protocol::{CommandKind, EventPayload, HandshakePayload, Opcode, ServerEvent};
pub use transport::{NativeTransport, Transport};
