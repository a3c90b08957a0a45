//! What a channel connection receives, and the close codes it may be sent.

use crate::push::encoder::EncodedPayload;

/// Close codes (4000-range for application-level).
pub const CLOSE_AUTH_FAILED: u16 = 4004;
pub const CLOSE_TOKEN_EXPIRED: u16 = 4008;
pub const CLOSE_REPLACED: u16 = 4009;

/// Event delivered to a live connection's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A pushed payload to forward verbatim.
    Message(EncodedPayload),
    /// The channel token lapsed; the client has to open a new channel.
    TokenExpired,
}
