//! Error types for the chat core.
//!
//! Every client-facing variant's `Display` output is the exact text carried in
//! the `message` field of a `{"success": false}` result frame, so handlers can
//! forward `err.to_string()` without re-mapping.

use thiserror::Error;

/// Schema violation in an inbound message body.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// `type` is absent or not a string.
    #[error("message body must have a 'type' field")]
    MissingType,

    /// `type` is a string but not a recognised literal.
    #[error("unsupported message type")]
    UnsupportedType,

    /// `type = text` without a non-empty string `content`.
    #[error("text messages must have a non-empty 'content' field")]
    InvalidText,

    /// `type = file` missing one of its required fields.
    #[error(
        "file messages must have non-empty 'file_id', 'filename', 'mime_type', 'url', and 'size_in_bytes' fields"
    )]
    InvalidFile,
}

/// Why a raw inbound frame was rejected before reaching the store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Raw payload exceeds the size ceiling; never parsed.
    #[error("message size exceeds limit")]
    TooLarge {
        /// Payload length in bytes.
        len: usize,
        /// Configured ceiling in bytes.
        limit: usize,
    },

    /// Payload is not a JSON object.
    #[error("invalid message body JSON")]
    InvalidJson,

    /// Payload parsed but failed schema validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Credential verification failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credential supplied in the handshake.
    #[error("token is required")]
    MissingToken,

    /// Credential was well formed but its expiry has passed.
    #[error("token has expired")]
    Expired,

    /// Signature, algorithm or encoding is wrong.
    #[error("invalid token")]
    Invalid {
        /// Underlying reason, for logs only.
        reason: String,
    },

    /// Token payload has no usable numeric `user_id` claim.
    #[error("invalid user_id in token")]
    InvalidUserId,
}

/// Failure reported by a collaborator (membership lookup or persistence).
///
/// Display strings are deliberately generic; the detail is logged where the
/// failure happens and kept here for diagnostics.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Membership lookup failed.
    #[error("error checking user membership")]
    Membership {
        /// Underlying cause.
        detail: String,
    },

    /// Author profile lookup failed.
    #[error("error fetching user by id")]
    FetchUser {
        /// Underlying cause.
        detail: String,
    },

    /// Message insert failed.
    #[error("error inserting message")]
    InsertMessage {
        /// Underlying cause.
        detail: String,
    },
}

impl ServiceError {
    /// Underlying cause, for logs.
    pub fn detail(&self) -> &str {
        match self {
            Self::Membership { detail }
            | Self::FetchUser { detail }
            | Self::InsertMessage { detail } => detail,
        }
    }
}

/// A request path segment that is not a non-negative integer.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("invalid channel id")]
pub struct InvalidChannelId;
