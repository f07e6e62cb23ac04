//! # groupchat-core
//!
//! Foundation types shared by every group chat crate:
//!
//! - **IDs**: `ChannelId`, `UserId`, `MessageId` integer newtypes and the
//!   string-branded `ConnectionId`
//! - **Frames**: `ResultFrame` acknowledgment/error frames sent to one client
//! - **Messages**: `PersistedMessage` with its embedded `AuthorSummary`
//! - **Validation**: size ceiling and wire schema checks for inbound frames
//! - **Errors**: `thiserror` enums whose `Display` output is the wire message
//! - **Collaborators**: `AuthVerifier`, `MembershipOracle`, `MessageStore`

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod frames;
pub mod ids;
pub mod message;
pub mod service;
pub mod validation;

pub use errors::{AuthError, FrameError, ServiceError, ValidationError};
pub use frames::ResultFrame;
pub use ids::{ChannelId, ConnectionId, MessageId, UserId};
pub use message::{AuthorSummary, NewMessage, PersistedMessage};
pub use service::{AuthVerifier, MembershipOracle, MessageStore};
