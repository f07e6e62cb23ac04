//! # groupchat-store
//!
//! SQLite persistence behind the chat core.
//!
//! - [`Database`]: shared connection wrapper, schema bootstrap
//! - Repositories: [`UserRepo`], [`ChannelRepo`], [`MembershipRepo`], [`MessageRepo`]
//! - [`ChatService`]: implements `MembershipOracle` and `MessageStore` on top of
//!   the repositories, running blocking SQLite work off the async runtime

#![deny(unsafe_code)]

pub mod channels;
pub mod chat;
pub mod database;
pub mod error;
pub mod memberships;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod users;

pub use channels::{ChannelRepo, ChannelRow, NewChannel};
pub use chat::ChatService;
pub use database::Database;
pub use error::StoreError;
pub use memberships::MembershipRepo;
pub use messages::{MessageRepo, MessageRow};
pub use users::{NewUser, UserRepo, UserRow};
