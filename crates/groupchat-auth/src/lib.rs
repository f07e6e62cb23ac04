//! # groupchat-auth
//!
//! HS256 JWT implementation of [`AuthVerifier`](groupchat_core::AuthVerifier).
//!
//! Tokens carry a numeric `user_id` claim and an `exp` expiry. [`TokenIssuer`]
//! mints tokens with the same secret for tooling and tests.

#![deny(unsafe_code)]

mod claims;
mod verifier;

pub use claims::Claims;
pub use verifier::{IssueError, JwtVerifier, TokenIssuer};
