//! Limits and fixed wire strings shared across crates.

/// Largest raw inbound payload accepted before JSON parsing (10 KiB).
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024;

/// Capacity of each connection's outbound mailbox.
pub const MAILBOX_CAPACITY: usize = 256;

/// Consecutive full-mailbox broadcasts tolerated before a connection is evicted.
pub const EVICTION_THRESHOLD: u32 = 5;

/// Acknowledgment text sent to the author of an accepted message.
pub const MESSAGE_SENT: &str = "Message sent successfully";
