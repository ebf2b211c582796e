//! # asknow-directory
//!
//! The two lookups the realtime server needs from the rest of AskNow:
//!
//! - [`IdentityResolver`]: user id to role, consulted during the handshake
//! - [`PendingItems`]: unclaimed questions, replayed to tutors on connect
//!
//! [`SqliteDirectory`] reads the AskNow backend database directly.
//! [`InMemoryDirectory`] backs tests and database-less runs.

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use errors::{DirectoryError, Result};
pub use memory::InMemoryDirectory;
pub use sqlite::{ConnectionPool, SqliteDirectory, new_file_pool};
pub use traits::{Identity, IdentityResolver, PendingItem, PendingItems, sort_pending};
