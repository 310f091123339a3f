//! Commit journal.
//!
//! Every successful save is one [`CommitRecord`] appended to the journal
//! and flushed before the in-memory table changes. Opening a store replays
//! the journal from the start.
//!
//! ## Frame format
//!
//! ```text
//! | magic (4) | version (2) | length (4) | CBOR payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery
//!
//! - a frame cut short at the end of the journal is dropped and the journal
//!   truncated to the last complete frame
//! - a complete frame with a bad checksum, magic or version aborts open

mod record;
mod writer;

pub use record::{compute_crc32, CommitRecord, JournalOp, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use writer::Journal;
