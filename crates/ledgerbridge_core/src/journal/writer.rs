//! Journal appends and recovery.

use crate::error::{CoreError, CoreResult};
use crate::journal::record::{decode_frame, CommitRecord, Frame};
use ledgerbridge_storage::StorageBackend;
use tracing::{debug, error, warn};

/// Append-only log of commit records over a storage backend.
///
/// Not internally synchronized; the coordinator owns it behind its commit
/// lock.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl Journal {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    /// Appends one commit and makes it durable.
    ///
    /// Either the whole frame is in the journal when this returns `Ok`, or
    /// the journal is cut back to its previous length.
    ///
    /// # Errors
    ///
    /// Returns the encode, append, flush or sync failure.
    pub fn append(&mut self, record: &CommitRecord) -> CoreResult<()> {
        let frame = record.encode()?;
        let before = self.backend.size()?;

        if let Err(err) = self.write_frame(&frame) {
            if let Err(undo) = self.backend.truncate(before) {
                error!(
                    sequence = %record.sequence,
                    error = %undo,
                    "failed to cut journal back after a failed append"
                );
            }
            return Err(err);
        }

        debug!(sequence = %record.sequence, bytes = frame.len(), "journal append");
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> CoreResult<()> {
        self.backend.append(frame)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Reads every complete commit in order.
    ///
    /// A partially written or damaged final frame is a crash during append:
    /// it is logged and cut off. A damaged frame followed by more data is
    /// corruption and fails recovery.
    ///
    /// # Errors
    ///
    /// Returns `Journal` for corrupt frames, or the backend error.
    pub fn replay(&mut self) -> CoreResult<Vec<CommitRecord>> {
        let bytes = self.backend.read_all()?;
        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            match decode_frame(&bytes[offset..]) {
                Frame::Record(record, used) => {
                    records.push(record);
                    offset += used;
                }
                Frame::Incomplete => {
                    warn!(
                        offset,
                        discarded = bytes.len() - offset,
                        "dropping torn journal tail"
                    );
                    self.backend.truncate(offset as u64)?;
                    break;
                }
                Frame::Corrupt { reason, len } if len == Some(bytes.len() - offset) => {
                    warn!(offset, %reason, "dropping damaged final journal frame");
                    self.backend.truncate(offset as u64)?;
                    break;
                }
                Frame::Corrupt { reason, .. } => {
                    return Err(CoreError::journal(format!(
                        "corrupt frame at offset {offset}: {reason}"
                    )));
                }
            }
        }

        Ok(records)
    }

    /// Forces journal bytes to stable storage.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Current journal length in bytes.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalOp;
    use crate::object::{ObjectId, StoredObject};
    use crate::types::SequenceNumber;
    use ledgerbridge_storage::InMemoryBackend;

    fn commit(seq: u64) -> CommitRecord {
        CommitRecord {
            sequence: SequenceNumber::new(seq),
            ops: vec![JournalOp::Put(StoredObject::new(
                ObjectId::new(),
                "Account",
                seq,
            ))],
        }
    }

    #[test]
    fn append_then_replay() {
        let mut journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        journal.append(&commit(1)).unwrap();
        journal.append(&commit(2)).unwrap();

        let records = journal.replay().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sequence, SequenceNumber::new(2));
    }

    #[test]
    fn torn_tail_is_dropped() {
        let first = commit(1).encode().unwrap();
        let second = commit(2).encode().unwrap();
        let mut bytes = first.clone();
        bytes.extend_from_slice(&second[..second.len() / 2]);

        let mut journal = Journal::new(Box::new(InMemoryBackend::with_data(bytes)), false);
        let records = journal.replay().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(journal.size().unwrap(), first.len() as u64);
    }

    #[test]
    fn damaged_final_frame_is_dropped() {
        let first = commit(1).encode().unwrap();
        let mut bytes = first.clone();
        let mut second = commit(2).encode().unwrap();
        second[12] ^= 0xFF;
        bytes.extend_from_slice(&second);

        let mut journal = Journal::new(Box::new(InMemoryBackend::with_data(bytes)), false);
        assert_eq!(journal.replay().unwrap().len(), 1);
        assert_eq!(journal.size().unwrap(), first.len() as u64);
    }

    #[test]
    fn damage_before_the_tail_fails_replay() {
        let mut bytes = commit(1).encode().unwrap();
        bytes[12] ^= 0xFF;
        bytes.extend_from_slice(&commit(2).encode().unwrap());
        let mut journal = Journal::new(Box::new(InMemoryBackend::with_data(bytes)), false);
        assert!(matches!(journal.replay(), Err(CoreError::Journal { .. })));
    }
}
