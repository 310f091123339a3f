//! Commit records and their on-disk frame.

use crate::error::{CoreError, CoreResult};
use crate::object::{ObjectId, StoredObject};
use crate::types::SequenceNumber;
use serde::{Deserialize, Serialize};

/// Magic bytes opening every frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"LBJR";

/// Current frame format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
pub(crate) const HEADER_SIZE: usize = 10;

pub(crate) const CRC_SIZE: usize = 4;

/// One change inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalOp {
    /// Insert or replace the whole object.
    Put(StoredObject),
    /// Remove the object.
    Delete(ObjectId),
}

impl JournalOp {
    /// The object this change touches.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        match self {
            Self::Put(object) => object.id,
            Self::Delete(id) => *id,
        }
    }
}

/// All changes of one successful save, applied atomically on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Sequence number assigned at commit.
    pub sequence: SequenceNumber,
    /// Changes in application order.
    pub ops: Vec<JournalOp>,
}

impl CommitRecord {
    /// Encodes the record into a framed byte buffer.
    ///
    /// ```text
    /// | magic (4) | version (2) | length (4) | CBOR payload (N) | crc32 (4) |
    /// ```
    ///
    /// The checksum covers every byte before it.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)
            .map_err(|e| CoreError::journal(format!("failed to encode commit: {e}")))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::journal("commit record too large"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Result of reading one frame from the front of a buffer.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A complete, verified record and the bytes it occupied.
    Record(CommitRecord, usize),
    /// The buffer ends inside the frame.
    Incomplete,
    /// The frame fails verification. `len` is the frame's declared length
    /// when the header could be read.
    Corrupt {
        reason: String,
        len: Option<usize>,
    },
}

/// Reads the frame at the start of `bytes`.
pub(crate) fn decode_frame(bytes: &[u8]) -> Frame {
    if bytes.len() < HEADER_SIZE {
        return Frame::Incomplete;
    }
    if bytes[0..4] != JOURNAL_MAGIC {
        return Frame::Corrupt {
            reason: "bad magic".into(),
            len: None,
        };
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != JOURNAL_VERSION {
        return Frame::Corrupt {
            reason: format!("unsupported version {version}"),
            len: None,
        };
    }
    let len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let total = HEADER_SIZE + len + CRC_SIZE;
    if bytes.len() < total {
        return Frame::Incomplete;
    }

    let body_end = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        bytes[body_end],
        bytes[body_end + 1],
        bytes[body_end + 2],
        bytes[body_end + 3],
    ]);
    let computed = compute_crc32(&bytes[..body_end]);
    if stored != computed {
        return Frame::Corrupt {
            reason: format!("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"),
            len: Some(total),
        };
    }

    match ciborium::from_reader::<CommitRecord, _>(&bytes[HEADER_SIZE..body_end]) {
        Ok(record) => Frame::Record(record, total),
        Err(e) => Frame::Corrupt {
            reason: format!("undecodable payload: {e}"),
            len: Some(total),
        },
    }
}

/// CRC-32 (IEEE).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}
