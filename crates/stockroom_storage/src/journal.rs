//! Journal frame format.
//!
//! Every store mutation is one frame:
//!
//! ```text
//! +-------+-------------+-------------------+
//! | SRJ1  | len (u32le) | CBOR body (len B) |
//! +-------+-------------+-------------------+
//! ```
//!
//! Replay stops at the first incomplete frame, which is what a crash in
//! the middle of an append leaves behind. A complete frame with a bad
//! magic or an undecodable body is corruption.

use crate::error::{StorageError, StorageResult};
use crate::store::Document;
use serde::{Deserialize, Serialize};

/// Magic bytes at the start of every frame.
pub const FRAME_MAGIC: &[u8; 4] = b"SRJ1";

/// Size of the frame header (magic + length).
pub const HEADER_LEN: usize = 8;

/// A single logical mutation recorded in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    /// Insert or replace a whole document.
    Put {
        /// Table name.
        table: String,
        /// Row id.
        id: String,
        /// Full document.
        doc: Document,
    },
    /// Shallow-merge fields into an existing document.
    Patch {
        /// Table name.
        table: String,
        /// Row id.
        id: String,
        /// Fields to overwrite.
        fields: Document,
    },
    /// Remove a document.
    Delete {
        /// Table name.
        table: String,
        /// Row id.
        id: String,
    },
    /// Remove every document of a table.
    Clear {
        /// Table name.
        table: String,
    },
    /// Set a metadata slot.
    SetMeta {
        /// Slot key.
        key: String,
        /// Slot value.
        value: String,
    },
    /// Remove a metadata slot.
    RemoveMeta {
        /// Slot key.
        key: String,
    },
}

/// Encodes one entry as a complete frame.
pub fn encode_frame(entry: &JournalEntry) -> StorageResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(entry, &mut body).map_err(|e| StorageError::Encode(e.to_string()))?;

    let len = u32::try_from(body.len())
        .map_err(|_| StorageError::Encode(format!("frame body of {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(FRAME_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Result of replaying a journal.
#[derive(Debug, Default)]
pub struct Replay {
    /// Entries of every complete frame, in journal order.
    pub entries: Vec<JournalEntry>,
    /// Length of the journal prefix made of complete frames.
    pub valid_len: u64,
}

impl Replay {
    /// Returns true if bytes after the last complete frame were ignored.
    pub fn has_torn_tail(&self, journal_len: u64) -> bool {
        self.valid_len < journal_len
    }
}

/// Decodes every complete frame in `bytes`.
pub fn decode_frames(bytes: &[u8]) -> StorageResult<Replay> {
    let mut replay = Replay::default();
    let mut offset = 0usize;

    while bytes.len() - offset >= HEADER_LEN {
        let header = &bytes[offset..offset + HEADER_LEN];
        if &header[0..4] != FRAME_MAGIC {
            return Err(StorageError::corrupted(offset as u64, "bad frame magic"));
        }

        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let body_start = offset + HEADER_LEN;
        let Some(body) = bytes.get(body_start..body_start + len) else {
            break;
        };

        let entry: JournalEntry = ciborium::from_reader(body)
            .map_err(|e| StorageError::corrupted(offset as u64, e.to_string()))?;
        replay.entries.push(entry);

        offset = body_start + len;
        replay.valid_len = offset as u64;
    }

    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put(id: &str) -> JournalEntry {
        let doc = json!({ "id": id, "name": "Widget", "price": 12.5, "tags": ["a", "b"] });
        JournalEntry::Put {
            table: "products".into(),
            id: id.into(),
            doc: doc.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn frames_replay_in_order() {
        let mut bytes = encode_frame(&put("p1")).unwrap();
        bytes.extend(encode_frame(&JournalEntry::Delete {
            table: "products".into(),
            id: "p1".into(),
        })
        .unwrap());
        bytes.extend(
            encode_frame(&JournalEntry::SetMeta {
                key: "cursor".into(),
                value: "2024-01-01T00:00:00Z".into(),
            })
            .unwrap(),
        );

        let replay = decode_frames(&bytes).unwrap();
        assert_eq!(replay.entries.len(), 3);
        assert_eq!(replay.entries[0], put("p1"));
        assert_eq!(replay.valid_len, bytes.len() as u64);
        assert!(!replay.has_torn_tail(bytes.len() as u64));
    }

    #[test]
    fn torn_tail_is_ignored() {
        let first = encode_frame(&put("p1")).unwrap();
        let second = encode_frame(&put("p2")).unwrap();

        let mut bytes = first.clone();
        bytes.extend_from_slice(&second[..second.len() - 3]);

        let replay = decode_frames(&bytes).unwrap();
        assert_eq!(replay.entries.len(), 1);
        assert_eq!(replay.valid_len, first.len() as u64);
        assert!(replay.has_torn_tail(bytes.len() as u64));
    }

    #[test]
    fn short_header_is_torn_tail() {
        let mut bytes = encode_frame(&put("p1")).unwrap();
        bytes.extend_from_slice(b"SRJ");
        let replay = decode_frames(&bytes).unwrap();
        assert_eq!(replay.entries.len(), 1);
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = encode_frame(&put("p1")).unwrap();
        bytes.extend_from_slice(b"JUNKJUNKJUNK");
        let err = decode_frames(&bytes).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }
}
