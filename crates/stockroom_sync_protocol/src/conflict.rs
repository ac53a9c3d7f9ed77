//! Conflict resolution.
//!
//! Resolution is whole-record and decided by the version counter alone.
//! Timestamps never arbitrate because device clocks may be skewed.

use crate::entity::EntityRecord;

/// Which replica's copy of a record survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// Keep the local row untouched.
    Local,
    /// Overwrite the local row with the remote one.
    Remote,
}

/// Decides between the local row (if any) and a pulled remote row.
///
/// The remote wins iff there is no local row or its version is strictly
/// higher. A tie keeps the local copy.
pub fn resolve(local: Option<&EntityRecord>, remote: &EntityRecord) -> Winner {
    match local {
        Some(local) if local.version >= remote.version => Winner::Local,
        _ => Winner::Remote,
    }
}
