//! Versioned binary wire format for presence snapshots.
//!
//! Wire layout:
//! ```text
//! ┌─────────┬──────────────────────────────────────────────┐
//! │ version │ bincode body                                 │
//! │ 1 byte  │ participant, open_files[{path, carets[i64]}] │
//! └─────────┴──────────────────────────────────────────────┘
//! ```
//!
//! A snapshot is a participant's complete state — each broadcast fully
//! replaces the previous one, so delivery order across participants does
//! not matter. Bytes trailing a successfully decoded body are ignored so a
//! newer writer can append fields without breaking older readers.

use serde::{Deserialize, Serialize};

/// Well-known logical channel all participants in a session share.
pub const PRESENCE_CHANNEL: &str = "kibitz.presence";

/// Current wire format tag. Decoders reject anything else.
pub const WIRE_VERSION: u8 = 1;

/// One open file in a participant's snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFile {
    /// Repo-relative path, or an opaque digest of it for sessions that
    /// don't share paths in the clear.
    pub path_or_hash: String,
    /// Structural hashes of the caret positions in this file.
    pub caret_hashes: Vec<i64>,
}

impl OpenFile {
    /// Open file with no caret information yet.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path_or_hash: path.into(),
            caret_hashes: Vec::new(),
        }
    }

    /// Open file with caret structural hashes.
    pub fn with_carets(path: impl Into<String>, caret_hashes: Vec<i64>) -> Self {
        Self {
            path_or_hash: path.into(),
            caret_hashes,
        }
    }

    /// Open file identified by a stable digest of its path instead of the
    /// path itself.
    pub fn obscured(path: &str) -> Self {
        use std::hash::{Hash, Hasher};
        // DefaultHasher::new() is keyed with constants, so the digest is
        // stable across processes and participants.
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        path.hash(&mut hasher);
        Self {
            path_or_hash: format!("#{:016x}", hasher.finish()),
            caret_hashes: Vec::new(),
        }
    }
}

/// A participant's complete, replace-in-full presence report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Opaque participant identity.
    pub participant: String,
    /// Open files in the order the participant reports them.
    pub open_files: Vec<OpenFile>,
}

impl PresenceSnapshot {
    /// Empty snapshot for a participant.
    pub fn new(participant: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            open_files: Vec::new(),
        }
    }

    /// Snapshot with open-file state.
    pub fn with_files(participant: impl Into<String>, open_files: Vec<OpenFile>) -> Self {
        Self {
            participant: participant.into(),
            open_files,
        }
    }

    /// An empty snapshot announces departure: merging it clears every
    /// entry the participant contributed.
    pub fn is_departure(&self) -> bool {
        self.open_files.is_empty()
    }

    /// All caret structural hashes across open files, in report order.
    pub fn caret_hashes(&self) -> impl Iterator<Item = i64> + '_ {
        self.open_files
            .iter()
            .flat_map(|file| file.caret_hashes.iter().copied())
    }

    /// Serialize to the versioned binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, MalformedSnapshot> {
        let body = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| MalformedSnapshot::Unencodable(e.to_string()))?;
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(WIRE_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Deserialize from the wire format.
    ///
    /// Bytes past the decoded body are ignored; an empty buffer, an
    /// unknown version tag, or a body that does not decode fail with
    /// [`MalformedSnapshot`].
    pub fn decode(bytes: &[u8]) -> Result<Self, MalformedSnapshot> {
        let Some((&version, body)) = bytes.split_first() else {
            return Err(MalformedSnapshot::Truncated);
        };
        if version != WIRE_VERSION {
            return Err(MalformedSnapshot::UnknownVersion(version));
        }
        let (snapshot, _read) =
            bincode::serde::decode_from_slice(body, bincode::config::standard())
                .map_err(|e| MalformedSnapshot::Undecodable(e.to_string()))?;
        Ok(snapshot)
    }
}

/// A snapshot that could not be encoded or decoded.
///
/// Receive paths log and drop these; one bad message never terminates a
/// subscription or touches other participants' state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedSnapshot {
    /// Buffer too short to carry even the version tag.
    Truncated,
    /// Version tag this reader does not understand.
    UnknownVersion(u8),
    /// Body bytes did not match the schema.
    Undecodable(String),
    /// Local snapshot failed to serialize.
    Unencodable(String),
}

impl std::fmt::Display for MalformedSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "snapshot buffer truncated"),
            Self::UnknownVersion(v) => write!(f, "unknown snapshot wire version {v}"),
            Self::Undecodable(e) => write!(f, "snapshot body did not decode: {e}"),
            Self::Unencodable(e) => write!(f, "snapshot did not encode: {e}"),
        }
    }
}

impl std::error::Error for MalformedSnapshot {}
