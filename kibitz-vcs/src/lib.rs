//! # kibitz-vcs — Version-control introspection for presence
//!
//! Answers two questions about a file in the local working copy:
//!
//! 1. Is it "in motion" — edited locally, or committed but diverged from
//!    the branch teammates track? ([`repo::GitAdapter::classify`])
//! 2. Which lines moved? ([`repo::GitAdapter::diff_against_head`], built on
//!    the patch scanner in [`diff`])
//!
//! ```text
//! file path
//!    │
//!    ▼
//! GitAdapter::locate ──► repo root + relative path   (None = not in a repo)
//!    │
//!    ├─► classify ──────► RepoDocInfo { being_edited, remote, … }
//!    │
//!    └─► diff_against_head ──► patch text ──► diff::parse_patch ──► LineDiff
//! ```
//!
//! "Not in a repository", "ignored", and "no change" are ordinary `None`
//! outcomes, never errors: a missing repo must not break an editing
//! session. Internal git failures degrade the same way, with a debug log.

pub mod diff;
pub mod repo;

pub use diff::{parse_patch, LineDiff};
pub use repo::{DiffBase, GitAdapter, RepoDocInfo};

/// Common result type for the crate's internal fallible paths.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by repository introspection.
///
/// These stay internal to the crate's plumbing: the public adapter
/// operations convert them into `None` ("no information available") so a
/// broken repository never interrupts editing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying libgit2 operation failed.
    #[error("git error: {source}")]
    Git {
        #[from]
        source: git2::Error,
    },
    /// Repository has no working tree to resolve paths against.
    #[error("repository at {path} is bare and unsupported")]
    BareRepository {
        /// Path of the repository lacking a working tree.
        path: String,
    },
    /// Filesystem interaction failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Filesystem path involved in the failed operation.
        path: String,
        /// Source I/O error.
        #[source]
        source: std::io::Error,
    },
}
