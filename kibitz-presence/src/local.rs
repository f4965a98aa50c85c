//! Local participant state and snapshot production.
//!
//! Tracks which files the local participant has open and where their
//! carets sit, and packages that into full-state [`PresenceSnapshot`]s for
//! broadcast. Caret movement is high-frequency, so caret-driven snapshots
//! are throttled; open/close events always broadcast immediately.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::protocol::{OpenFile, PresenceSnapshot};

/// Minimum gap between caret-driven snapshots.
const CARET_BROADCAST_INTERVAL: Duration = Duration::from_millis(200);

/// The local participant's open-file/caret state.
pub struct LocalPresence {
    participant: String,
    open_files: Vec<OpenFile>,
    caret_interval: Duration,
    last_caret_broadcast: Instant,
}

impl LocalPresence {
    /// State for a named participant.
    pub fn new(participant: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            open_files: Vec::new(),
            caret_interval: CARET_BROADCAST_INTERVAL,
            // Allow an immediate first caret broadcast.
            last_caret_broadcast: Instant::now() - Duration::from_secs(1),
        }
    }

    /// State under a freshly generated anonymous identity.
    pub fn anonymous() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Custom caret throttle interval (for testing).
    pub fn with_interval(participant: impl Into<String>, interval: Duration) -> Self {
        let mut state = Self::new(participant);
        state.caret_interval = interval;
        state
    }

    /// Our identity as it appears on the wire.
    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// Paths currently reported open, in report order.
    pub fn open_paths(&self) -> Vec<&str> {
        self.open_files
            .iter()
            .map(|f| f.path_or_hash.as_str())
            .collect()
    }

    /// Record a file opening. Always returns a snapshot to broadcast.
    pub fn file_opened(&mut self, path: impl Into<String>) -> PresenceSnapshot {
        let path = path.into();
        if !self.open_files.iter().any(|f| f.path_or_hash == path) {
            self.open_files.push(OpenFile::new(path));
        }
        self.snapshot()
    }

    /// Record a file closing. Always returns a snapshot to broadcast.
    pub fn file_closed(&mut self, path: &str) -> PresenceSnapshot {
        self.open_files.retain(|f| f.path_or_hash != path);
        self.snapshot()
    }

    /// Record caret movement in `path`.
    ///
    /// The state is updated unconditionally, but a snapshot is only
    /// returned when the throttle interval has elapsed — `None` means
    /// "don't broadcast yet". A caret in a file not yet reported open
    /// opens it implicitly.
    pub fn caret_moved(&mut self, path: &str, caret_hashes: Vec<i64>) -> Option<PresenceSnapshot> {
        match self.open_files.iter_mut().find(|f| f.path_or_hash == path) {
            Some(file) => file.caret_hashes = caret_hashes,
            None => self
                .open_files
                .push(OpenFile::with_carets(path, caret_hashes)),
        }

        if self.last_caret_broadcast.elapsed() < self.caret_interval {
            return None;
        }
        self.last_caret_broadcast = Instant::now();
        Some(self.snapshot())
    }

    /// Full-state snapshot of the current open files, bypassing the caret
    /// throttle.
    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot::with_files(self.participant.clone(), self.open_files.clone())
    }

    /// The empty snapshot peers merge to clear our entries.
    pub fn departure(&self) -> PresenceSnapshot {
        PresenceSnapshot::new(self.participant.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_close_track_paths() {
        let mut local = LocalPresence::new("alice");
        let snap = local.file_opened("src/lib.rs");
        assert_eq!(snap.open_files.len(), 1);

        local.file_opened("src/main.rs");
        assert_eq!(local.open_paths(), vec!["src/lib.rs", "src/main.rs"]);

        let snap = local.file_closed("src/lib.rs");
        assert_eq!(snap.open_files.len(), 1);
        assert_eq!(snap.open_files[0].path_or_hash, "src/main.rs");
    }

    #[test]
    fn test_reopening_is_idempotent() {
        let mut local = LocalPresence::new("alice");
        local.file_opened("a.rs");
        local.file_opened("a.rs");
        assert_eq!(local.open_paths(), vec!["a.rs"]);
    }

    #[test]
    fn test_caret_throttled() {
        let mut local = LocalPresence::with_interval("alice", Duration::from_millis(50));

        // First move goes out immediately.
        let first = local.caret_moved("a.rs", vec![1]);
        assert!(first.is_some());

        // Immediate follow-up is throttled but still recorded.
        let second = local.caret_moved("a.rs", vec![2]);
        assert!(second.is_none());
        assert_eq!(local.snapshot().open_files[0].caret_hashes, vec![2]);
    }

    #[test]
    fn test_caret_after_interval_broadcasts() {
        let mut local = LocalPresence::with_interval("alice", Duration::from_millis(5));
        let _ = local.caret_moved("a.rs", vec![1]);
        std::thread::sleep(Duration::from_millis(10));
        assert!(local.caret_moved("a.rs", vec![2]).is_some());
    }

    #[test]
    fn test_open_close_bypass_throttle() {
        let mut local = LocalPresence::with_interval("alice", Duration::from_secs(60));
        let _ = local.caret_moved("a.rs", vec![1]);
        // Open/close events are never suppressed.
        let snap = local.file_opened("b.rs");
        assert_eq!(snap.open_files.len(), 2);
    }

    #[test]
    fn test_caret_in_unopened_file_opens_it() {
        let mut local = LocalPresence::new("alice");
        let snap = local.caret_moved("implicit.rs", vec![9]).expect("first move");
        assert_eq!(snap.open_files[0].path_or_hash, "implicit.rs");
        assert_eq!(snap.open_files[0].caret_hashes, vec![9]);
    }

    #[test]
    fn test_departure_is_empty() {
        let mut local = LocalPresence::new("alice");
        local.file_opened("a.rs");
        let departure = local.departure();
        assert!(departure.is_departure());
        assert_eq!(departure.participant, "alice");
    }

    #[test]
    fn test_anonymous_identities_differ() {
        let one = LocalPresence::anonymous();
        let two = LocalPresence::anonymous();
        assert_ne!(one.participant(), two.participant());
    }
}
