//! Process-wide reconciled presence state.
//!
//! Maps each caret structural hash to the set of participants currently
//! positioned there. The channel receive path is the single writer; any
//! number of readers (the correlation engine, inspection) may look up
//! concurrently and never observe a half-applied merge.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::protocol::PresenceSnapshot;

/// Reconciled hash → participants mapping for one session.
pub struct PresenceTable {
    local: String,
    state: RwLock<TableState>,
}

#[derive(Default)]
struct TableState {
    by_hash: HashMap<i64, HashSet<String>>,
    by_participant: HashMap<String, ParticipantEntry>,
}

struct ParticipantEntry {
    hashes: Vec<i64>,
    last_seen: Instant,
}

impl PresenceTable {
    /// New table for a session where we are `local`.
    ///
    /// The local identity is remembered so [`lookup`](Self::lookup) can
    /// exclude it: self-presence is not "another user editing here".
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            state: RwLock::new(TableState::default()),
        }
    }

    /// Our own identity.
    pub fn local_participant(&self) -> &str {
        &self.local
    }

    /// Replace everything the snapshot's participant contributed with the
    /// snapshot's caret hashes, all-or-nothing with respect to readers.
    ///
    /// A departure snapshot (no open files) simply clears the participant.
    pub fn merge(&self, snapshot: &PresenceSnapshot) {
        // Collect outside the lock; mutation below cannot fail midway.
        let mut hashes: Vec<i64> = snapshot.caret_hashes().collect();
        hashes.sort_unstable();
        hashes.dedup();

        let mut state = write_lock(&self.state);
        remove_participant(&mut state, &snapshot.participant);
        if snapshot.is_departure() {
            log::debug!("presence: {} departed", snapshot.participant);
            return;
        }
        for &hash in &hashes {
            state
                .by_hash
                .entry(hash)
                .or_default()
                .insert(snapshot.participant.clone());
        }
        state.by_participant.insert(
            snapshot.participant.clone(),
            ParticipantEntry {
                hashes,
                last_seen: Instant::now(),
            },
        );
    }

    /// Participants currently at `hash`, sorted, never including our own
    /// identity.
    pub fn lookup(&self, hash: i64) -> Vec<String> {
        let state = read_lock(&self.state);
        let Some(participants) = state.by_hash.get(&hash) else {
            return Vec::new();
        };
        let mut found: Vec<String> = participants
            .iter()
            .filter(|p| *p != &self.local)
            .cloned()
            .collect();
        found.sort_unstable();
        found
    }

    /// Drop one participant outright. Returns whether it was present.
    pub fn remove(&self, participant: &str) -> bool {
        let mut state = write_lock(&self.state);
        remove_participant(&mut state, participant)
    }

    /// Remove participants whose last merge is older than `max_age` and
    /// return their identities.
    ///
    /// The wire protocol has no heartbeat; this sweep is the host's tool
    /// for aging out a participant that vanished without a departure
    /// snapshot. Nothing is evicted unless the host calls it.
    pub fn evict_stale(&self, max_age: Duration) -> Vec<String> {
        let mut state = write_lock(&self.state);
        let stale: Vec<String> = state
            .by_participant
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > max_age)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            remove_participant(&mut state, id);
            log::info!("presence: evicted stale participant {id}");
        }
        stale
    }

    /// Identities with live entries, sorted.
    pub fn participants(&self) -> Vec<String> {
        let state = read_lock(&self.state);
        let mut ids: Vec<String> = state.by_participant.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of distinct structural hashes tracked.
    pub fn len(&self) -> usize {
        read_lock(&self.state).by_hash.len()
    }

    /// Whether no hash has any presence.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_participant(state: &mut TableState, participant: &str) -> bool {
    let Some(entry) = state.by_participant.remove(participant) else {
        return false;
    };
    for hash in entry.hashes {
        if let Some(set) = state.by_hash.get_mut(&hash) {
            set.remove(participant);
            if set.is_empty() {
                state.by_hash.remove(&hash);
            }
        }
    }
    true
}

// A panicked writer would poison the lock; presence data is advisory, so
// recover the guard rather than propagate the panic to every reader.
fn read_lock(lock: &RwLock<TableState>) -> std::sync::RwLockReadGuard<'_, TableState> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock(lock: &RwLock<TableState>) -> std::sync::RwLockWriteGuard<'_, TableState> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
