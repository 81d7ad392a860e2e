// Persistence layer: users, dps, collisions (spec §6), backed by sled.
//
// The teacher's `BlockchainDB`/`UtxoSet` pattern — one sled tree per
// logical table, `String`-mapped errors at the leaf, a thin typed layer
// above it — is reused directly; only the schema changes.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sled::Db;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpRecord {
    pub start: Vec<u8>,
    pub username: String,
    pub received_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionRecord {
    pub start_a: Vec<u8>,
    pub start_b: Vec<u8>,
    pub detected_at: i64,
}

/// Outcome of attempting to insert one `(start, dp)` record, per the
/// per-DP-key state machine in spec §4.2: `absent -> stored -> collided`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum InsertOutcome {
    /// `dp` was not present; the record was stored.
    Inserted,
    /// `dp` was present with an identical `start`; no-op.
    DuplicateNoop,
    /// `dp` was present with a different `start`; a `Collision` row was
    /// created (or already existed from an earlier pair on this `dp`).
    Collision { start_a: Vec<u8>, start_b: Vec<u8> },
}

pub struct Store {
    db: Db,
    users: sled::Tree,
    dps: sled::Tree,
    collisions: sled::Tree,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| format!("Failed to open database: {}", e))?;
        Self::from_db(db)
    }

    pub fn memory() -> Result<Self, String> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| format!("Failed to create memory db: {}", e))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, String> {
        let users = db
            .open_tree("users")
            .map_err(|e| format!("Failed to open users tree: {}", e))?;
        let dps = db
            .open_tree("dps")
            .map_err(|e| format!("Failed to open dps tree: {}", e))?;
        let collisions = db
            .open_tree("collisions")
            .map_err(|e| format!("Failed to open collisions tree: {}", e))?;
        Ok(Self {
            db,
            users,
            dps,
            collisions,
        })
    }

    pub fn flush(&self) -> Result<(), String> {
        self.db.flush().map_err(|e| format!("Failed to flush: {}", e))?;
        Ok(())
    }

    // ── users ──────────────────────────────────────────────────────────

    /// Register a new user with a random bearer token, returning the
    /// plaintext token (shown to the operator once, never stored).
    pub fn create_user(&self, username: &str) -> Result<String, String> {
        let token = uuid::Uuid::new_v4().to_string();
        let token_hash = hash_token(&token);
        self.users
            .insert(username.as_bytes(), token_hash.as_slice())
            .map_err(|e| format!("Failed to store user: {}", e))?;
        self.db.flush().map_err(|e| format!("Failed to flush: {}", e))?;
        Ok(token)
    }

    /// Authenticate `(username, token)` against the user store.
    pub fn authenticate(&self, username: &str, token: &str) -> Result<bool, CoreError> {
        let stored = self
            .users
            .get(username.as_bytes())
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        match stored {
            Some(stored_hash) => Ok(stored_hash.as_ref() == hash_token(token).as_slice()),
            None => Ok(false),
        }
    }

    // ── dps / collisions ──────────────────────────────────────────────

    /// Attempt to insert one `(start, dp)` submission, atomically
    /// resolving to the state machine in spec §4.2 via sled's
    /// compare-and-swap. `now` is the submission timestamp (unix seconds).
    pub fn submit_dp(
        &self,
        start: &[u8],
        dp: &[u8],
        username: &str,
        now: i64,
    ) -> Result<InsertOutcome, CoreError> {
        let record = DpRecord {
            start: start.to_vec(),
            username: username.to_string(),
            received_at: now,
        };
        let encoded =
            serde_json::to_vec(&record).map_err(|e| CoreError::Transient(e.to_string()))?;

        loop {
            let existing = self
                .dps
                .get(dp)
                .map_err(|e| CoreError::Transient(e.to_string()))?;

            match existing {
                None => {
                    let cas = self
                        .dps
                        .compare_and_swap(dp, None as Option<&[u8]>, Some(encoded.clone()))
                        .map_err(|e| CoreError::Transient(e.to_string()))?;
                    if cas.is_ok() {
                        return Ok(InsertOutcome::Inserted);
                    }
                    // Someone else inserted concurrently; re-read and fall
                    // through to the comparison below.
                    continue;
                }
                Some(existing_bytes) => {
                    let existing_record: DpRecord = serde_json::from_slice(&existing_bytes)
                        .map_err(|e| CoreError::Transient(e.to_string()))?;

                    if existing_record.start == start {
                        return Ok(InsertOutcome::DuplicateNoop);
                    }

                    return self.record_collision(dp, &existing_record.start, start, now);
                }
            }
        }
    }

    fn record_collision(
        &self,
        dp: &[u8],
        start_a: &[u8],
        start_b: &[u8],
        now: i64,
    ) -> Result<InsertOutcome, CoreError> {
        let collision = CollisionRecord {
            start_a: start_a.to_vec(),
            start_b: start_b.to_vec(),
            detected_at: now,
        };
        let encoded =
            serde_json::to_vec(&collision).map_err(|e| CoreError::Transient(e.to_string()))?;

        // Terminal state: further submissions on an already-collided dp
        // are accepted for audit but create no new collision row.
        let cas = self
            .collisions
            .compare_and_swap(dp, None as Option<&[u8]>, Some(encoded))
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let (final_a, final_b) = if cas.is_ok() {
            (start_a.to_vec(), start_b.to_vec())
        } else {
            let existing = self
                .collisions
                .get(dp)
                .map_err(|e| CoreError::Transient(e.to_string()))?
                .ok_or_else(|| CoreError::Transient("collision row vanished".into()))?;
            let existing: CollisionRecord = serde_json::from_slice(&existing)
                .map_err(|e| CoreError::Transient(e.to_string()))?;
            (existing.start_a, existing.start_b)
        };

        Ok(InsertOutcome::Collision {
            start_a: final_a,
            start_b: final_b,
        })
    }

    // ── dashboard reads (weakly consistent, no locking) ───────────────

    pub fn total_dp_count(&self) -> usize {
        self.dps.len()
    }

    pub fn total_collision_count(&self) -> usize {
        self.collisions.len()
    }

    /// Per-user submission counts, for the dashboard.
    pub fn per_user_counts(&self) -> Result<Vec<(String, u64)>, CoreError> {
        let mut counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        for item in self.dps.iter() {
            let (_, value) = item.map_err(|e| CoreError::Transient(e.to_string()))?;
            let record: DpRecord =
                serde_json::from_slice(&value).map_err(|e| CoreError::Transient(e.to_string()))?;
            *counts.entry(record.username).or_insert(0) += 1;
        }
        let mut counts: Vec<(String, u64)> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(counts)
    }
}

fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_and_authenticate() {
        let store = Store::memory().unwrap();
        let token = store.create_user("alice").unwrap();
        assert!(store.authenticate("alice", &token).unwrap());
        assert!(!store.authenticate("alice", "wrong-token").unwrap());
        assert!(!store.authenticate("bob", &token).unwrap());
    }

    #[test]
    fn submit_is_idempotent_for_identical_pairs() {
        let store = Store::memory().unwrap();
        let start = vec![1, 2, 3];
        let dp = vec![9, 9, 9];

        let first = store.submit_dp(&start, &dp, "alice", 1).unwrap();
        assert_eq!(first, InsertOutcome::Inserted);

        let second = store.submit_dp(&start, &dp, "alice", 2).unwrap();
        assert_eq!(second, InsertOutcome::DuplicateNoop);

        assert_eq!(store.total_dp_count(), 1);
    }

    #[test]
    fn two_distinct_starts_on_same_dp_create_one_collision() {
        let store = Store::memory().unwrap();
        let dp = vec![9, 9, 9];
        let start_a = vec![1, 1, 1];
        let start_b = vec![2, 2, 2];

        store.submit_dp(&start_a, &dp, "alice", 1).unwrap();
        let outcome = store.submit_dp(&start_b, &dp, "bob", 2).unwrap();

        match outcome {
            InsertOutcome::Collision { start_a: a, start_b: b } => {
                assert_eq!(a, start_a);
                assert_eq!(b, start_b);
            }
            other => panic!("expected Collision, got {:?}", other),
        }
        assert_eq!(store.total_collision_count(), 1);

        // A third start on the same dp is audited but creates no new row.
        let start_c = vec![3, 3, 3];
        let outcome = store.submit_dp(&start_c, &dp, "carol", 3).unwrap();
        assert!(matches!(outcome, InsertOutcome::Collision { .. }));
        assert_eq!(store.total_collision_count(), 1);
    }

    #[test]
    fn concurrent_submissions_on_one_dp_produce_exactly_one_collision() {
        // Spec property 5: N workers racing to submit distinct starts for
        // the same dp must yield exactly one Collision row, whose pair is
        // two of the submitted starts.
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(Store::memory().unwrap());
        let dp = vec![7u8; 4];
        let n = 8u8;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let store = Arc::clone(&store);
                let dp = dp.clone();
                thread::spawn(move || {
                    let start = vec![i; 4];
                    store
                        .submit_dp(&start, &dp, &format!("worker{}", i), i as i64)
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<InsertOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(store.total_collision_count(), 1);

        let collided: Vec<_> = outcomes
            .iter()
            .filter(|o| matches!(o, InsertOutcome::Collision { .. }))
            .collect();
        assert!(!collided.is_empty(), "at least one submission must observe the collision");

        if let InsertOutcome::Collision { start_a, start_b } = &collided[0] {
            let submitted: Vec<Vec<u8>> = (0..n).map(|i| vec![i; 4]).collect();
            assert!(submitted.contains(start_a));
            assert!(submitted.contains(start_b));
            assert_ne!(start_a, start_b);
        }
    }
}
