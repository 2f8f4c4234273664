//! Convergence verification for sync rounds.
//!
//! After syncing, two nodes can check they hold the same canonical record
//! set by comparing deterministic state hashes, and find out which records
//! differ when they do not.

use std::collections::BTreeMap;

use replica_core::{RecordHash, RecordId};
use replica_store::RecordInventory;

use crate::error::Result;

/// An entity singular name with a record id.
pub type RecordKey = (String, RecordId);

/// Compute a deterministic state hash over a node's canonical records.
///
/// Algorithm:
/// 1. Get every `(entity, record id, hash)` in entity, then id order
/// 2. Hash each triple into a rolling Blake3 state, length-prefixed
/// 3. Return the final digest, or `None` for an empty store
pub async fn compute_state_hash<S: RecordInventory>(store: &S) -> Result<Option<blake3::Hash>> {
    let records = store.record_hashes().await?;
    if records.is_empty() {
        return Ok(None);
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"replica-state-v1:");
    for (entity, record_id, hash) in &records {
        for part in [entity.as_str(), record_id.as_str(), hash.as_str()] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
    }

    Ok(Some(hasher.finalize()))
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both nodes hold identical canonical records.
    Converged,
    /// The record sets differ.
    Diverged {
        /// Held only by the remote node.
        missing_locally: Vec<RecordKey>,
        /// Held only by the local node.
        missing_remotely: Vec<RecordKey>,
        /// Held by both with different hashes.
        mismatched: Vec<RecordKey>,
    },
}

impl ConvergenceResult {
    /// Check if nodes have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare the canonical record sets of two nodes.
pub async fn verify_convergence<L, R>(local: &L, remote: &R) -> Result<ConvergenceResult>
where
    L: RecordInventory,
    R: RecordInventory,
{
    let local_state = compute_state_hash(local).await?;
    let remote_state = compute_state_hash(remote).await?;
    if local_state == remote_state {
        return Ok(ConvergenceResult::Converged);
    }

    let local_records: BTreeMap<RecordKey, RecordHash> = local
        .record_hashes()
        .await?
        .into_iter()
        .map(|(entity, id, hash)| ((entity, id), hash))
        .collect();
    let mut remote_records: BTreeMap<RecordKey, RecordHash> = remote
        .record_hashes()
        .await?
        .into_iter()
        .map(|(entity, id, hash)| ((entity, id), hash))
        .collect();

    let mut missing_remotely = Vec::new();
    let mut mismatched = Vec::new();
    for (key, hash) in local_records {
        match remote_records.remove(&key) {
            None => missing_remotely.push(key),
            Some(remote_hash) if remote_hash != hash => mismatched.push(key),
            Some(_) => {}
        }
    }
    let missing_locally: Vec<RecordKey> = remote_records.into_keys().collect();

    if missing_locally.is_empty() && missing_remotely.is_empty() && mismatched.is_empty() {
        return Ok(ConvergenceResult::Converged);
    }

    tracing::debug!(
        missing_locally = missing_locally.len(),
        missing_remotely = missing_remotely.len(),
        mismatched = mismatched.len(),
        "record sets diverged"
    );

    Ok(ConvergenceResult::Diverged {
        missing_locally,
        missing_remotely,
        mismatched,
    })
}
