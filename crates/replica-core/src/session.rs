//! Session and pair metadata, and the outcomes of guarded session transitions.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::{PairId, SessionId};

/// Current session fields of a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    /// Unix milliseconds.
    pub start: Option<i64>,
}

/// A node pair and its negotiated policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPair {
    pub pair_id: PairId,
    pub pair_name: String,
    pub max_session_duration_value: i64,
    pub max_session_duration_unit: String,
    pub data_transform: Option<String>,
    pub message_transform: Option<String>,
    pub message_security_policy: Option<String>,
    pub conflict_uri: Option<String>,
    pub session: SessionInfo,
}

/// Outcome of trying to open a session on a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateSessionResult {
    Ok,
    /// The pair is already held by this very session.
    ThisSessionIdAlreadyActive,
    /// The pair is held by another session.
    DifferentSessionIdAlreadyActive { active: Option<SessionId> },
}

/// Outcome of moving an active session to a new state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSessionResult {
    Ok,
    CouldNotFindActiveSessionToUpdate {
        actual_session_id: Option<SessionId>,
        actual_state: SessionState,
    },
}

/// Outcome of closing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseSessionResult {
    Ok,
    ThisSessionIdAlreadyInactive,
    DifferentSessionIdAlreadyActive { active: SessionId },
}
