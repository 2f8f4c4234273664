//! Sync state enumerations shared by the store and the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// What a node believes its peer holds for a record.
///
/// Governs which statement path the receiving Change Processor takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum SentSyncState {
    /// Tracked locally, never offered to the peer.
    NeverSentToPeer = 1,
    /// Being offered to the peer for the first time.
    FirstTimeSentToPeer = 2,
    /// The peer already holds a version of this record.
    StandardSentToPeer = 3,
    /// Deleted without an intermediate update.
    FastDeleted = 4,
}

impl SentSyncState {
    /// Convert to the stored integer.
    pub fn to_i64(self) -> i64 {
        self as i64
    }

    /// Try to parse from the stored integer.
    pub fn from_i64(value: i64) -> Result<Self, CoreError> {
        match value {
            1 => Ok(Self::NeverSentToPeer),
            2 => Ok(Self::FirstTimeSentToPeer),
            3 => Ok(Self::StandardSentToPeer),
            4 => Ok(Self::FastDeleted),
            other => Err(CoreError::UnknownSentSyncState(other)),
        }
    }

    /// The state presented on the wire.
    ///
    /// A record that was never sent goes out as a first-time send.
    pub fn outgoing(self) -> Self {
        match self {
            Self::NeverSentToPeer => Self::FirstTimeSentToPeer,
            other => other,
        }
    }
}

/// Per-record outcome reported back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum AckSyncState {
    AckFastBatch = 21,
    AckRecordLevelConflictResolvedSeparateFieldsChanged = 22,
    AckFieldLevelConflictWithNoAutoResolverAvailable = 23,
    AckFieldLevelConflictResolvedWithAutoResolver = 24,
    AckFieldLevelConflictWithNoAutoResolverResolution = 25,
    AckDeleteAndUpdateConflictWithNoAutoResolverAvailable = 26,
    AckDeleteAndUpdateConflictWithNoAutoResolution = 27,
    AckDeleteAndUpdateConflictWithAutoResolution = 28,
}

impl AckSyncState {
    /// Convert to the wire integer.
    pub fn to_i64(self) -> i64 {
        self as i64
    }

    /// Try to parse from the wire integer.
    pub fn from_i64(value: i64) -> Result<Self, CoreError> {
        match value {
            21 => Ok(Self::AckFastBatch),
            22 => Ok(Self::AckRecordLevelConflictResolvedSeparateFieldsChanged),
            23 => Ok(Self::AckFieldLevelConflictWithNoAutoResolverAvailable),
            24 => Ok(Self::AckFieldLevelConflictResolvedWithAutoResolver),
            25 => Ok(Self::AckFieldLevelConflictWithNoAutoResolverResolution),
            26 => Ok(Self::AckDeleteAndUpdateConflictWithNoAutoResolverAvailable),
            27 => Ok(Self::AckDeleteAndUpdateConflictWithNoAutoResolution),
            28 => Ok(Self::AckDeleteAndUpdateConflictWithAutoResolution),
            other => Err(CoreError::UnknownAckSyncState(other)),
        }
    }

    /// Whether the receiver applied the record uncontested.
    pub fn is_fast_batch(self) -> bool {
        self == Self::AckFastBatch
    }

    /// Whether the record still needs a resolution decision.
    pub fn needs_resolution(self) -> bool {
        matches!(
            self,
            Self::AckFieldLevelConflictWithNoAutoResolverAvailable
                | Self::AckFieldLevelConflictWithNoAutoResolverResolution
                | Self::AckDeleteAndUpdateConflictWithNoAutoResolverAvailable
                | Self::AckDeleteAndUpdateConflictWithNoAutoResolution
        )
    }
}

/// Which kind of change a fetch or batch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    AddOrUpdate,
    Delete,
}

impl ChangeType {
    /// Whether rows of this change type carry the delete flag.
    pub fn is_delete(self) -> bool {
        self == Self::Delete
    }
}

/// State of the sync session on a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Inactive,
    Initializing,
    Seeding,
    Queuing,
    Syncing,
    Canceling,
}

impl SessionState {
    /// The stored name of this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "Inactive",
            Self::Initializing => "Initializing",
            Self::Seeding => "Seeding",
            Self::Queuing => "Queuing",
            Self::Syncing => "Syncing",
            Self::Canceling => "Canceling",
        }
    }

    /// Whether a session holds the pair in this state.
    pub fn is_active(self) -> bool {
        self != Self::Inactive
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Inactive" => Ok(Self::Inactive),
            "Initializing" => Ok(Self::Initializing),
            "Seeding" => Ok(Self::Seeding),
            "Queuing" => Ok(Self::Queuing),
            "Syncing" => Ok(Self::Syncing),
            "Canceling" => Ok(Self::Canceling),
            other => Err(CoreError::UnknownSessionState(other.to_string())),
        }
    }
}
