//! Strong type definitions for Replica.
//!
//! Every identifier that crosses a store or wire boundary is a newtype, so a
//! node id can never be bound where a session id is expected.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identity of a replicating node.
    NodeId
);

string_id!(
    /// Identity of one sync session on a pair.
    SessionId
);

string_id!(
    /// Identity of a node pair.
    PairId
);

string_id!(
    /// Identity of a record within its entity.
    RecordId
);

string_id!(
    /// A correlation token stamped on peer-tracking rows.
    ///
    /// Used both as the fetch reservation token (`QueueBindSendId`) and as the
    /// batch-wide transaction token (`TransactionBindSendId` /
    /// `TransactionBindReceiveId`).
    BindId
);

string_id!(
    /// Hex content digest of an encoded record.
    RecordHash
);

impl BindId {
    /// Generate a fresh 128-bit random token.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }
}

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }
}

impl RecordHash {
    /// Blake3 digest of `data`, hex encoded.
    pub fn of(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }
}
