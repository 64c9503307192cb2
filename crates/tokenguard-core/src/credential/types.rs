//! Credential type definitions

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Number of random bytes in a generated token key (40 hex characters)
const KEY_BYTES: usize = 20;

/// An API token that IP restrictions are attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Full token key, used as the lookup identifier
    pub key: String,

    /// Name of the user the token belongs to
    pub owner: String,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Create a credential with a freshly generated key
    pub fn generate(owner: &str) -> Self {
        let mut bytes = [0u8; KEY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self::with_key(&hex::encode(bytes), owner)
    }

    /// Create a credential for an existing key
    pub fn with_key(key: &str, owner: &str) -> Self {
        Self {
            key: key.to_string(),
            owner: owner.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Shortened key for log lines
    pub fn display_prefix(&self) -> String {
        if self.key.chars().count() > 8 {
            format!("{}...", self.key.chars().take(8).collect::<String>())
        } else {
            self.key.clone()
        }
    }
}

/// A network a credential may be used from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedRange {
    /// Canonical network
    pub cidr: IpNet,

    /// When the range was added
    pub added_at: DateTime<Utc>,
}

impl AllowedRange {
    pub fn new(cidr: IpNet) -> Self {
        Self {
            cidr,
            added_at: Utc::now(),
        }
    }
}

/// Credential together with its ranges, as persisted by file backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Credential metadata
    pub credential: Credential,

    /// Allowed ranges in insertion order
    #[serde(default)]
    pub ranges: Vec<AllowedRange>,
}
