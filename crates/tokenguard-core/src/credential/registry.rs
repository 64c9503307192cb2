//! Credential registry for issuing and revoking tokens

use std::sync::Arc;
use tracing::{debug, info};

use super::types::{AllowedRange, Credential};
use crate::cidr::open_ranges;
use crate::error::{GuardError, Result};
use crate::storage::RestrictionStore;

/// Issues, looks up and revokes credentials
///
/// IP restrictions themselves are managed by [`crate::IpAccessPolicy`].
pub struct CredentialRegistry {
    /// Storage backend
    storage: Arc<dyn RestrictionStore>,
}

impl CredentialRegistry {
    /// Create a new credential registry
    pub fn new(storage: Arc<dyn RestrictionStore>) -> Self {
        Self { storage }
    }

    /// Issue a new credential with a generated key
    ///
    /// With `open_policy` the credential starts with the two sentinel ranges,
    /// otherwise it starts with none and denies every address.
    pub async fn issue(&self, owner: &str, open_policy: bool) -> Result<Credential> {
        let credential = Credential::generate(owner);
        self.register(credential, open_policy).await
    }

    /// Register a credential for a key issued elsewhere
    pub async fn issue_with_key(&self, key: &str, owner: &str, open_policy: bool) -> Result<Credential> {
        self.register(Credential::with_key(key, owner), open_policy).await
    }

    async fn register(&self, credential: Credential, open_policy: bool) -> Result<Credential> {
        let ranges = if open_policy {
            open_ranges().into_iter().map(AllowedRange::new).collect()
        } else {
            Vec::new()
        };
        self.storage.insert_credential(&credential, ranges).await?;

        info!(
            "Issued credential {} for {} (open policy: {})",
            credential.display_prefix(),
            credential.owner,
            open_policy
        );
        Ok(credential)
    }

    /// Get a credential by key
    pub async fn get(&self, key: &str) -> Result<Option<Credential>> {
        self.storage.get_credential(key).await
    }

    /// Get a credential by key, failing if it does not exist
    pub async fn require(&self, key: &str) -> Result<Credential> {
        self.storage
            .get_credential(key)
            .await?
            .ok_or_else(|| GuardError::CredentialNotFound(key.to_string()))
    }

    /// List all credentials
    pub async fn list(&self) -> Result<Vec<Credential>> {
        let credentials = self.storage.list_credentials().await?;
        debug!("Listed {} credentials", credentials.len());
        Ok(credentials)
    }

    /// Revoke a credential, discarding its ranges
    pub async fn revoke(&self, key: &str) -> Result<Credential> {
        let credential = self
            .storage
            .delete_credential(key)
            .await?
            .ok_or_else(|| GuardError::CredentialNotFound(key.to_string()))?;

        info!("Revoked credential {}", credential.display_prefix());
        Ok(credential)
    }
}
