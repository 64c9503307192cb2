//! In-memory storage backend

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{RangeEdit, RestrictionStore};
use crate::credential::{AllowedRange, Credential, StoredCredential};
use crate::error::{GuardError, Result};

/// Volatile storage backend holding everything in a map
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, StoredCredential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RestrictionStore for MemoryStore {
    async fn get_credential(&self, key: &str) -> Result<Option<Credential>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|stored| stored.credential.clone()))
    }

    async fn insert_credential(&self, credential: &Credential, ranges: Vec<AllowedRange>) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&credential.key) {
            return Err(GuardError::CredentialExists(credential.key.clone()));
        }

        entries.insert(
            credential.key.clone(),
            StoredCredential {
                credential: credential.clone(),
                ranges,
            },
        );
        Ok(())
    }

    async fn delete_credential(&self, key: &str) -> Result<Option<Credential>> {
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .map(|stored| stored.credential))
    }

    async fn list_credentials(&self) -> Result<Vec<Credential>> {
        let entries = self.entries.read().await;
        Ok(entries.values().map(|stored| stored.credential.clone()).collect())
    }

    async fn ranges(&self, key: &str) -> Result<Vec<AllowedRange>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .map(|stored| stored.ranges.clone())
            .unwrap_or_default())
    }

    async fn replace_ranges(&self, key: &str, ranges: Vec<AllowedRange>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let stored = entries
            .get_mut(key)
            .ok_or_else(|| GuardError::CredentialNotFound(key.to_string()))?;
        stored.ranges = ranges;
        Ok(())
    }

    async fn update_ranges(&self, key: &str, edit: RangeEdit<'_>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let stored = entries
            .get_mut(key)
            .ok_or_else(|| GuardError::CredentialNotFound(key.to_string()))?;

        let mut ranges = stored.ranges.clone();
        if edit(&mut ranges) {
            stored.ranges = ranges;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "In-Memory Storage"
    }
}
