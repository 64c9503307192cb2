//! Storage trait definitions

use async_trait::async_trait;

use crate::credential::{AllowedRange, Credential};
use crate::error::Result;

/// Read-modify-write step over one credential's range set
///
/// Receives the current ranges and edits them in place. Returns `true` if
/// the edited set should be written back, `false` to leave storage as it was.
pub type RangeEdit<'a> = Box<dyn FnOnce(&mut Vec<AllowedRange>) -> bool + Send + 'a>;

/// Trait for restriction storage backends
///
/// A backend maps credential keys to their record and their set of allowed
/// ranges. Every method is atomic with respect to every other writer of the
/// same backing data, including other store instances over the same files.
/// Range sets are only ever written whole.
#[async_trait]
pub trait RestrictionStore: Send + Sync {
    /// Look up a credential by key
    async fn get_credential(&self, key: &str) -> Result<Option<Credential>>;

    /// Insert a new credential together with its initial ranges
    ///
    /// Fails with `CredentialExists` if the key is already present. Nothing
    /// is stored if the write fails.
    async fn insert_credential(&self, credential: &Credential, ranges: Vec<AllowedRange>) -> Result<()>;

    /// Delete a credential and all of its ranges, returning the removed record
    async fn delete_credential(&self, key: &str) -> Result<Option<Credential>>;

    /// List all credentials, sorted by key
    async fn list_credentials(&self) -> Result<Vec<Credential>>;

    /// Ranges for a credential in insertion order (empty if unknown)
    async fn ranges(&self, key: &str) -> Result<Vec<AllowedRange>>;

    /// Replace the full range set of an existing credential
    async fn replace_ranges(&self, key: &str, ranges: Vec<AllowedRange>) -> Result<()>;

    /// Run `edit` against the current ranges of an existing credential and
    /// store the result, as one step
    ///
    /// No other writer can change the credential between the read and the
    /// write. `edit` runs synchronously while that exclusion is held, so it
    /// should not wait on anything but the operator. Fails with
    /// `CredentialNotFound` (without calling `edit`) if the key is unknown.
    async fn update_ranges(&self, key: &str, edit: RangeEdit<'_>) -> Result<()>;

    /// Get a human-readable name for this storage backend
    fn backend_name(&self) -> &'static str;
}
