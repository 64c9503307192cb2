//! IP access policy for credentials

use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use tracing::{debug, info, warn};

use super::types::{
    AddOutcome, Approval, ConfirmRequest, OpenPolicyChange, PolicyState, RemoveOutcome,
    ResetOutcome,
};
use crate::cidr::{is_open_sentinel, open_ranges, parse_address, parse_cidr};
use crate::credential::{AllowedRange, Credential};
use crate::error::{GuardError, Result};
use crate::storage::RestrictionStore;

/// Decides which source addresses may use a credential
///
/// Every check that guards a mutation (duplicate, open policy, last range)
/// runs inside the storage backend's atomic range update, together with the
/// write that follows it.
pub struct IpAccessPolicy {
    /// Storage backend
    storage: Arc<dyn RestrictionStore>,
}

impl IpAccessPolicy {
    /// Create a new policy over a storage backend
    pub fn new(storage: Arc<dyn RestrictionStore>) -> Self {
        Self { storage }
    }

    /// Add an allowed range
    ///
    /// If the credential currently has open access, the open sentinels are
    /// removed only when the approval grants [`ConfirmRequest::RemoveOpenPolicy`];
    /// otherwise the range is added next to them.
    pub async fn add_range(&self, key: &str, cidr: &str, approval: Approval<'_>) -> Result<AddOutcome> {
        let credential = self.require(key).await?;
        let net = parse_cidr(cidr)?;

        let mut outcome = None;
        self.storage
            .update_ranges(
                key,
                Box::new(|ranges: &mut Vec<AllowedRange>| {
                    let result = apply_add(ranges, net, approval);
                    let changed = matches!(result, AddOutcome::Added { .. });
                    outcome = Some(result);
                    changed
                }),
            )
            .await?;
        let outcome = outcome.ok_or_else(edit_skipped)?;

        match &outcome {
            AddOutcome::AlreadyPresent(_) => {
                debug!("Range {} already present for {}", net, credential.display_prefix());
            }
            AddOutcome::Added { open_policy, .. } => {
                if *open_policy == OpenPolicyChange::Retained {
                    warn!(
                        "Added {} to {} while its open policy stays in place",
                        net,
                        credential.display_prefix()
                    );
                }
                info!("Added IP restriction {} for {}", net, credential.display_prefix());
            }
        }
        Ok(outcome)
    }

    /// Remove an allowed range
    ///
    /// Removing the last range leaves the credential denying all access and
    /// needs [`ConfirmRequest::RemoveLastRange`] to be granted.
    pub async fn remove_range(&self, key: &str, cidr: &str, approval: Approval<'_>) -> Result<RemoveOutcome> {
        let credential = self.require(key).await?;

        // Anything that does not parse cannot have been stored
        let net = match parse_cidr(cidr) {
            Ok(net) => net,
            Err(_) => return Ok(RemoveOutcome::NotFound(cidr.to_string())),
        };

        let mut outcome = None;
        self.storage
            .update_ranges(
                key,
                Box::new(|ranges: &mut Vec<AllowedRange>| {
                    let result = apply_remove(ranges, net, cidr, approval);
                    let changed = matches!(result, RemoveOutcome::Removed(_));
                    outcome = Some((result, ranges.is_empty()));
                    changed
                }),
            )
            .await?;
        let (outcome, deny_all) = outcome.ok_or_else(edit_skipped)?;

        match &outcome {
            RemoveOutcome::Removed(_) => info!(
                "Removed IP restriction {} for {}{}",
                net,
                credential.display_prefix(),
                if deny_all { " (now denies all access)" } else { "" }
            ),
            RemoveOutcome::Cancelled => {
                debug!("Removal of last range for {} cancelled", credential.display_prefix());
            }
            RemoveOutcome::NotFound(_) => {
                debug!("Range {} not configured for {}", net, credential.display_prefix());
            }
        }
        Ok(outcome)
    }

    /// Replace all ranges with the two open sentinels
    ///
    /// The result does not depend on the current ranges, so the approval is
    /// resolved before anything is read.
    pub async fn reset_to_open(&self, key: &str, approval: Approval<'_>) -> Result<ResetOutcome> {
        let credential = self.require(key).await?;

        if !approval.grants(&ConfirmRequest::ResetToOpen) {
            debug!("Reset of {} cancelled", credential.display_prefix());
            return Ok(ResetOutcome::Cancelled);
        }

        let ranges = open_ranges().into_iter().map(AllowedRange::new).collect();
        self.storage.replace_ranges(key, ranges).await?;

        info!("Reset {} to the open policy", credential.display_prefix());
        Ok(ResetOutcome::Reset)
    }

    /// Allowed ranges in the order they were added
    pub async fn list_ranges(&self, key: &str) -> Result<Vec<IpNet>> {
        self.require(key).await?;
        self.snapshot(key).await
    }

    /// Summarize the credential's range set
    pub async fn policy_state(&self, key: &str) -> Result<PolicyState> {
        let ranges = self.list_ranges(key).await?;
        Ok(PolicyState::from_ranges(&ranges))
    }

    /// Check whether `addr` may use the credential
    ///
    /// A credential without ranges denies every address.
    pub async fn is_allowed(&self, key: &str, addr: IpAddr) -> Result<bool> {
        self.require(key).await?;

        let addr = addr.to_canonical();
        let allowed = self
            .snapshot(key)
            .await?
            .iter()
            .any(|net| net.contains(&addr));

        debug!("Access check for {}: {}", addr, if allowed { "allowed" } else { "denied" });
        Ok(allowed)
    }

    /// Like [`IpAccessPolicy::is_allowed`] for an address given as text
    pub async fn is_allowed_str(&self, key: &str, addr: &str) -> Result<bool> {
        let addr = parse_address(addr)?;
        self.is_allowed(key, addr).await
    }

    async fn snapshot(&self, key: &str) -> Result<Vec<IpNet>> {
        let ranges = self.storage.ranges(key).await?;
        Ok(ranges.into_iter().map(|r| r.cidr).collect())
    }

    async fn require(&self, key: &str) -> Result<Credential> {
        self.storage
            .get_credential(key)
            .await?
            .ok_or_else(|| GuardError::CredentialNotFound(key.to_string()))
    }
}

/// Add `net` to `ranges`, asking about the open policy if there is one
fn apply_add(ranges: &mut Vec<AllowedRange>, net: IpNet, approval: Approval<'_>) -> AddOutcome {
    if ranges.iter().any(|r| r.cidr == net) {
        return AddOutcome::AlreadyPresent(net);
    }

    let sentinels: Vec<IpNet> = ranges
        .iter()
        .map(|r| r.cidr)
        .filter(is_open_sentinel)
        .collect();

    let open_policy = if sentinels.is_empty() || is_open_sentinel(&net) {
        OpenPolicyChange::NotOpen
    } else if approval.grants(&ConfirmRequest::RemoveOpenPolicy) {
        ranges.retain(|r| !is_open_sentinel(&r.cidr));
        OpenPolicyChange::Removed(sentinels)
    } else {
        OpenPolicyChange::Retained
    };

    ranges.push(AllowedRange::new(net));
    AddOutcome::Added {
        cidr: net,
        open_policy,
    }
}

/// Remove `net` from `ranges`, asking before the last one goes
fn apply_remove(ranges: &mut Vec<AllowedRange>, net: IpNet, input: &str, approval: Approval<'_>) -> RemoveOutcome {
    let Some(position) = ranges.iter().position(|r| r.cidr == net) else {
        return RemoveOutcome::NotFound(input.to_string());
    };

    if ranges.len() == 1 && !approval.grants(&ConfirmRequest::RemoveLastRange { cidr: net }) {
        return RemoveOutcome::Cancelled;
    }

    ranges.remove(position);
    RemoveOutcome::Removed(net)
}

fn edit_skipped() -> GuardError {
    GuardError::StorageError("Storage backend skipped the range update".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cidr::{OPEN_IPV4, OPEN_IPV6};
    use crate::credential::CredentialRegistry;
    use crate::storage::{JsonFileStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    async fn policy_with(key: &str, cidrs: &[&str]) -> IpAccessPolicy {
        let storage = Arc::new(MemoryStore::new());
        CredentialRegistry::new(storage.clone())
            .issue_with_key(key, "tester", false)
            .await
            .unwrap();

        let ranges = cidrs
            .iter()
            .map(|c| AllowedRange::new(parse_cidr(c).unwrap()))
            .collect();
        storage.replace_ranges(key, ranges).await.unwrap();

        IpAccessPolicy::new(storage)
    }

    async fn listed(policy: &IpAccessPolicy, key: &str) -> Vec<String> {
        policy
            .list_ranges(key)
            .await
            .unwrap()
            .iter()
            .map(|n| n.to_string())
            .collect()
    }

    fn decline(_: &ConfirmRequest) -> bool {
        false
    }

    fn accept(_: &ConfirmRequest) -> bool {
        true
    }

    #[tokio::test]
    async fn test_forced_add_removes_open_policy() {
        let policy = policy_with("T1", &[OPEN_IPV4, OPEN_IPV6]).await;

        let outcome = policy
            .add_range("T1", "192.168.1.0/24", Approval::Forced)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            AddOutcome::Added {
                cidr: "192.168.1.0/24".parse().unwrap(),
                open_policy: OpenPolicyChange::Removed(open_ranges().to_vec()),
            }
        );
        assert_eq!(listed(&policy, "T1").await, vec!["192.168.1.0/24"]);
        assert!(policy.is_allowed_str("T1", "192.168.1.5").await.unwrap());
        assert!(!policy.is_allowed_str("T1", "10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_declined_add_keeps_open_policy() {
        let policy = policy_with("T1", &[OPEN_IPV4, OPEN_IPV6]).await;

        let outcome = policy
            .add_range("T1", "192.168.1.0/24", Approval::Interactive(&decline))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            AddOutcome::Added { open_policy: OpenPolicyChange::Retained, .. }
        ));
        assert_eq!(
            listed(&policy, "T1").await,
            vec![OPEN_IPV4, OPEN_IPV6, "192.168.1.0/24"]
        );
        assert!(policy.is_allowed_str("T1", "10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_confirmed_add_removes_partial_open_policy() {
        let policy = policy_with("T1", &[OPEN_IPV6, "10.0.0.0/8"]).await;

        let outcome = policy
            .add_range("T1", "2001:db8::/32", Approval::Interactive(&accept))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            AddOutcome::Added { open_policy: OpenPolicyChange::Removed(ref removed), .. }
                if removed.len() == 1
        ));
        assert_eq!(listed(&policy, "T1").await, vec!["10.0.0.0/8", "2001:db8::/32"]);
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let policy = policy_with("T1", &[]).await;

        for _ in 0..3 {
            policy
                .add_range("T1", "10.0.0.0/8", Approval::NonInteractive)
                .await
                .unwrap();
        }
        let outcome = policy
            .add_range("T1", " 10.0.0.0/8", Approval::NonInteractive)
            .await
            .unwrap();

        assert_eq!(outcome, AddOutcome::AlreadyPresent("10.0.0.0/8".parse().unwrap()));
        assert_eq!(listed(&policy, "T1").await, vec!["10.0.0.0/8"]);
    }

    #[tokio::test]
    async fn test_add_sentinel_does_not_prompt() {
        let policy = policy_with("T1", &[OPEN_IPV4]).await;
        let asked = AtomicUsize::new(0);
        let counting = |_: &ConfirmRequest| {
            asked.fetch_add(1, Ordering::SeqCst);
            true
        };

        policy
            .add_range("T1", "::0/0", Approval::Interactive(&counting))
            .await
            .unwrap();

        assert_eq!(asked.load(Ordering::SeqCst), 0);
        assert_eq!(policy.policy_state("T1").await.unwrap(), PolicyState::Open);
    }

    #[tokio::test]
    async fn test_add_invalid_cidr_leaves_ranges_untouched() {
        let policy = policy_with("T1", &["10.0.0.0/8"]).await;

        let result = policy
            .add_range("T1", "10.0.0.1/8", Approval::Forced)
            .await;

        assert!(matches!(result, Err(GuardError::InvalidCidr(_))));
        assert_eq!(listed(&policy, "T1").await, vec!["10.0.0.0/8"]);
    }

    #[tokio::test]
    async fn test_unknown_credential() {
        let policy = policy_with("T1", &[]).await;

        assert!(matches!(
            policy.add_range("nope", "10.0.0.0/8", Approval::Forced).await,
            Err(GuardError::CredentialNotFound(_))
        ));
        assert!(matches!(
            policy.remove_range("nope", "10.0.0.0/8", Approval::Forced).await,
            Err(GuardError::CredentialNotFound(_))
        ));
        assert!(matches!(
            policy.reset_to_open("nope", Approval::Forced).await,
            Err(GuardError::CredentialNotFound(_))
        ));
        assert!(matches!(
            policy.list_ranges("nope").await,
            Err(GuardError::CredentialNotFound(_))
        ));
        assert!(matches!(
            policy.is_allowed_str("nope", "10.0.0.1").await,
            Err(GuardError::CredentialNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_forced_remove_last_range_denies_all() {
        let policy = policy_with("T2", &["10.0.0.0/8"]).await;

        let outcome = policy
            .remove_range("T2", "10.0.0.0/8", Approval::Forced)
            .await
            .unwrap();

        assert_eq!(outcome, RemoveOutcome::Removed("10.0.0.0/8".parse().unwrap()));
        assert!(listed(&policy, "T2").await.is_empty());
        assert_eq!(policy.policy_state("T2").await.unwrap(), PolicyState::DenyAll);
        assert!(!policy.is_allowed_str("T2", "10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_declined_remove_last_range_is_cancelled() {
        let policy = policy_with("T2", &["10.0.0.0/8"]).await;

        let outcome = policy
            .remove_range("T2", "10.0.0.0/8", Approval::Interactive(&decline))
            .await
            .unwrap();

        assert_eq!(outcome, RemoveOutcome::Cancelled);
        assert_eq!(listed(&policy, "T2").await, vec!["10.0.0.0/8"]);

        let outcome = policy
            .remove_range("T2", "10.0.0.0/8", Approval::NonInteractive)
            .await
            .unwrap();
        assert_eq!(outcome, RemoveOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_remove_without_prompt_when_others_remain() {
        let policy = policy_with("T1", &["10.0.0.0/8", "192.168.0.0/16"]).await;

        let outcome = policy
            .remove_range("T1", "10.0.0.0/8", Approval::NonInteractive)
            .await
            .unwrap();

        assert!(matches!(outcome, RemoveOutcome::Removed(_)));
        assert_eq!(listed(&policy, "T1").await, vec!["192.168.0.0/16"]);
    }

    #[tokio::test]
    async fn test_remove_missing_range() {
        let policy = policy_with("T1", &["10.0.0.0/8"]).await;

        assert_eq!(
            policy
                .remove_range("T1", "172.16.0.0/12", Approval::Forced)
                .await
                .unwrap(),
            RemoveOutcome::NotFound("172.16.0.0/12".to_string())
        );
        assert_eq!(
            policy
                .remove_range("T1", "garbage", Approval::Forced)
                .await
                .unwrap(),
            RemoveOutcome::NotFound("garbage".to_string())
        );
        assert_eq!(listed(&policy, "T1").await, vec!["10.0.0.0/8"]);
    }

    #[tokio::test]
    async fn test_reset_to_open() {
        let policy = policy_with("T1", &["10.0.0.0/8", "2001:db8::/32"]).await;

        let outcome = policy.reset_to_open("T1", Approval::Forced).await.unwrap();

        assert_eq!(outcome, ResetOutcome::Reset);
        assert_eq!(listed(&policy, "T1").await, vec![OPEN_IPV4, OPEN_IPV6]);
        assert!(policy.is_allowed_str("T1", "8.8.8.8").await.unwrap());
        assert!(policy.is_allowed_str("T1", "2606:4700::1111").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_from_empty_and_cancelled() {
        let policy = policy_with("T1", &[]).await;

        assert_eq!(
            policy
                .reset_to_open("T1", Approval::Interactive(&decline))
                .await
                .unwrap(),
            ResetOutcome::Cancelled
        );
        assert!(listed(&policy, "T1").await.is_empty());

        policy
            .reset_to_open("T1", Approval::Interactive(&accept))
            .await
            .unwrap();
        assert_eq!(listed(&policy, "T1").await, vec![OPEN_IPV4, OPEN_IPV6]);
    }

    #[tokio::test]
    async fn test_empty_ranges_deny_everything() {
        let policy = policy_with("T1", &[]).await;

        for addr in ["127.0.0.1", "10.0.0.1", "::1", "2001:db8::1"] {
            assert!(!policy.is_allowed_str("T1", addr).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_single_sentinel_covers_its_family_only() {
        let policy = policy_with("T1", &[OPEN_IPV4]).await;

        assert!(policy.is_allowed_str("T1", "203.0.113.9").await.unwrap());
        assert!(!policy.is_allowed_str("T1", "2001:db8::1").await.unwrap());
    }

    #[tokio::test]
    async fn test_union_membership_across_families() {
        let policy = policy_with("T1", &["10.0.0.0/8", "2001:db8::/32"]).await;

        assert!(policy.is_allowed_str("T1", "10.200.0.1").await.unwrap());
        assert!(policy.is_allowed_str("T1", "2001:db8:ffff::1").await.unwrap());
        assert!(policy.is_allowed_str("T1", "::ffff:10.1.2.3").await.unwrap());
        assert!(!policy.is_allowed_str("T1", "11.0.0.1").await.unwrap());
        assert!(matches!(
            policy.is_allowed_str("T1", "not-an-ip").await,
            Err(GuardError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_adds_keep_every_range() {
        let policy = Arc::new(policy_with("T1", &[]).await);

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let policy = policy.clone();
            handles.push(tokio::spawn(async move {
                policy
                    .add_range("T1", &format!("10.{i}.0.0/16"), Approval::Forced)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(policy.list_ranges("T1").await.unwrap().len(), 16);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_removes_cannot_empty_without_approval() {
        for _ in 0..20 {
            let policy = Arc::new(policy_with("T1", &["10.0.0.0/8", "192.168.0.0/16"]).await);

            let handles: Vec<_> = ["10.0.0.0/8", "192.168.0.0/16"]
                .into_iter()
                .map(|cidr| {
                    let policy = policy.clone();
                    tokio::spawn(async move {
                        policy
                            .remove_range("T1", cidr, Approval::NonInteractive)
                            .await
                            .unwrap()
                    })
                })
                .collect();

            let mut outcomes = Vec::new();
            for handle in handles {
                outcomes.push(handle.await.unwrap());
            }

            let removed = outcomes
                .iter()
                .filter(|o| matches!(o, RemoveOutcome::Removed(_)))
                .count();
            assert_eq!(removed, 1, "outcomes: {:?}", outcomes);
            assert!(outcomes.contains(&RemoveOutcome::Cancelled));
            assert_eq!(policy.list_ranges("T1").await.unwrap().len(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_forced_removes_of_last_range() {
        let policy = Arc::new(policy_with("T2", &["10.0.0.0/8"]).await);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let policy = policy.clone();
                tokio::spawn(async move {
                    policy
                        .remove_range("T2", "10.0.0.0/8", Approval::Forced)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let removed = outcomes
            .iter()
            .filter(|o| matches!(o, RemoveOutcome::Removed(_)))
            .count();
        assert_eq!(removed, 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, RemoveOutcome::NotFound(_)))
                .count(),
            3
        );
        assert_eq!(policy.policy_state("T2").await.unwrap(), PolicyState::DenyAll);
    }

    #[tokio::test]
    async fn test_declined_last_range_prompt_is_asked_once_per_remove() {
        let policy = policy_with("T2", &["10.0.0.0/8"]).await;
        let asked = AtomicUsize::new(0);
        let counting = |request: &ConfirmRequest| {
            assert!(matches!(request, ConfirmRequest::RemoveLastRange { .. }));
            asked.fetch_add(1, Ordering::SeqCst);
            false
        };

        policy
            .remove_range("T2", "10.0.0.0/8", Approval::Interactive(&counting))
            .await
            .unwrap();

        assert_eq!(asked.load(Ordering::SeqCst), 1);
        assert_eq!(listed(&policy, "T2").await, vec!["10.0.0.0/8"]);
    }

    #[tokio::test]
    async fn test_policies_sharing_a_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let first_store = Arc::new(JsonFileStore::open(temp_dir.path().to_path_buf()).unwrap());
        let second_store = Arc::new(JsonFileStore::open(temp_dir.path().to_path_buf()).unwrap());
        let registry = CredentialRegistry::new(first_store.clone());
        let first = IpAccessPolicy::new(first_store);
        let second = IpAccessPolicy::new(second_store);

        registry.issue_with_key("T1", "alice", true).await.unwrap();

        first
            .add_range("T1", "10.0.0.0/8", Approval::Forced)
            .await
            .unwrap();
        second
            .add_range("T1", "192.168.0.0/16", Approval::Forced)
            .await
            .unwrap();

        assert_eq!(listed(&first, "T1").await, vec!["10.0.0.0/8", "192.168.0.0/16"]);
        assert_eq!(listed(&second, "T1").await, vec!["10.0.0.0/8", "192.168.0.0/16"]);

        registry.revoke("T1").await.unwrap();

        assert!(matches!(
            second.is_allowed_str("T1", "10.0.0.1").await,
            Err(GuardError::CredentialNotFound(_))
        ));
        assert!(matches!(
            second.add_range("T1", "172.16.0.0/12", Approval::Forced).await,
            Err(GuardError::CredentialNotFound(_))
        ));

        let reopened = JsonFileStore::open(temp_dir.path().to_path_buf()).unwrap();
        assert!(reopened.get_credential("T1").await.unwrap().is_none());
        assert!(reopened.list_credentials().await.unwrap().is_empty());
    }
}
