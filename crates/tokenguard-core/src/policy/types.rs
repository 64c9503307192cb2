//! Policy outcome and confirmation types

use std::fmt;

use ipnet::IpNet;

use crate::cidr::is_open_sentinel;

/// A question the policy needs answered before a risky change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmRequest {
    /// Adding a scoped range to a credential that currently has open access
    RemoveOpenPolicy,
    /// Removing the only range left, which leaves the credential denying all access
    RemoveLastRange { cidr: IpNet },
    /// Discarding every range in favour of the open policy
    ResetToOpen,
    /// Revoking a credential together with its restrictions
    Revoke { key: String },
}

impl ConfirmRequest {
    /// Warning shown ahead of the question, if any
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            Self::RemoveOpenPolicy => Some(
                "This token currently has open access. This action will remove the open policy.",
            ),
            _ => None,
        }
    }

    /// The yes/no question to put to the operator
    pub fn question(&self) -> String {
        match self {
            Self::RemoveOpenPolicy => "Do you want to remove the open policy?".to_string(),
            Self::RemoveLastRange { .. } => "This is the last IP restriction. Removing it will deny all access for this token. Continue?".to_string(),
            Self::ResetToOpen => "This will remove all IP restrictions and allow access from any IP. Continue?".to_string(),
            Self::Revoke { key } => format!("This will revoke token {key} and delete its IP restrictions. Continue?"),
        }
    }
}

/// Answers confirmation requests, typically by asking a human
///
/// `confirm` is called synchronously from inside the storage backend's
/// read-modify-write step, so the check it guards and the write that
/// follows stay atomic. While it runs, every other writer of the same store
/// waits (for [`crate::JsonFileStore`], other processes included) and the
/// calling thread is blocked. A confirmer that waits on a human should only
/// be used where blocking the thread is acceptable, such as a CLI.
pub trait Confirm: Send + Sync {
    fn confirm(&self, request: &ConfirmRequest) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&ConfirmRequest) -> bool + Send + Sync,
{
    fn confirm(&self, request: &ConfirmRequest) -> bool {
        self(request)
    }
}

/// How confirmation requests are resolved for one operation
#[derive(Clone, Copy)]
pub enum Approval<'a> {
    /// Every request is granted (`--force`)
    Forced,
    /// Requests are passed to a confirmer
    Interactive(&'a dyn Confirm),
    /// No one to ask; every request is declined
    NonInteractive,
}

impl<'a> Approval<'a> {
    /// Build from a force flag and the confirmer to fall back on
    pub fn new(force: bool, confirmer: &'a dyn Confirm) -> Self {
        if force {
            Self::Forced
        } else {
            Self::Interactive(confirmer)
        }
    }

    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Forced)
    }

    /// Resolve a request
    pub fn grants(&self, request: &ConfirmRequest) -> bool {
        match self {
            Self::Forced => true,
            Self::Interactive(confirmer) => confirmer.confirm(request),
            Self::NonInteractive => false,
        }
    }
}

impl fmt::Debug for Approval<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => write!(f, "Forced"),
            Self::Interactive(_) => write!(f, "Interactive"),
            Self::NonInteractive => write!(f, "NonInteractive"),
        }
    }
}

/// What happened to an open policy when a scoped range was added
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenPolicyChange {
    /// The credential had no sentinel ranges
    NotOpen,
    /// These sentinel ranges were removed
    Removed(Vec<IpNet>),
    /// Removal was declined; the sentinels are still in place
    Retained,
}

/// Result of adding a range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added {
        cidr: IpNet,
        open_policy: OpenPolicyChange,
    },
    AlreadyPresent(IpNet),
}

/// Result of removing a range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed(IpNet),
    /// The range is not configured for the credential (holds the input as given)
    NotFound(String),
    Cancelled,
}

/// Result of resetting to the open policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Reset,
    Cancelled,
}

/// Summary of a credential's range set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    /// No ranges: every address is denied
    DenyAll,
    /// Both sentinel ranges are present
    Open,
    /// Exactly one sentinel range is present
    PartiallyOpen,
    /// Only scoped ranges
    Restricted,
}

impl PolicyState {
    pub fn from_ranges(ranges: &[IpNet]) -> Self {
        if ranges.is_empty() {
            return Self::DenyAll;
        }

        let v4 = ranges.iter().any(|r| matches!(r, IpNet::V4(_)) && is_open_sentinel(r));
        let v6 = ranges.iter().any(|r| matches!(r, IpNet::V6(_)) && is_open_sentinel(r));

        match (v4, v6) {
            (true, true) => Self::Open,
            (true, false) | (false, true) => Self::PartiallyOpen,
            (false, false) => Self::Restricted,
        }
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::DenyAll => "deny all",
            Self::Open => "open",
            Self::PartiallyOpen => "partially open",
            Self::Restricted => "restricted",
        };
        f.write_str(text)
    }
}
