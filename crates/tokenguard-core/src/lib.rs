//! # tokenguard-core
//!
//! Core tokenguard functionality including:
//! - Strict CIDR validation with canonical IPv4/IPv6 network forms
//! - Per-token IP allowlists with an explicit "open" sentinel policy
//! - In-memory and JSON file storage backends
//! - Token issuance and revocation for the admin CLI

pub mod cidr;
pub mod credential;
pub mod error;
pub mod policy;
pub mod settings;
pub mod storage;

pub use cidr::{is_open_sentinel, parse_address, parse_cidr, validate_cidr, OPEN_IPV4, OPEN_IPV6};
pub use credential::{AllowedRange, Credential, CredentialRegistry};
pub use error::{GuardError, Result};
pub use policy::{
    AddOutcome, Approval, Confirm, ConfirmRequest, IpAccessPolicy, PolicyState, RemoveOutcome,
    ResetOutcome,
};
pub use settings::{Settings, SettingsManager};
pub use storage::{JsonFileStore, MemoryStore, RangeEdit, RestrictionStore};
