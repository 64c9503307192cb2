//! Credentials that IP restrictions are attached to

mod registry;
mod types;

pub use registry::CredentialRegistry;
pub use types::*;
