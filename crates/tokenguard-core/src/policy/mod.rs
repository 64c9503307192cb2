//! Per-credential IP access policy

mod manager;
mod types;

pub use manager::IpAccessPolicy;
pub use types::*;
