//! Storage backends for credential restrictions
//!
//! This module provides two storage backends:
//! 1. In-memory (for embedding in a request path and for tests)
//! 2. JSON file (durable, used by the admin CLI)

mod json_file;
mod memory;
mod traits;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use traits::{RangeEdit, RestrictionStore};
