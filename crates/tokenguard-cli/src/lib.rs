//! # tokenguard-cli
//!
//! Administrative command line for per-token IP restrictions.

pub mod cli;
pub mod commands;
pub mod prompt;

pub use cli::{Cli, Command, ConfigAction, RestrictAction, TokenAction};
pub use commands::{App, Status};
pub use prompt::StdinConfirm;
