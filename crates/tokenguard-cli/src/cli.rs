//! Command-line argument definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// tokenguard - Manage IP restrictions for API tokens
#[derive(Parser, Debug)]
#[command(name = "tokenguard")]
#[command(version)]
#[command(about = "Manage IP restrictions for API authentication tokens")]
pub struct Cli {
    /// Data directory holding restrictions.json and settings.json
    #[arg(long, env = "TOKENGUARD_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage IP restrictions for a token
    Restrict {
        /// Full token key to manage
        token: String,

        #[command(flatten)]
        action: RestrictArgs,

        /// Force the operation without confirmation
        #[arg(long)]
        force: bool,
    },

    /// Check whether an address may use a token
    Check {
        /// Full token key
        token: String,

        /// Source IP address
        address: String,
    },

    /// Validate CIDR notation
    Validate {
        /// Network in CIDR notation
        cidr: String,
    },

    /// Token management commands
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Exactly one restriction action
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct RestrictArgs {
    /// Add an IP restriction (CIDR notation, e.g., 192.168.1.0/24)
    #[arg(long, value_name = "CIDR")]
    pub add: Option<String>,

    /// Remove an IP restriction (CIDR notation)
    #[arg(long, value_name = "CIDR")]
    pub remove: Option<String>,

    /// Reset to default open policy (0.0.0.0/0 and ::/0)
    #[arg(long)]
    pub reset: bool,

    /// List current IP restrictions for this token
    #[arg(long)]
    pub list: bool,
}

/// A single restriction action, as selected on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictAction {
    Add(String),
    Remove(String),
    Reset,
    List,
}

impl From<RestrictArgs> for RestrictAction {
    fn from(args: RestrictArgs) -> Self {
        match (args.add, args.remove) {
            (Some(cidr), _) => Self::Add(cidr),
            (_, Some(cidr)) => Self::Remove(cidr),
            _ if args.reset => Self::Reset,
            _ => Self::List,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum TokenAction {
    /// Issue a new API token
    Issue {
        /// Name of the user the token belongs to
        #[arg(short, long)]
        owner: String,

        /// Register an existing key instead of generating one
        #[arg(long)]
        key: Option<String>,

        /// Start with no allowed ranges instead of the open policy
        #[arg(long)]
        restricted: bool,
    },

    /// List all tokens
    List,

    /// Revoke a token and delete its IP restrictions
    Revoke {
        /// Full token key
        token: String,

        /// Force the operation without confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the current settings
    Show,

    /// Change one or more settings
    Set {
        /// Log filter used when RUST_LOG is not set (e.g. "info", "tokenguard_core=debug")
        #[arg(long, value_name = "FILTER")]
        log_filter: Option<String>,

        /// Whether newly issued tokens start with the open policy
        #[arg(long, value_name = "BOOL", action = clap::ArgAction::Set)]
        open_policy_on_issue: Option<bool>,
    },
}
