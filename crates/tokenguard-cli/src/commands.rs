//! Command handlers
//!
//! Handlers write human-readable status lines to the given output and leave
//! terminal prompting to the supplied confirmer.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tokenguard_core::policy::OpenPolicyChange;
use tokenguard_core::{
    validate_cidr, AddOutcome, Approval, Confirm, ConfirmRequest, CredentialRegistry,
    IpAccessPolicy, JsonFileStore, PolicyState, RemoveOutcome, ResetOutcome, RestrictionStore,
    Result, Settings, SettingsManager,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, ConfigAction, RestrictAction, TokenAction};

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// The operator declined a confirmation; nothing changed
    Cancelled,
    Failed,
}

impl Status {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success | Self::Cancelled => 0,
            Self::Failed => 1,
        }
    }
}

/// Everything a command needs to run
pub struct App {
    pub policy: IpAccessPolicy,
    pub registry: CredentialRegistry,
    pub settings: SettingsManager,
}

impl App {
    /// Open the JSON store in `data_dir`
    pub fn open(data_dir: &Path, settings: SettingsManager) -> Result<Self> {
        let storage = JsonFileStore::open(data_dir.to_path_buf())?;
        debug!("Using {} at {:?}", storage.backend_name(), storage.storage_dir());
        Ok(Self::with_storage(Arc::new(storage), settings))
    }

    pub fn with_storage(storage: Arc<dyn RestrictionStore>, settings: SettingsManager) -> Self {
        Self {
            policy: IpAccessPolicy::new(storage.clone()),
            registry: CredentialRegistry::new(storage),
            settings,
        }
    }

    /// Run a parsed command
    pub async fn run(&mut self, command: Command, confirmer: &dyn Confirm, out: &mut dyn Write) -> Result<Status> {
        match command {
            Command::Restrict { token, action, force } => {
                let approval = Approval::new(force, confirmer);
                self.restrict(&token, action.into(), approval, out).await
            }
            Command::Check { token, address } => self.check(&token, &address, out).await,
            Command::Validate { cidr } => validate(&cidr, out),
            Command::Token { action } => self.token(action, confirmer, out).await,
            Command::Config { action } => self.config(action, out).await,
        }
    }

    /// Manage the IP restrictions of one token
    pub async fn restrict(
        &self,
        token: &str,
        action: RestrictAction,
        approval: Approval<'_>,
        out: &mut dyn Write,
    ) -> Result<Status> {
        let credential = self.registry.require(token).await?;
        writeln!(out, "Found token: {} (Owner: {})", credential.key, credential.owner)?;

        match action {
            RestrictAction::List => {
                let ranges = self.policy.list_ranges(token).await?;
                if ranges.is_empty() {
                    writeln!(out, "No IP restrictions (all access denied)")?;
                } else {
                    writeln!(out, "Current IP restrictions:")?;
                    for range in &ranges {
                        writeln!(out, "- {}", range)?;
                    }
                    writeln!(out, "Policy: {}", PolicyState::from_ranges(&ranges))?;
                }
                Ok(Status::Success)
            }

            RestrictAction::Reset => match self.policy.reset_to_open(token, approval).await? {
                ResetOutcome::Reset => {
                    writeln!(out, "Token reset to default open policy")?;
                    Ok(Status::Success)
                }
                ResetOutcome::Cancelled => cancelled(out),
            },

            RestrictAction::Add(cidr) => {
                match self.policy.add_range(token, &cidr, approval).await? {
                    AddOutcome::AlreadyPresent(net) => {
                        writeln!(out, "IP restriction {} already exists for this token", net)?;
                    }
                    AddOutcome::Added { cidr, open_policy } => {
                        match open_policy {
                            OpenPolicyChange::Removed(_) => writeln!(out, "Open policy removed")?,
                            OpenPolicyChange::Retained => writeln!(
                                out,
                                "Open policy retained: token still accepts any address"
                            )?,
                            OpenPolicyChange::NotOpen => {}
                        }
                        writeln!(out, "Added IP restriction: {}", cidr)?;
                    }
                }
                Ok(Status::Success)
            }

            RestrictAction::Remove(cidr) => match self.policy.remove_range(token, &cidr, approval).await? {
                RemoveOutcome::Removed(net) => {
                    writeln!(out, "Removed IP restriction: {}", net)?;
                    Ok(Status::Success)
                }
                RemoveOutcome::NotFound(text) => {
                    writeln!(out, "IP restriction {} not found for this token", text)?;
                    Ok(Status::Success)
                }
                RemoveOutcome::Cancelled => cancelled(out),
            },
        }
    }

    async fn check(&self, token: &str, address: &str, out: &mut dyn Write) -> Result<Status> {
        let allowed = self.policy.is_allowed_str(token, address).await?;
        writeln!(out, "{}", if allowed { "allowed" } else { "denied" })?;
        Ok(Status::Success)
    }

    async fn config(&mut self, action: ConfigAction, out: &mut dyn Write) -> Result<Status> {
        match action {
            ConfigAction::Show => {
                print_settings(self.settings.get(), out)?;
                writeln!(out, "({})", self.settings.path().display())?;
                Ok(Status::Success)
            }

            ConfigAction::Set { log_filter, open_policy_on_issue } => {
                if log_filter.is_none() && open_policy_on_issue.is_none() {
                    writeln!(out, "Nothing to change: pass --log-filter or --open-policy-on-issue")?;
                    return Ok(Status::Failed);
                }

                let mut settings = self.settings.get().clone();
                if let Some(filter) = log_filter {
                    if let Err(e) = EnvFilter::try_new(&filter) {
                        writeln!(out, "Invalid log filter '{}': {}", filter, e)?;
                        return Ok(Status::Failed);
                    }
                    settings.log_filter = filter;
                }
                if let Some(open) = open_policy_on_issue {
                    settings.open_policy_on_issue = open;
                }

                self.settings.update(settings).await?;
                info!("Updated settings in {:?}", self.settings.path());

                writeln!(out, "Settings saved")?;
                print_settings(self.settings.get(), out)?;
                Ok(Status::Success)
            }
        }
    }

    async fn token(&self, action: TokenAction, confirmer: &dyn Confirm, out: &mut dyn Write) -> Result<Status> {
        match action {
            TokenAction::Issue { owner, key, restricted } => {
                let open_policy = !restricted && self.settings.get().open_policy_on_issue;
                let credential = match key {
                    Some(key) => self.registry.issue_with_key(&key, &owner, open_policy).await?,
                    None => self.registry.issue(&owner, open_policy).await?,
                };

                writeln!(out, "Token issued for {}", credential.owner)?;
                writeln!(out, "  Token:  {}", credential.key)?;
                writeln!(
                    out,
                    "  Policy: {}",
                    if open_policy { PolicyState::Open } else { PolicyState::DenyAll }
                )?;
                Ok(Status::Success)
            }

            TokenAction::List => {
                let credentials = self.registry.list().await?;
                if credentials.is_empty() {
                    writeln!(out, "No tokens found")?;
                    return Ok(Status::Success);
                }

                writeln!(out, "{:<42} {:<20} {:<16} {:<6}", "Token", "Owner", "Policy", "Ranges")?;
                writeln!(out, "{}", "-".repeat(87))?;
                for credential in &credentials {
                    let ranges = self.policy.list_ranges(&credential.key).await?;
                    writeln!(
                        out,
                        "{:<42} {:<20} {:<16} {:<6}",
                        credential.key,
                        credential.owner,
                        PolicyState::from_ranges(&ranges).to_string(),
                        ranges.len()
                    )?;
                }
                Ok(Status::Success)
            }

            TokenAction::Revoke { token, force } => {
                let credential = self.registry.require(&token).await?;
                let request = ConfirmRequest::Revoke { key: credential.key.clone() };
                if !Approval::new(force, confirmer).grants(&request) {
                    return cancelled(out);
                }

                self.registry.revoke(&token).await?;
                writeln!(out, "Revoked token: {}", credential.key)?;
                Ok(Status::Success)
            }
        }
    }
}

fn print_settings(settings: &Settings, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "logFilter:         {}", settings.log_filter)?;
    writeln!(out, "openPolicyOnIssue: {}", settings.open_policy_on_issue)?;
    Ok(())
}

fn validate(cidr: &str, out: &mut dyn Write) -> Result<Status> {
    if validate_cidr(cidr) {
        writeln!(out, "valid")?;
        Ok(Status::Success)
    } else {
        writeln!(out, "invalid")?;
        Ok(Status::Failed)
    }
}

fn cancelled(out: &mut dyn Write) -> Result<Status> {
    writeln!(out, "Operation cancelled")?;
    Ok(Status::Cancelled)
}
