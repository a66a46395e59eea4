use serde::Deserialize;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use lettre::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot open {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("cannot deserialize settings: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("cannot deserialize settings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Seconds allowed for any single network operation.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_accounts: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub email: String,
    pub password: String,
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub forward: ForwardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImapConfig {
    pub server: String,
    pub port: u16,
    #[serde(default = "enabled_by_default")]
    pub use_ssl: bool,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub use_starttls: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForwardConfig {
    pub to: Vec<String>,
}

fn default_check_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    10
}

fn default_concurrency() -> usize {
    1
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn enabled_by_default() -> bool {
    true
}

impl Config {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn enabled_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|account| account.enabled)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.accounts.is_empty() {
            return invalid("no accounts configured");
        }
        if self.check_interval == 0 {
            return invalid("check_interval must be positive");
        }
        if self.timeout == 0 {
            return invalid("timeout must be positive");
        }
        if self.max_concurrent_accounts == 0 {
            return invalid("max_concurrent_accounts must be positive");
        }
        self.accounts.iter().try_for_each(AccountConfig::validate)
    }
}

impl AccountConfig {
    /// The part of the address after `@`, lowercased.
    pub fn domain(&self) -> String {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn proxy(&self) -> Option<(&str, u16)> {
        self.proxy
            .enabled
            .then_some((self.proxy.server.as_str(), self.proxy.port))
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let email = &self.email;
        if email.parse::<Address>().is_err() {
            return invalid(format!("account {:?} is not a valid address", email));
        }
        if self.password.is_empty() {
            return invalid(format!("account {}: empty password", email));
        }
        if self.imap.server.is_empty() || self.imap.port == 0 {
            return invalid(format!("account {}: imap server and port are required", email));
        }
        if self.smtp.server.is_empty() || self.smtp.port == 0 {
            return invalid(format!("account {}: smtp server and port are required", email));
        }
        if self.smtp.use_ssl && self.smtp.use_starttls {
            return invalid(format!("account {}: use_ssl and use_starttls are exclusive", email));
        }
        if self.proxy.enabled && (self.proxy.server.is_empty() || self.proxy.port == 0) {
            return invalid(format!("account {}: enabled proxy needs server and port", email));
        }
        if self.enabled && self.forward.to.is_empty() {
            return invalid(format!("account {}: forward.to is empty", email));
        }
        if let Some(bad) = self.forward.to.iter().find(|to| to.parse::<Address>().is_err()) {
            return invalid(format!("account {}: bad forward address {:?}", email, bad));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> Result<(), SettingsError> {
    Err(SettingsError::Invalid(reason.into()))
}

pub fn load_settings(path: &Path) -> Result<Config, SettingsError> {
    let file = File::open(path).map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;

    let reader = BufReader::new(file);

    // .json files are JSON, anything else is YAML
    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config: Config = if is_json {
        serde_json::from_reader(reader)?
    } else {
        serde_yaml::from_reader(reader)?
    };

    config.validate()?;
    Ok(config)
}
