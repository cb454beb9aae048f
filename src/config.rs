//! Configuration file loading.
//!
//! The file is TOML with a `[settings]` table and an ordered list of
//! `[[scripts]]` entries:
//!
//! ```toml
//! [settings]
//! username = "me@example.com"
//! password = "..."
//! refresh_time = "5"
//! reconnect_attempts = 3
//!
//! [[scripts]]
//! pattern = "^send "
//! handler = "/usr/share/makeme/scripts/sendfile.py"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::dispatch::PatternTable;
use crate::error::ConfigError;
use crate::mail::{Credentials, InboundEndpoint, OutboundEndpoint, Reload, SessionSettings};
use crate::schedule;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "MAKEME_CONFIG";

/// Overrides the password from the config file.
pub const PASSWORD_ENV: &str = "MAKEME_PASSWORD";

#[derive(Debug, Deserialize)]
struct ConfigFile {
    settings: RawSettings,
    #[serde(default)]
    scripts: Vec<ScriptEntry>,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    username: Option<String>,
    password: Option<String>,
    contact_address: Option<String>,
    refresh_time: Option<String>,
    reconnect_attempts: Option<u32>,
    #[serde(default = "default_backoff_secs")]
    reconnect_backoff_secs: u64,
    #[serde(default = "default_unsent_log")]
    unsent_save_location: PathBuf,
    #[serde(default = "default_attachment_dir")]
    attachment_dir: PathBuf,
    #[serde(default = "default_true")]
    send_welcome: bool,
    #[serde(default = "default_welcome_marker")]
    welcome_marker: PathBuf,
    log_file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_imap_server")]
    imap_server: String,
    #[serde(default = "default_imap_port")]
    imap_port: u16,
    #[serde(default = "default_true")]
    imap_use_ssl: bool,
    #[serde(default = "default_smtp_server")]
    smtp_server: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    #[serde(default = "default_true")]
    smtp_use_tls: bool,
}

/// One `[[scripts]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptEntry {
    pub pattern: String,
    pub handler: PathBuf,
}

fn default_backoff_secs() -> u64 {
    30
}

fn default_unsent_log() -> PathBuf {
    PathBuf::from("unsent_emails.log")
}

fn default_attachment_dir() -> PathBuf {
    std::env::temp_dir().join("makeme")
}

fn default_welcome_marker() -> PathBuf {
    PathBuf::from("makeme_welcome_sent")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_imap_server() -> String {
    "imap.gmail.com".to_string()
}

fn default_imap_port() -> u16 {
    993
}

fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: SecretString,
    pub contact_address: Option<String>,
    pub refresh_time: String,
    pub reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    pub unsent_save_location: PathBuf,
    pub attachment_dir: PathBuf,
    pub send_welcome: bool,
    /// Created once the welcome email has gone out.
    pub welcome_marker: PathBuf,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    pub imap: InboundEndpoint,
    pub smtp: OutboundEndpoint,
    pub scripts: Vec<ScriptEntry>,
}

impl Config {
    /// `$HOME/.makeme/makeme.toml`
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".makeme").join("makeme.toml"))
    }

    /// Pick the config file: explicit argument, then `MAKEME_CONFIG`, then
    /// the default location.
    pub fn resolve_path(arg: Option<String>) -> Result<PathBuf, ConfigError> {
        arg.map(PathBuf::from)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(Self::default_path)
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "config file".to_string(),
                hint: format!("Pass a path or set {CONFIG_ENV}."),
            })
    }

    /// Read and validate the file at `path`. `MAKEME_PASSWORD` wins over
    /// the file's password.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents, std::env::var(PASSWORD_ENV).ok())
    }

    pub fn from_toml(contents: &str, password_override: Option<String>) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let raw = file.settings;

        let username = required(raw.username, "settings.username", "The account to poll.")?;
        let password = required(
            password_override.or(raw.password),
            "settings.password",
            "Set it in the file or via MAKEME_PASSWORD.",
        )?;
        let refresh_time = required(
            raw.refresh_time,
            "settings.refresh_time",
            "For example \"5\", \":30\", \"/15\", \"s90\" or \"h1\".",
        )?;
        let reconnect_attempts = raw.reconnect_attempts.ok_or_else(|| ConfigError::MissingRequired {
            key: "settings.reconnect_attempts".to_string(),
            hint: "How many times to retry an unreachable mailbox.".to_string(),
        })?;

        if schedule::wait_for(&refresh_time, 0).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "settings.refresh_time".to_string(),
                message: format!("{refresh_time:?} is not a schedule expression"),
            });
        }

        let config = Self {
            username,
            password: SecretString::from(password),
            contact_address: raw.contact_address.filter(|a| !a.trim().is_empty()),
            refresh_time,
            reconnect_attempts,
            reconnect_backoff: Duration::from_secs(raw.reconnect_backoff_secs),
            unsent_save_location: raw.unsent_save_location,
            attachment_dir: raw.attachment_dir,
            send_welcome: raw.send_welcome,
            welcome_marker: raw.welcome_marker,
            log_file: raw.log_file,
            log_level: raw.log_level,
            imap: InboundEndpoint {
                host: raw.imap_server,
                port: raw.imap_port,
                secure: raw.imap_use_ssl,
            },
            smtp: OutboundEndpoint {
                host: raw.smtp_server,
                port: raw.smtp_port,
                use_tls: raw.smtp_use_tls,
            },
            scripts: file.scripts,
        };
        config.patterns()?;
        Ok(config)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            secret: self.password.clone(),
        }
    }

    /// Compile the `[[scripts]]` table in file order.
    pub fn patterns(&self) -> Result<PatternTable, ConfigError> {
        PatternTable::new(
            self.scripts
                .iter()
                .map(|s| (s.pattern.clone(), s.handler.clone())),
        )
        .map_err(|e| ConfigError::InvalidValue {
            key: "scripts.pattern".to_string(),
            message: e.to_string(),
        })
    }

    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        Ok(SessionSettings {
            credentials: self.credentials(),
            contact_address: self.contact_address.clone(),
            inbound: self.imap.clone(),
            outbound: self.smtp.clone(),
            reconnect_attempts: self.reconnect_attempts,
            schedule: self.refresh_time.clone(),
            patterns: self.patterns()?,
            attachment_dir: self.attachment_dir.clone(),
            unsent_log: self.unsent_save_location.clone(),
        })
    }

    /// The subset of settings a running session can pick up.
    pub fn reload(&self) -> Result<Reload, ConfigError> {
        Ok(Reload {
            credentials: self.credentials(),
            contact_address: self.contact_address.clone(),
            patterns: self.patterns()?,
            schedule: self.refresh_time.clone(),
        })
    }
}

fn required(value: Option<String>, key: &str, hint: &str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        })
}
