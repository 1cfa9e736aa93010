//! Main configuration file and per-run options.
//!
//! The main file is TOML with one table per concern. Every table listed in
//! [`REQUIRED_SECTIONS`] must be present; all missing ones are reported at
//! once.

use crate::core::error::{ConfigError, MultiQueryError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = ".multiquery.toml";

pub const REQUIRED_SECTIONS: &[&str] = &["general", "logging", "email", "directory", "node", "queries"];

pub const DEFAULT_NODE_PORT: u16 = 1671;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralSection,
    pub logging: LoggingSection,
    pub email: EmailSection,
    pub directory: DirectorySection,
    pub node: NodeSection,
    pub queries: QueriesSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSection {
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    pub log_path: PathBuf,
    #[serde(default = "default_log_basename")]
    pub log_basename: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSection {
    #[serde(default)]
    pub email_results: bool,
    #[serde(default)]
    pub email_server: Option<String>,
    #[serde(default = "default_email_port")]
    pub email_port: u16,
    #[serde(default = "default_email_timeout")]
    pub email_timeout: u64,
    #[serde(default)]
    pub email_from: String,
    #[serde(default)]
    pub email_recipients: String,
    #[serde(default = "default_email_subject")]
    pub email_subject: String,
    #[serde(default)]
    pub email_include_log: bool,
    #[serde(default)]
    pub email_zip_log: bool,
    #[serde(default)]
    pub email_remove_zip_log: bool,
}

impl EmailSection {
    /// Configured recipients, trimmed, blanks dropped.
    pub fn recipients(&self) -> Vec<String> {
        self.email_recipients
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// The configured SMTP server, if any non-blank one is set.
    pub fn server(&self) -> Option<&str> {
        self.email_server
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySection {
    pub server: String,
    #[serde(default)]
    pub name: String,
    pub port: u16,
    pub credentials: String,
    pub list_nodes_api: String,
    #[serde(default)]
    pub remote_action_api: String,
    #[serde(flatten)]
    pub tls: TlsSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_node_port")]
    pub port: u16,
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(flatten)]
    pub tls: TlsSettings,
}

/// Certificate checking for one HTTPS endpoint family.
///
/// `verify_tls = false` accepts any server certificate. `ca_bundle` names a
/// PEM file whose certificates replace the built-in trust roots.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsSettings {
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            verify_tls: true,
            ca_bundle: None,
        }
    }
}

/// Global defaults for query resolution (the `Defaults` layer).
#[derive(Debug, Clone, Deserialize)]
pub struct QueriesSection {
    pub query_path: PathBuf,
    #[serde(default = "default_query_pattern")]
    pub query_pattern: String,
    pub query_output_path: PathBuf,
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_platforms")]
    pub platforms: String,
}

fn default_log_basename() -> String {
    "multiquery".to_string()
}

fn default_email_port() -> u16 {
    25
}

fn default_email_timeout() -> u64 {
    30
}

fn default_email_subject() -> String {
    "[{env}] {query} results for {rundate}".to_string()
}

fn default_verify_tls() -> bool {
    true
}

fn default_node_port() -> u16 {
    DEFAULT_NODE_PORT
}

fn default_query_pattern() -> String {
    "*.toml".to_string()
}

fn default_filename() -> String {
    "{query}_{rundate}.csv".to_string()
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_platforms() -> String {
    "windows".to_string()
}

/// Load the main configuration file, reporting every missing required
/// section together.
pub fn load_app_config(path: &Path) -> Result<AppConfig, MultiQueryError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_app_config(path, &content)
}

pub fn parse_app_config(path: &Path, content: &str) -> Result<AppConfig, MultiQueryError> {
    let table = content
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let missing = REQUIRED_SECTIONS
        .iter()
        .filter(|section| !table.get(**section).is_some_and(toml::Value::is_table))
        .map(|section| section.to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ConfigError::MissingSections {
            path: path.to_path_buf(),
            sections: missing,
        }
        .into());
    }

    let config: AppConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

/// Per-component debug logging switches, threaded through every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub node: bool,
    pub general: bool,
    pub directory: bool,
}

impl DebugFlags {
    pub const VALID_LETTERS: &'static str = "ngd";

    pub fn all() -> Self {
        Self {
            node: true,
            general: true,
            directory: true,
        }
    }

    pub fn any(&self) -> bool {
        self.node || self.general || self.directory
    }

    /// Parse letters such as `"ng"` or `"n,d"`. An empty string enables all.
    pub fn parse(letters: &str) -> Result<Self, String> {
        let letters = letters.replace(',', "");
        if letters.is_empty() {
            return Ok(Self::all());
        }
        let mut flags = Self::default();
        let mut bad = String::new();
        for c in letters.chars() {
            match c {
                'n' => flags.node = true,
                'g' => flags.general = true,
                'd' => flags.directory = true,
                other => bad.push(other),
            }
        }
        if !bad.is_empty() {
            return Err(format!(
                "may only include one or more of the following letters: {}; found {}",
                Self::VALID_LETTERS,
                bad
            ));
        }
        Ok(flags)
    }
}

/// Operations excluded from the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExcludeFlags {
    pub files: bool,
}

impl ExcludeFlags {
    pub const VALID_LETTERS: &'static str = "f";

    pub fn parse(letters: &str) -> Result<Self, String> {
        let letters = letters.replace(',', "");
        if letters.is_empty() {
            return Ok(Self { files: true });
        }
        let mut flags = Self::default();
        let mut bad = String::new();
        for c in letters.chars() {
            match c {
                'f' => flags.files = true,
                other => bad.push(other),
            }
        }
        if !bad.is_empty() {
            return Err(format!(
                "may only include one or more of the following letters: {}; found {}",
                Self::VALID_LETTERS,
                bad
            ));
        }
        Ok(flags)
    }
}

/// Options that shape one invocation. Created once, passed by reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub verbose: bool,
    pub debug: DebugFlags,
    pub exclude: ExcludeFlags,
}

impl RunOptions {
    pub fn new(verbose: bool, debug: DebugFlags, exclude: ExcludeFlags) -> Self {
        Self {
            // Debug implies verbose.
            verbose: verbose || debug.any(),
            debug,
            exclude,
        }
    }
}

/// Host name of this machine, lowercased.
pub fn hostname() -> String {
    ::hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
