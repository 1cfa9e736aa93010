//! Query resolution: finds the query file holding a named query or query
//! group and cascades the three configuration layers into
//! [`QueryDefinition`]s.
//!
//! Layers, most specific last:
//! - `Defaults`: the `[queries]` table of the main configuration
//! - `Overrides`: the `[Overrides]` table of the query file
//! - `Section`: the query's own table
//!
//! For every overridable attribute the most specific layer that sets it wins.

use crate::core::config::{DebugFlags, QueriesSection};
use crate::core::error::{ConfigError, MultiQueryError, ResolutionError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

pub const GENERAL_SECTION: &str = "General";
pub const OVERRIDES_SECTION: &str = "Overrides";
const RESERVED_SECTIONS: &[&str] = &[GENERAL_SECTION, OVERRIDES_SECTION];

const KEY_QUERY: &str = "query";
const KEY_GROUP_NAME: &str = "group_name";
const KEY_OUTPUT_PATH: &str = "query_output_path";
const KEY_SUB_FOLDER: &str = "query_sub_folder";
const KEY_FILENAME: &str = "filename";
const KEY_DELIMITER: &str = "delimiter";
const KEY_PLATFORMS: &str = "platforms";

/// A fully resolved query. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefinition {
    pub name: String,
    pub query_text: String,
    pub output_path: PathBuf,
    pub sub_folder: Option<PathBuf>,
    pub filename_pattern: String,
    pub field_delimiter: u8,
    pub platform_list: Vec<String>,
}

impl QueryDefinition {
    /// Folder the output file lives in (`output_path[/sub_folder]`).
    pub fn output_dir(&self) -> PathBuf {
        match &self.sub_folder {
            Some(sub) => self.output_path.join(sub),
            None => self.output_path.clone(),
        }
    }

    /// Output file for this run, with `{query}` and `{rundate}` expanded.
    pub fn output_file(&self, rundate: &str) -> PathBuf {
        let filename = self
            .filename_pattern
            .replace("{query}", &self.name)
            .replace("{rundate}", rundate);
        self.output_dir().join(filename)
    }

    /// Remote query path sent to every node.
    pub fn remote_api(&self) -> String {
        let mut api = String::from("/2/query?");
        for platform in &self.platform_list {
            api.push_str("platform=");
            api.push_str(platform);
            api.push('&');
        }
        api.push_str("query=");
        api.push_str(&self.query_text);
        api.push_str("&format=json");
        api
    }
}

/// One configuration layer. `None` means "not set at this layer".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub output_path: Option<String>,
    pub sub_folder: Option<String>,
    pub filename_pattern: Option<String>,
    pub field_delimiter: Option<String>,
    pub platform_list: Option<String>,
}

impl ConfigLayer {
    pub fn from_defaults(queries: &QueriesSection) -> Self {
        Self {
            output_path: Some(queries.query_output_path.to_string_lossy().into_owned()),
            sub_folder: None,
            filename_pattern: Some(queries.filename.clone()),
            field_delimiter: Some(queries.delimiter.clone()),
            platform_list: Some(queries.platforms.clone()),
        }
    }

    pub fn from_table(table: &toml::Table) -> Self {
        Self {
            output_path: scalar(table, KEY_OUTPUT_PATH),
            sub_folder: scalar(table, KEY_SUB_FOLDER),
            filename_pattern: scalar(table, KEY_FILENAME),
            field_delimiter: scalar(table, KEY_DELIMITER),
            platform_list: scalar(table, KEY_PLATFORMS),
        }
    }

    /// Lay `specific` over `self`: every attribute `specific` sets wins.
    pub fn overlay(&self, specific: &ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            output_path: specific.output_path.clone().or_else(|| self.output_path.clone()),
            sub_folder: specific.sub_folder.clone().or_else(|| self.sub_folder.clone()),
            filename_pattern: specific
                .filename_pattern
                .clone()
                .or_else(|| self.filename_pattern.clone()),
            field_delimiter: specific
                .field_delimiter
                .clone()
                .or_else(|| self.field_delimiter.clone()),
            platform_list: specific
                .platform_list
                .clone()
                .or_else(|| self.platform_list.clone()),
        }
    }
}

/// Defaults, then Overrides, then Section.
pub fn cascade(
    defaults: &ConfigLayer,
    overrides: Option<&ConfigLayer>,
    section: &ConfigLayer,
) -> ConfigLayer {
    let base = match overrides {
        Some(overrides) => defaults.overlay(overrides),
        None => defaults.clone(),
    };
    base.overlay(section)
}

fn scalar(table: &toml::Table, key: &str) -> Option<String> {
    match table.get(key)? {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Table(_) | toml::Value::Array(_) => None,
        other => Some(other.to_string()),
    }
}

/// Split a comma-separated platform list. Empty entries are dropped; an
/// empty result is an error.
pub fn parse_platforms(raw: &str) -> Result<Vec<String>, ConfigError> {
    let platforms = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if platforms.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: KEY_PLATFORMS.to_string(),
            reason: "at least one platform qualifier is required".to_string(),
        });
    }
    Ok(platforms)
}

/// A single ASCII character, or `\t` / `tab` for a tab.
pub fn parse_delimiter(raw: &str) -> Result<u8, ConfigError> {
    match raw {
        "\\t" | "tab" | "\t" => return Ok(b'\t'),
        _ => {}
    }
    let bytes = raw.as_bytes();
    if bytes.len() == 1 && bytes[0].is_ascii() {
        Ok(bytes[0])
    } else {
        Err(ConfigError::InvalidValue {
            key: KEY_DELIMITER.to_string(),
            reason: format!("expected a single ASCII character, found \"{}\"", raw),
        })
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The query file the definitions came from.
    pub source: PathBuf,
    pub queries: Vec<QueryDefinition>,
}

pub struct ConfigResolver {
    defaults: ConfigLayer,
    pattern: String,
    debug: DebugFlags,
}

impl ConfigResolver {
    pub fn new(queries: &QueriesSection, debug: DebugFlags) -> Self {
        let pattern = queries
            .query_path
            .join(&queries.query_pattern)
            .to_string_lossy()
            .into_owned();
        Self {
            defaults: ConfigLayer::from_defaults(queries),
            pattern,
            debug,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Query files matching the discovery pattern, in sorted path order.
    pub fn discover(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let paths = glob::glob(&self.pattern).map_err(|e| ConfigError::Pattern {
            pattern: self.pattern.clone(),
            reason: e.to_string(),
        })?;
        let files = paths
            .filter_map(|entry| match entry {
                Ok(path) if path.is_file() => Some(path),
                Ok(_) => None,
                Err(e) => {
                    warn!("Skipping unreadable query path: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();
        if files.is_empty() {
            return Err(ConfigError::NoQueryFiles {
                pattern: self.pattern.clone(),
            });
        }
        Ok(files)
    }

    /// Resolve a named query (`is_group == false`) or a named query group.
    pub fn resolve(&self, name: &str, is_group: bool) -> Result<Resolution, MultiQueryError> {
        let files = self.discover()?;
        let Some((source, table)) = self.find_file(&files, name, is_group) else {
            let err = ResolutionError::NotFound {
                name: name.to_string(),
                pattern: self.pattern.clone(),
            };
            error!("{}", err);
            return Err(err.into());
        };

        let overrides = table
            .get(OVERRIDES_SECTION)
            .and_then(toml::Value::as_table)
            .map(ConfigLayer::from_table);

        let mut queries = Vec::new();
        if is_group {
            for (section, value) in &table {
                if RESERVED_SECTIONS.contains(&section.as_str()) {
                    continue;
                }
                let Some(section_table) = value.as_table() else {
                    continue;
                };
                if let Some(query) =
                    self.build_query(&source, section, section_table, overrides.as_ref())
                {
                    queries.push(query);
                }
            }
        } else if let Some(section_table) = table.get(name).and_then(toml::Value::as_table) {
            if let Some(query) = self.build_query(&source, name, section_table, overrides.as_ref()) {
                queries.push(query);
            }
        }

        if queries.is_empty() {
            let err = ResolutionError::NoValidQueries {
                name: name.to_string(),
                path: source,
            };
            error!("{}", err);
            return Err(err.into());
        }
        Ok(Resolution { source, queries })
    }

    fn find_file(
        &self,
        files: &[PathBuf],
        name: &str,
        is_group: bool,
    ) -> Option<(PathBuf, toml::Table)> {
        for path in files {
            debug!(
                "Looking for query {} \"{}\". Reading file: {}",
                if is_group { "group" } else { "section" },
                name,
                path.display()
            );
            let Some(table) = read_query_file(path) else {
                continue;
            };
            let matched = if is_group {
                table
                    .get(GENERAL_SECTION)
                    .and_then(toml::Value::as_table)
                    .and_then(|general| general.get(KEY_GROUP_NAME))
                    .and_then(toml::Value::as_str)
                    .is_some_and(|group| group == name)
            } else {
                !RESERVED_SECTIONS.contains(&name)
                    && table.get(name).is_some_and(toml::Value::is_table)
            };
            if matched {
                return Some((path.clone(), table));
            }
        }
        None
    }

    fn build_query(
        &self,
        source: &Path,
        section: &str,
        table: &toml::Table,
        overrides: Option<&ConfigLayer>,
    ) -> Option<QueryDefinition> {
        let Some(query_text) = table.get(KEY_QUERY).and_then(toml::Value::as_str) else {
            error!(
                "Configuration file for query \"{}\" ({}) is missing the required \"{}\" keyword",
                section,
                source.display(),
                KEY_QUERY
            );
            return None;
        };

        let layer = cascade(&self.defaults, overrides, &ConfigLayer::from_table(table));
        match finish(section, query_text, layer) {
            Ok(query) => {
                if self.debug.general {
                    debug!("Resolved query: {:?}", query);
                }
                Some(query)
            }
            Err(e) => {
                error!("Skipping query \"{}\" ({}): {}", section, source.display(), e);
                None
            }
        }
    }
}

fn read_query_file(path: &Path) -> Option<toml::Table> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Unable to read query file {}: {}", path.display(), e);
            return None;
        }
    };
    match content.parse::<toml::Table>() {
        Ok(table) => Some(table),
        Err(e) => {
            warn!("Unable to parse query file {}: {}", path.display(), e);
            None
        }
    }
}

fn finish(name: &str, query_text: &str, layer: ConfigLayer) -> Result<QueryDefinition, ConfigError> {
    let required = |value: Option<String>, key: &str| {
        value.ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "not set at any configuration layer".to_string(),
        })
    };
    let output_path = required(layer.output_path, KEY_OUTPUT_PATH)?;
    let filename_pattern = required(layer.filename_pattern, KEY_FILENAME)?;
    let field_delimiter = parse_delimiter(&required(layer.field_delimiter, KEY_DELIMITER)?)?;
    let platform_list = parse_platforms(&required(layer.platform_list, KEY_PLATFORMS)?)?;

    Ok(QueryDefinition {
        name: name.to_string(),
        query_text: query_text.to_string(),
        output_path: PathBuf::from(output_path),
        sub_folder: layer
            .sub_folder
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        filename_pattern,
        field_delimiter,
        platform_list,
    })
}
