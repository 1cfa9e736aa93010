use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors: anything that reaches `run()`'s caller aborts the process.
#[derive(Error, Debug)]
pub enum MultiQueryError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    #[error(transparent)]
    ResolutionError(#[from] ResolutionError),
    #[error("Logging setup error: {0}")]
    LoggingError(String),
}

impl MultiQueryError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            MultiQueryError::ConfigError(ConfigError::MissingSections { .. }) => 1,
            MultiQueryError::ConfigError(ConfigError::NoQueryFiles { .. }) => 2,
            MultiQueryError::ResolutionError(ResolutionError::NotFound { .. }) => 3,
            MultiQueryError::ResolutionError(ResolutionError::NoValidQueries { .. }) => 4,
            _ => 5,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file {} is missing the following required sections: {}", path.display(), sections.join(","))]
    MissingSections { path: PathBuf, sections: Vec<String> },
    #[error("No query configuration files were found in \"{pattern}\"")]
    NoQueryFiles { pattern: String },
    #[error("Failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
    #[error("Invalid query pattern \"{pattern}\": {reason}")]
    Pattern { pattern: String, reason: String },
    #[error("Invalid value for \"{key}\": {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("A configuration file containing the query group or named query \"{name}\" was not found in \"{pattern}\"")]
    NotFound { name: String, pattern: String },
    #[error("No valid queries were found for the query group or named query \"{name}\" in {}", path.display())]
    NoValidQueries { name: String, path: PathBuf },
}

/// A single node call that failed. Degrades to an empty result for that node.
#[derive(Error, Debug)]
pub enum NodeCallError {
    #[error("Unable to reach {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("Unable to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Output failures are isolated to the query being written.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Unable to create output folder {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Unable to open output file {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("Unable to write to output file {}: {source}", path.display())]
    Write { path: PathBuf, source: csv::Error },
    #[error("Unable to flush output file {}: {source}", path.display())]
    Flush { path: PathBuf, source: io::Error },
}

/// Email failures; always swallowed by the dispatcher after logging.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("SMTP error: {0}")]
    Smtp(String),
    #[error("Invalid address \"{address}\": {reason}")]
    Address { address: String, reason: String },
    #[error("Unable to compose message: {0}")]
    Compose(String),
    #[error("Attachment error for {}: {source}", path.display())]
    Attachment { path: PathBuf, source: io::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_map_to_distinct_exit_codes() {
        let codes = [
            MultiQueryError::from(ConfigError::MissingSections {
                path: PathBuf::from("a.toml"),
                sections: vec!["email".to_string()],
            }),
            MultiQueryError::from(ConfigError::NoQueryFiles {
                pattern: "q/*.toml".to_string(),
            }),
            MultiQueryError::from(ResolutionError::NotFound {
                name: "x".to_string(),
                pattern: "q/*.toml".to_string(),
            }),
            MultiQueryError::from(ResolutionError::NoValidQueries {
                name: "x".to_string(),
                path: PathBuf::from("q/x.toml"),
            }),
        ]
        .iter()
        .map(MultiQueryError::exit_code)
        .collect::<Vec<_>>();
        assert_eq!(codes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn missing_sections_lists_every_section() {
        let err = ConfigError::MissingSections {
            path: PathBuf::from(".multiquery.toml"),
            sections: vec!["email".to_string(), "node".to_string()],
        };
        assert!(err.to_string().ends_with("email,node"));
    }
}
