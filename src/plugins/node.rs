//! Node client capability and its HTTP implementation.
//!
//! Every remote endpoint (collection node or directory service) is reached
//! through [`NodeClient`]. The HTTP client authenticates with a pre-encoded
//! Basic credential on every request.

use crate::core::config::TlsSettings;
use crate::core::error::{ConfigError, NodeCallError};
use crate::core::output::compact_line;
use crate::core::sink::Row;
use crate::core::time::format_elapsed;
use crate::plugins::{html, tls};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// A remote endpoint. Equality and hashing use `address` and `port` only.
#[derive(Clone, Eq)]
pub struct NodeRef {
    pub address: String,
    pub logical_name: String,
    pub port: u16,
    /// Base64 `user:password`, sent as HTTP Basic auth.
    pub credentials: String,
}

impl NodeRef {
    pub fn new(
        address: impl Into<String>,
        logical_name: impl Into<String>,
        port: u16,
        credentials: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            logical_name: logical_name.into(),
            port,
            credentials: credentials.into(),
        }
    }

    /// `[name (address)]`, used as the prefix of per-node status lines.
    pub fn label(&self) -> String {
        format!("[{} ({})]", self.logical_name, self.address)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("address", &self.address)
            .field("logical_name", &self.logical_name)
            .field("port", &self.port)
            .field("credentials", &"<redacted>")
            .finish()
    }
}

/// Capabilities of one remote endpoint.
///
/// Failures come back as [`NodeCallError`]; callers treat them as an empty
/// result for that endpoint.
pub trait NodeClient {
    fn node(&self) -> &NodeRef;

    /// Rows of the first HTML table under `<body>`.
    fn fetch_table(&self, api: &str) -> Result<Vec<Row>, NodeCallError>;

    /// Rows of a JSON response (array of objects, or a single object).
    fn fetch_json(&self, api: &str) -> Result<Vec<Row>, NodeCallError>;

    /// POST `body` as JSON; a non-JSON answer becomes one `{"text": ...}` row.
    fn post_json(&self, api: &str, body: &Value) -> Result<Vec<Row>, NodeCallError>;
}

/// Build the request URL for `api` on `address:port`.
///
/// Absolute `https://` APIs are kept. Whitespace runs collapse to a single
/// space, then spaces and `#` are percent-encoded.
pub fn format_api(address: &str, port: u16, api: &str) -> String {
    let url = if api.to_lowercase().starts_with("https://") {
        api.to_string()
    } else if api.starts_with('/') {
        format!("https://{}:{}{}", address, port, api)
    } else {
        format!("https://{}:{}/{}", address, port, api)
    };
    url.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(' ', "%20")
        .replace('#', "%23")
}

/// Turn a decoded JSON body into rows. Non-object array items are wrapped
/// as `{"value": item}`. Empty objects carry no fields and yield no row.
pub fn rows_from_json(value: Value) -> Vec<Row> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) if map.is_empty() => None,
                Value::Object(map) => Some(map),
                other => {
                    let mut map = Map::new();
                    map.insert("value".to_string(), other);
                    Some(map)
                }
            })
            .collect(),
        Value::Object(map) if map.is_empty() => Vec::new(),
        Value::Object(map) => vec![map],
        Value::Null => Vec::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            vec![map]
        }
    }
}

/// Rows for a POST response body.
pub fn rows_from_post_body(body: &str) -> Vec<Row> {
    match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Array(_) | Value::Object(_))) => rows_from_json(value),
        _ => {
            let mut map = Map::new();
            map.insert("text".to_string(), Value::String(body.to_string()));
            vec![map]
        }
    }
}

/// Blocking agent shared by every client of one endpoint family.
pub fn build_agent(settings: &TlsSettings) -> Result<ureq::Agent, ConfigError> {
    let mut builder = ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT);
    if let Some(config) = tls::client_config(settings)? {
        builder = builder.tls_config(config);
    }
    Ok(builder.build())
}

/// [`NodeClient`] over HTTPS using a blocking `ureq` agent.
pub struct HttpNodeClient {
    node: NodeRef,
    agent: ureq::Agent,
    debug: bool,
}

impl HttpNodeClient {
    pub fn new(node: NodeRef, agent: ureq::Agent, debug: bool) -> Self {
        Self { node, agent, debug }
    }

    fn url(&self, api: &str) -> String {
        format_api(&self.node.address, self.node.port, api)
    }

    fn authorization(&self) -> String {
        format!("Basic {}", self.node.credentials)
    }

    fn get(&self, api: &str) -> Result<(String, ureq::Response), NodeCallError> {
        let url = self.url(api);
        if self.debug {
            debug!("{} - GET {}", self.node.logical_name, url);
        }
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &self.authorization())
            .set("Accept", "application/json")
            .call()
            .map_err(|e| call_error(&url, e))?;
        if self.debug {
            debug!("{} - status {}", self.node.logical_name, response.status());
        }
        Ok((url, response))
    }

    fn trace_rows(&self, op: &str, rows: &[Row], started: Instant) {
        if self.debug {
            debug!(
                "{} - {} retrieved {} objects in {}",
                self.node.logical_name,
                op,
                rows.len(),
                format_elapsed(started.elapsed())
            );
            if let Some(first) = rows.first() {
                let preview = compact_line(&Value::Object(first.clone()).to_string(), 200);
                debug!("{} - first row: {}", self.node.logical_name, preview);
            }
        }
    }
}

fn call_error(url: &str, err: ureq::Error) -> NodeCallError {
    match err {
        ureq::Error::Status(status, _) => NodeCallError::Status {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => NodeCallError::Unreachable {
            url: url.to_string(),
            reason: transport.to_string(),
        },
    }
}

impl NodeClient for HttpNodeClient {
    fn node(&self) -> &NodeRef {
        &self.node
    }

    fn fetch_table(&self, api: &str) -> Result<Vec<Row>, NodeCallError> {
        let started = Instant::now();
        let (url, response) = self.get(api)?;
        let body = response.into_string().map_err(|e| NodeCallError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let rows = html::parse_first_table(&body);
        self.trace_rows("fetch_table", &rows, started);
        Ok(rows)
    }

    fn fetch_json(&self, api: &str) -> Result<Vec<Row>, NodeCallError> {
        let started = Instant::now();
        let (url, response) = self.get(api)?;
        let value = response
            .into_json::<Value>()
            .map_err(|e| NodeCallError::Decode {
                url,
                reason: e.to_string(),
            })?;
        let rows = rows_from_json(value);
        self.trace_rows("fetch_json", &rows, started);
        Ok(rows)
    }

    fn post_json(&self, api: &str, body: &Value) -> Result<Vec<Row>, NodeCallError> {
        let started = Instant::now();
        let url = self.url(api);
        if self.debug {
            debug!("{} - POST {} body {}", self.node.logical_name, url, body);
        }
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &self.authorization())
            .set("Accept", "application/json")
            .set("Content-Type", "application/json")
            .send_json(body)
            .map_err(|e| call_error(&url, e))?;
        let text = response.into_string().map_err(|e| NodeCallError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let rows = rows_from_post_body(&text);
        self.trace_rows("post_json", &rows, started);
        Ok(rows)
    }
}
