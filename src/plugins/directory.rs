//! Directory service client: enumerates collection nodes and dispatches
//! remote commands. Composes a [`NodeClient`] for transport.

use crate::core::config::DirectorySection;
use crate::core::error::NodeCallError;
use crate::core::sink::Row;
use crate::core::time::format_elapsed;
use crate::plugins::node::{NodeClient, NodeRef};
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{debug, warn};

/// Node status reported by the directory for reachable nodes.
pub const CONNECTED_STATUS: &str = "CONNECTED";

pub struct DirectoryClient<C: NodeClient> {
    client: C,
    list_nodes_api: String,
    remote_action_api: String,
    /// Credentials handed to every discovered node.
    node_credentials: String,
    debug: bool,
}

impl<C: NodeClient> DirectoryClient<C> {
    pub fn new(
        client: C,
        list_nodes_api: impl Into<String>,
        remote_action_api: impl Into<String>,
        node_credentials: impl Into<String>,
        debug: bool,
    ) -> Self {
        Self {
            client,
            list_nodes_api: list_nodes_api.into(),
            remote_action_api: remote_action_api.into(),
            node_credentials: node_credentials.into(),
            debug,
        }
    }

    /// Build from the `[directory]` table; nodes use `node_credentials`
    /// when given, otherwise the directory's own credentials.
    pub fn from_config(
        client: C,
        directory: &DirectorySection,
        node_credentials: Option<&str>,
        debug: bool,
    ) -> Self {
        let credentials = node_credentials
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(directory.credentials.as_str());
        Self::new(
            client,
            directory.list_nodes_api.as_str(),
            directory.remote_action_api.as_str(),
            credentials,
            debug,
        )
    }

    pub fn node(&self) -> &NodeRef {
        self.client.node()
    }

    /// Nodes known to the directory, each addressed on `port`. With
    /// `only_connected`, nodes whose status is not `CONNECTED` are skipped.
    pub fn list_nodes(&self, port: u16, only_connected: bool) -> Result<Vec<NodeRef>, NodeCallError> {
        let started = Instant::now();
        let entries = self.client.fetch_json(&self.list_nodes_api)?;
        let mut nodes = Vec::new();
        for entry in &entries {
            let shown = Value::Object(entry.clone());
            if self.debug {
                debug!("Processing directory entry: {}", shown);
            }
            let Some(address) = text_field(entry, "address") else {
                warn!("Skipping directory entry without an address: {}", shown);
                continue;
            };
            let name = text_field(entry, "name").unwrap_or(address);
            let status = text_field(entry, "status").unwrap_or_default();
            if only_connected && status != CONNECTED_STATUS {
                if self.debug {
                    debug!("Skipping disconnected node: {} ({})", name, status);
                }
                continue;
            }
            nodes.push(NodeRef::new(address, name, port, self.node_credentials.as_str()));
        }
        if self.debug {
            debug!(
                "List nodes returned {} of {} entries in {}",
                nodes.len(),
                entries.len(),
                format_elapsed(started.elapsed())
            );
        }
        Ok(nodes)
    }

    /// Ask the directory to run remote action `action_id` on `targets`.
    /// Returns `None` when the directory answers with no rows.
    pub fn dispatch(
        &self,
        action_id: &str,
        targets: &[String],
    ) -> Result<Option<Vec<Row>>, NodeCallError> {
        let payload = json!({
            "RemoteActionUid": action_id,
            "DeviceUids": targets,
        });
        if self.debug {
            debug!("Remote action payload: {}", payload);
        }
        let started = Instant::now();
        let rows = self.client.post_json(&self.remote_action_api, &payload)?;
        if self.debug {
            debug!(
                "Executed remote action on {} targets in {}",
                targets.len(),
                format_elapsed(started.elapsed())
            );
        }
        Ok(if rows.is_empty() { None } else { Some(rows) })
    }
}

fn text_field<'a>(entry: &'a Row, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
