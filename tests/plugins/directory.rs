use multiquery::core::config::{DirectorySection, TlsSettings};
use multiquery::core::error::NodeCallError;
use multiquery::core::sink::Row;
use multiquery::plugins::directory::DirectoryClient;
use multiquery::plugins::node::{NodeClient, NodeRef};
use serde_json::{Value, json};
use std::cell::RefCell;

/// Directory endpoint replaying canned JSON and recording every call.
struct FakeDirectory {
    node: NodeRef,
    listing: Value,
    post_answer: Value,
    calls: RefCell<Vec<(String, Option<Value>)>>,
}

impl FakeDirectory {
    fn new(listing: Value) -> Self {
        Self {
            node: NodeRef::new("dir.example.com", "primary", 443, "ZGlyOnNlY3JldA=="),
            listing,
            post_answer: json!([]),
            calls: RefCell::new(Vec::new()),
        }
    }
}

fn to_rows(value: &Value) -> Vec<Row> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|i| i.as_object().cloned()).collect())
        .unwrap_or_default()
}

impl NodeClient for FakeDirectory {
    fn node(&self) -> &NodeRef {
        &self.node
    }

    fn fetch_table(&self, _api: &str) -> Result<Vec<Row>, NodeCallError> {
        Ok(Vec::new())
    }

    fn fetch_json(&self, api: &str) -> Result<Vec<Row>, NodeCallError> {
        self.calls.borrow_mut().push((api.to_string(), None));
        Ok(to_rows(&self.listing))
    }

    fn post_json(&self, api: &str, body: &Value) -> Result<Vec<Row>, NodeCallError> {
        self.calls.borrow_mut().push((api.to_string(), Some(body.clone())));
        Ok(to_rows(&self.post_answer))
    }
}

/// Lets a test keep inspecting the fake after handing it to a client.
impl NodeClient for &FakeDirectory {
    fn node(&self) -> &NodeRef {
        FakeDirectory::node(self)
    }

    fn fetch_table(&self, api: &str) -> Result<Vec<Row>, NodeCallError> {
        FakeDirectory::fetch_table(self, api)
    }

    fn fetch_json(&self, api: &str) -> Result<Vec<Row>, NodeCallError> {
        FakeDirectory::fetch_json(self, api)
    }

    fn post_json(&self, api: &str, body: &Value) -> Result<Vec<Row>, NodeCallError> {
        FakeDirectory::post_json(self, api, body)
    }
}

fn section() -> DirectorySection {
    DirectorySection {
        server: "dir.example.com".to_string(),
        name: "primary".to_string(),
        port: 443,
        credentials: "ZGlyOnNlY3JldA==".to_string(),
        list_nodes_api: "/api/configuration/v1/engines".to_string(),
        remote_action_api: "/api/remoteaction/v1/run".to_string(),
        tls: TlsSettings::default(),
    }
}

fn listing() -> Value {
    json!([
        {"name": "alpha", "address": "10.0.0.1", "status": "CONNECTED"},
        {"name": "beta", "address": "10.0.0.2", "status": "DISCONNECTED"},
        {"address": "10.0.0.3", "status": "CONNECTED"},
        {"name": "ghost", "status": "CONNECTED"}
    ])
}

#[test]
fn lists_only_connected_nodes_on_requested_port() {
    let client = DirectoryClient::from_config(FakeDirectory::new(listing()), &section(), None, false);
    let nodes = client.list_nodes(1671, true).unwrap();

    let names = nodes.iter().map(|n| n.logical_name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["alpha", "10.0.0.3"]);
    assert!(nodes.iter().all(|n| n.port == 1671));
    assert_eq!(nodes[0].address, "10.0.0.1");
}

#[test]
fn lists_every_addressable_node_when_not_filtering() {
    let client = DirectoryClient::from_config(FakeDirectory::new(listing()), &section(), None, true);
    let nodes = client.list_nodes(1671, false).unwrap();
    assert_eq!(nodes.len(), 3);
}

#[test]
fn node_credentials_fall_back_to_directory_credentials() {
    let client = DirectoryClient::from_config(FakeDirectory::new(listing()), &section(), None, false);
    let nodes = client.list_nodes(1671, true).unwrap();
    assert_eq!(nodes[0].credentials, "ZGlyOnNlY3JldA==");

    let client = DirectoryClient::from_config(
        FakeDirectory::new(listing()),
        &section(),
        Some("bm9kZTpzZWNyZXQ="),
        false,
    );
    let nodes = client.list_nodes(1671, true).unwrap();
    assert_eq!(nodes[0].credentials, "bm9kZTpzZWNyZXQ=");

    let client =
        DirectoryClient::from_config(FakeDirectory::new(listing()), &section(), Some("  "), false);
    let nodes = client.list_nodes(1671, true).unwrap();
    assert_eq!(nodes[0].credentials, "ZGlyOnNlY3JldA==");
}

#[test]
fn list_nodes_calls_configured_api() {
    let directory = FakeDirectory::new(listing());
    let client = DirectoryClient::from_config(&directory, &section(), None, false);
    client.list_nodes(1671, true).unwrap();
    assert_eq!(client.node().logical_name, "primary");
    assert_eq!(
        *directory.calls.borrow(),
        vec![("/api/configuration/v1/engines".to_string(), None)]
    );
}

#[test]
fn dispatch_posts_action_payload() {
    let mut directory = FakeDirectory::new(json!([]));
    directory.post_answer = json!([{"ActionId": "42", "Status": "Queued"}]);
    let client = DirectoryClient::new(
        &directory,
        "/api/nodes",
        "/api/remoteaction/v1/run",
        "ZGlyOnNlY3JldA==",
        false,
    );

    let targets = vec!["dev-1".to_string(), "dev-2".to_string()];
    let rows = client.dispatch("act-7", &targets).unwrap().unwrap();
    assert_eq!(rows[0]["Status"], json!("Queued"));

    let calls = directory.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "/api/remoteaction/v1/run");
    assert_eq!(
        calls[0].1,
        Some(json!({"RemoteActionUid": "act-7", "DeviceUids": ["dev-1", "dev-2"]}))
    );
}

#[test]
fn dispatch_without_rows_is_none() {
    let client = DirectoryClient::from_config(FakeDirectory::new(json!([])), &section(), None, false);
    assert!(client.dispatch("act-7", &[]).unwrap().is_none());
}
