//! Sequential query execution across the node list.
//!
//! Each query walks `Created -> OutputOpened -> NodeIterating* -> Closed`.
//! Node failures contribute zero rows; an output failure ends that query
//! only. Every node, query and run leaves one line in the [`StatusLog`].

use crate::core::config::RunOptions;
use crate::core::output::{StatusLog, plural};
use crate::core::resolver::QueryDefinition;
use crate::core::sink::{OutputSchema, OutputSink, Row};
use crate::core::time::format_elapsed;
use crate::plugins::node::NodeClient;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    /// At least one row was retrieved.
    Completed,
    /// Every node answered with nothing (or failed); the file has no header.
    NoRows,
    /// The output folder or file could not be created; no node was called.
    OutputFailed(String),
}

/// Result of one query across every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    pub name: String,
    pub output_file: PathBuf,
    pub nodes_queried: usize,
    pub nodes_failed: usize,
    pub rows_retrieved: usize,
    pub rows_written: usize,
    pub batches_failed: usize,
    pub schema: Option<OutputSchema>,
    pub status: QueryStatus,
}

impl QueryOutcome {
    fn new(query: &QueryDefinition, output_file: PathBuf) -> Self {
        Self {
            name: query.name.clone(),
            output_file,
            nodes_queried: 0,
            nodes_failed: 0,
            rows_retrieved: 0,
            rows_written: 0,
            batches_failed: 0,
            schema: None,
            status: QueryStatus::NoRows,
        }
    }
}

pub struct QueryOrchestrator<'a> {
    options: &'a RunOptions,
    rundate: &'a str,
}

impl<'a> QueryOrchestrator<'a> {
    pub fn new(options: &'a RunOptions, rundate: &'a str) -> Self {
        Self { options, rundate }
    }

    /// Run every query against every node, in list order.
    pub fn run<C: NodeClient>(
        &self,
        nodes: &[C],
        queries: &[QueryDefinition],
        status: &mut StatusLog,
    ) -> Vec<QueryOutcome> {
        let started = Instant::now();
        let outcomes = queries
            .iter()
            .map(|query| self.run_query(nodes, query, status))
            .collect::<Vec<_>>();
        let line = format!(
            "Processed {} quer{} against {} node{} in {}",
            queries.len(),
            if queries.len() == 1 { "y" } else { "ies" },
            nodes.len(),
            plural(nodes.len()),
            format_elapsed(started.elapsed())
        );
        info!("{}", line);
        status.push(line);
        outcomes
    }

    fn run_query<C: NodeClient>(
        &self,
        nodes: &[C],
        query: &QueryDefinition,
        status: &mut StatusLog,
    ) -> QueryOutcome {
        let started = Instant::now();
        let output_file = query.output_file(self.rundate);
        let mut outcome = QueryOutcome::new(query, output_file.clone());
        if self.options.verbose {
            info!(
                "Running query \"{}\" against {} node{}",
                query.name,
                nodes.len(),
                plural(nodes.len())
            );
        }
        if self.options.debug.general {
            debug!("Remote query for \"{}\": {}", query.name, query.remote_api());
        }

        let sink = if self.options.exclude.files {
            debug!("Output file writes excluded; {} will not be created", output_file.display());
            None
        } else {
            match OutputSink::open(&output_file, query.field_delimiter) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    error!("{}", e);
                    let line = format!("Query \"{}\" skipped: {}", query.name, e);
                    status.push(line);
                    outcome.status = QueryStatus::OutputFailed(e.to_string());
                    return outcome;
                }
            }
        };

        let api = query.remote_api();
        for client in nodes {
            let line = self.query_node(client, query, &api, sink.as_ref(), &mut outcome);
            status.push(line);
        }

        if outcome.rows_retrieved > 0 {
            outcome.status = QueryStatus::Completed;
        }
        let target = if sink.is_some() {
            format!("written to {}", output_file.display())
        } else {
            "not written (output excluded)".to_string()
        };
        let line = format!(
            "Query \"{}\": {} row{} from {} of {} node{} {} in {}",
            query.name,
            outcome.rows_retrieved,
            plural(outcome.rows_retrieved),
            outcome.nodes_queried - outcome.nodes_failed,
            outcome.nodes_queried,
            plural(outcome.nodes_queried),
            target,
            format_elapsed(started.elapsed())
        );
        if outcome.rows_retrieved == 0 {
            warn!("{}", line);
        } else {
            info!("{}", line);
        }
        status.push(line);
        outcome
    }

    /// Query one node and hand its rows to the sink. Returns the node's
    /// status line.
    fn query_node<C: NodeClient>(
        &self,
        client: &C,
        query: &QueryDefinition,
        api: &str,
        sink: Option<&OutputSink>,
        outcome: &mut QueryOutcome,
    ) -> String {
        let node = client.node();
        let started = Instant::now();
        outcome.nodes_queried += 1;

        // Field-less rows would fix an empty schema.
        let rows: Vec<Row> = match client.fetch_json(api) {
            Ok(rows) => rows.into_iter().filter(|row| !row.is_empty()).collect(),
            Err(e) => {
                outcome.nodes_failed += 1;
                error!("{} {}: {}", node.label(), query.name, e);
                return format!(
                    "{} {}: call failed after {}: {}",
                    node.label(),
                    query.name,
                    format_elapsed(started.elapsed()),
                    e
                );
            }
        };
        let elapsed = format_elapsed(started.elapsed());
        if rows.is_empty() {
            if self.options.verbose {
                info!("{} {}: no results", node.label(), query.name);
            }
            return format!("{} {}: 0 rows in {}", node.label(), query.name, elapsed);
        }

        outcome.rows_retrieved += rows.len();
        let first_batch = outcome.schema.is_none();
        let schema = outcome
            .schema
            .get_or_insert_with(|| OutputSchema::from_rows(&rows));
        if first_batch && self.options.debug.general {
            debug!("Output columns for \"{}\": {:?}", query.name, schema.columns());
        }

        let mut line = format!(
            "{} {}: {} row{} in {}",
            node.label(),
            query.name,
            rows.len(),
            plural(rows.len()),
            elapsed
        );
        if let Some(sink) = sink {
            match sink.write(&rows, schema, first_batch) {
                Ok(written) => outcome.rows_written += written,
                Err(e) => {
                    outcome.batches_failed += 1;
                    error!("{}", e);
                    line.push_str(&format!(", write failed: {}", e));
                }
            }
        }
        if self.options.verbose {
            info!("{}", line);
        }
        line
    }
}
