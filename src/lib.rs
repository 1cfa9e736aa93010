//! multiquery: run one analytic query, or a named group of them, against
//! every connected collection node and gather the answers.
//!
//! A run is strictly sequential:
//!
//! 1. Load the main configuration and open the run log
//! 2. Resolve the named query or query group from the query files
//! 3. Ask the directory service for the connected nodes
//! 4. Query each node in turn, appending its rows to one delimited file per query
//! 5. Email the accumulated status lines (optionally with the run log)
//!
//! # Configuration layers
//!
//! Output location, file name, delimiter and platform list cascade from the
//! `[queries]` table of the main configuration, through the `[Overrides]`
//! table of a query file, down to the query's own table. The most specific
//! layer that sets a value wins.
//!
//! # Failure isolation
//!
//! Only configuration and resolution problems abort a run (see
//! [`core::error::MultiQueryError::exit_code`]). A failing node contributes
//! no rows, a failing output file skips its query, and a failing email is
//! logged and forgotten.
//!
//! # Crate Structure
//!
//! - [`core`]: configuration, resolution, orchestration and output
//! - [`plugins`]: node, directory and mail collaborators

pub mod cli;
pub mod core;
pub mod plugins;

use crate::core::{
    config::{self, AppConfig, RunOptions},
    error,
    logging,
    orchestrator::QueryOrchestrator,
    output::{StatusLog, plural},
    resolver::ConfigResolver,
    time::{self, format_elapsed},
};
use crate::plugins::{
    directory::DirectoryClient,
    node::{self, HttpNodeClient, NodeRef},
    notify::{NotificationDispatcher, SmtpConnector, render_subject},
};

use crate::cli::Cli;
use clap::Parser;
use std::time::Instant;
use tracing::{error, info, warn};

pub fn run() -> Result<(), error::MultiQueryError> {
    let cli = Cli::parse();
    let started = Instant::now();
    let options = cli.run_options();

    let app = config::load_app_config(&cli.config)?;
    let rundate = time::rundate(chrono::Local::now());
    let host = config::hostname();
    let env = app.general.environment.as_str();

    let log_file = logging::log_file_path(&app.logging, &cli.name, env, &host, &rundate);
    println!("Logging to {}", log_file.display());
    logging::init_logging(&log_file, &options)?;
    info!(
        "Starting multiquery {} for {} \"{}\" (env {}, host {})",
        env!("CARGO_PKG_VERSION"),
        if cli.is_group() { "query group" } else { "query" },
        cli.name,
        env,
        host
    );

    let resolver = ConfigResolver::new(&app.queries, options.debug);
    let resolution = resolver.resolve(&cli.name, cli.is_group())?;
    info!(
        "Resolved {} quer{} from {}",
        resolution.queries.len(),
        if resolution.queries.len() == 1 { "y" } else { "ies" },
        resolution.source.display()
    );

    let directory_agent = node::build_agent(&app.directory.tls)?;
    let node_agent = node::build_agent(&app.node.tls)?;
    if !app.node.tls.verify_tls {
        warn!("Node certificates will not be verified");
    }

    let mut status = StatusLog::echoing();
    let nodes = connected_nodes(&app, directory_agent, &options, &mut status);
    let clients = nodes
        .into_iter()
        .map(|node| HttpNodeClient::new(node, node_agent.clone(), options.debug.node))
        .collect::<Vec<_>>();

    QueryOrchestrator::new(&options, &rundate).run(&clients, &resolution.queries, &mut status);
    info!("Total run time: {}", format_elapsed(started.elapsed()));

    let subject = render_subject(&app.email.email_subject, env, &cli.name, &rundate);
    let outcome = NotificationDispatcher::new(&app.email, options.debug.general).send(
        &SmtpConnector,
        &subject,
        status.lines(),
        Some(&log_file),
    );
    if options.verbose {
        info!("Notification outcome: {:?}", outcome);
    }
    Ok(())
}

/// Connected nodes from the directory. A failing directory yields no nodes;
/// the run continues so every query still gets its (empty) output file.
fn connected_nodes(
    app: &AppConfig,
    agent: ureq::Agent,
    options: &RunOptions,
    status: &mut StatusLog,
) -> Vec<NodeRef> {
    let directory = &app.directory;
    let endpoint = NodeRef::new(
        directory.server.as_str(),
        if directory.name.is_empty() {
            directory.server.as_str()
        } else {
            directory.name.as_str()
        },
        directory.port,
        directory.credentials.as_str(),
    );
    let client = DirectoryClient::from_config(
        HttpNodeClient::new(endpoint, agent, options.debug.directory),
        directory,
        app.node.credentials.as_deref(),
        options.debug.directory,
    );

    let started = Instant::now();
    match client.list_nodes(app.node.port, true) {
        Ok(nodes) => {
            let line = format!(
                "Retrieved {} connected node{} from directory {} in {}",
                nodes.len(),
                plural(nodes.len()),
                client.node().label(),
                format_elapsed(started.elapsed())
            );
            if nodes.is_empty() {
                warn!("{}", line);
            } else {
                info!("{}", line);
            }
            status.push(line);
            nodes
        }
        Err(e) => {
            error!("Unable to list nodes: {}", e);
            status.push(format!(
                "Unable to retrieve nodes from directory {}: {}",
                client.node().label(),
                e
            ));
            Vec::new()
        }
    }
}
