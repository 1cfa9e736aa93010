//! Pipeline internals: configuration, query resolution, sequential execution
//! and output. Everything that talks to the network lives in `plugins`.

pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod resolver;
pub mod sink;
pub mod time;
