pub mod client;
pub mod commands;
pub mod diff;
pub mod error;
pub mod fanout;
pub mod manifest;
pub mod process;
pub mod reconcile;
pub mod resources;
pub mod spec;
pub mod telemetry;
pub mod term;
#[cfg(test)]
pub mod test_utils;
pub mod workflow;
pub mod yaml;
