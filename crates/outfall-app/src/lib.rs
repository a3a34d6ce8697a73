//! Resumable harvester for EPA ECHO discharge-monitoring records.

pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod harvest;
pub mod logging;
pub mod maintenance;
pub mod paths;
