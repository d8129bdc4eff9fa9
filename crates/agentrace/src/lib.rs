#![forbid(unsafe_code)]

pub mod adapters;
pub mod aggregate;
pub mod cli;
pub mod config;
pub mod ingest;
pub mod models;
pub mod notes;
pub mod sqlite;
pub mod trace_files;
pub mod utils;
pub mod validate;
pub mod vcs;

pub use cli::app::{Cli, Command};
