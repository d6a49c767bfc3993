//! Command-line front end for the promptbench chat adapter.

pub mod chat;
pub mod config;
pub mod logging;
