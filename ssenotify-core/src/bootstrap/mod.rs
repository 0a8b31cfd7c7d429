//! Bootstrap helpers for the `ssenotify` server
//!
//! This module handles configuration discovery and validation.

pub mod config;

pub use config::load_config;
