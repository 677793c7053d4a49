//! Configuration module for Ripple-Frontier
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use ripple_frontier::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("frontier.toml")).unwrap();
//! println!("Ordering policy: {}", config.frontier.policy);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{BusConfig, Config, CrawlerConfig, FrontierConfig, StorageConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
