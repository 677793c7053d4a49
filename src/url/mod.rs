//! URL handling module for Ripple-Frontier
//!
//! This module provides URL fingerprinting, host extraction and slot keys.
//! A slot is the fairness unit used for backpressure: the host of a request,
//! or its resolved address when the downloader accounts load per IP.

mod domain;
mod fingerprint;

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export main functions
pub use domain::{extract_host, resolve_host, slot_key, SlotResolver};
pub use fingerprint::{domain_fingerprint, url_fingerprint};

/// How the downloader identifies slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Slot key is the hostname
    #[default]
    Domain,
    /// Slot key is the first resolved address of the hostname
    Ip,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain => write!(f, "domain"),
            Self::Ip => write!(f, "ip"),
        }
    }
}

/// Load information the downloader hands to the frontier on every cycle
///
/// `overused_keys` lists the slots that are currently at or over their
/// concurrency limit. Requests for those slots must be held back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloaderInfo {
    pub overused_keys: Vec<String>,
    pub key_type: KeyType,
}

impl DownloaderInfo {
    /// Creates downloader info for the given key type with no overused slots
    pub fn new(key_type: KeyType) -> Self {
        Self {
            overused_keys: Vec::new(),
            key_type,
        }
    }

    /// Creates downloader info with the given overused slots
    pub fn with_overused<I, S>(key_type: KeyType, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            overused_keys: keys.into_iter().map(Into::into).collect(),
            key_type,
        }
    }
}
