/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::retention::{DEFAULT_RETENTION_DAYS, DEFAULT_SWEEP_INTERVAL_SECS};
use anyhow::{Context, Result};
use std::path::PathBuf;

pub const DEFAULT_FOLLOW_PAGE_SIZE: u32 = 30;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServiceConfig {
    /// DID of the account the feed generator record is published under.
    pub publisher_did: String,
    /// DID of this service (`did:web:<hostname>`).
    pub service_did: String,
    pub hostname: String,
    pub bind: String,
    pub sqlite_path: String,
    /// Jetstream endpoint delivering decoded firehose operations.
    pub firehose_endpoint: Option<String>,
    /// Seconds to wait before reconnecting a dropped firehose stream.
    pub firehose_reconnect_secs: Option<u64>,
    /// XRPC base for the canonical follow listing.
    pub follows_service_url: Option<String>,
    pub follow_page_size: Option<u32>,
    pub retention_days: Option<u32>,
    pub sweep_interval_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            publisher_did: "did:example:publisher".to_string(),
            service_did: "did:web:feed.example.invalid".to_string(),
            hostname: "feed.example.invalid".to_string(),
            bind: "127.0.0.1:3020".to_string(),
            sqlite_path: "quietfeed.db".to_string(),
            firehose_endpoint: None,
            firehose_reconnect_secs: None,
            follows_service_url: None,
            follow_page_size: None,
            retention_days: None,
            sweep_interval_secs: None,
            http_timeout_secs: None,
        }
    }
}

impl ServiceConfig {
    pub fn follow_page_size(&self) -> u32 {
        self.follow_page_size.unwrap_or(DEFAULT_FOLLOW_PAGE_SIZE).max(1)
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS).max(1)
    }

    pub fn sweep_interval_secs(&self) -> u64 {
        self.sweep_interval_secs.unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
    }

    pub fn firehose_reconnect_secs(&self) -> u64 {
        self.firehose_reconnect_secs.unwrap_or(3).max(1)
    }

    pub fn follows_service_url(&self) -> &str {
        self.follows_service_url
            .as_deref()
            .unwrap_or("https://bsky.social")
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("quietfeed")
        .join("config.json")
}

pub fn load_config(text: &str) -> Result<ServiceConfig> {
    serde_json::from_str(text).context("parse config json")
}
