/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// One page from the canonical follow listing.
#[derive(Debug, Clone, Default)]
pub struct FollowPage {
    pub entries: Vec<String>,
    pub cursor: Option<String>,
}

/// The external source of truth for who an account follows.
#[async_trait]
pub trait FollowSource: Send + Sync {
    async fn list_follows_page(&self, account: &str, cursor: Option<&str>) -> Result<FollowPage>;
}

/// Fetches the whole canonical follow list, continuing page by page until a
/// short page signals the end.
pub async fn fetch_all_follows(
    source: &dyn FollowSource,
    account: &str,
    page_size: u32,
) -> Result<Vec<String>> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = source.list_follows_page(account, cursor.as_deref()).await?;
        let len = page.entries.len();
        all.extend(page.entries);
        if len < page_size as usize {
            break;
        }
        match page.cursor {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }
    Ok(all)
}

#[derive(Debug, Deserialize)]
struct ListRecordsResponse {
    records: Vec<ListedRecord>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedRecord {
    value: FollowValue,
}

#[derive(Debug, Deserialize)]
struct FollowValue {
    subject: String,
}

/// Canonical follow listing via `com.atproto.repo.listRecords` on the
/// account's PDS (or an appview that proxies it).
pub struct XrpcFollowSource {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
}

impl XrpcFollowSource {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, page_size: u32) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl FollowSource for XrpcFollowSource {
    async fn list_follows_page(&self, account: &str, cursor: Option<&str>) -> Result<FollowPage> {
        let url = format!(
            "{}/xrpc/com.atproto.repo.listRecords",
            self.base_url.trim_end_matches('/')
        );
        let mut query: Vec<(&str, String)> = vec![
            ("repo", account.to_string()),
            ("collection", "app.bsky.graph.follow".to_string()),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        let resp = self
            .http
            .get(url)
            .query(&query)
            .send()
            .await
            .context("listRecords request")?
            .error_for_status()
            .context("listRecords status")?;
        let body: ListRecordsResponse = resp.json().await.context("listRecords body")?;
        Ok(FollowPage {
            entries: body.records.into_iter().map(|r| r.value.subject).collect(),
            cursor: body.cursor,
        })
    }
}
