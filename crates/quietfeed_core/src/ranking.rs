/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::ingest::now_iso;
use crate::store::GraphStore;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

pub const DEFAULT_LIMIT: u32 = 30;
pub const MAX_LIMIT: u32 = 100;

/// Candidate pages are overfetched to absorb threshold filtering downstream.
const OVERFETCH: u32 = 4;

pub const REASON_REPOST: &str = "app.bsky.feed.defs#skeletonReasonRepost";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkeletonReason {
    #[serde(rename = "$type")]
    pub kind: String,
    /// The amplifying record's own uri.
    pub repost: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedItem {
    pub post: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkeletonReason>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FeedPage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub feed: Vec<FeedItem>,
}

#[derive(Debug, Clone)]
struct AuthorStats {
    votes_avg: f64,
    post_rate: f64,
}

/// Geometric mean of an author's vote counts, via the mean of natural logs.
/// A handful of outlier posts should not dominate the average. Counts are
/// floored at 1 so zero-vote posts stay out of `ln(0)`.
fn geometric_mean_votes(votes: &[i64]) -> f64 {
    if votes.is_empty() {
        return 1.0;
    }
    let sum: f64 = votes.iter().map(|v| ((*v).max(1) as f64).ln()).sum();
    (sum / votes.len() as f64).exp()
}

/// Log-compressed relative prolificacy against the network baseline.
fn post_rate(posts_by_user: u64, user_posts_avg: f64) -> f64 {
    (posts_by_user as f64 / user_posts_avg).ln()
}

/// The dynamic admission bar: the lowest `post_rate` among the top
/// `floor(ln(n))` most prolific followed accounts. An empty subset
/// (n <= 2) falls back to 1.0.
fn admission_limit(rates_desc: &[f64]) -> f64 {
    let n = rates_desc.len();
    if n == 0 {
        return 1.0;
    }
    let k = (n as f64).ln().floor() as usize;
    if k == 0 {
        return 1.0;
    }
    rates_desc[k.min(n) - 1]
}

/// Accounts posting above their fair share need proportionally more votes
/// per post to surface; quieter accounts get a lower bar.
fn votes_threshold(author_rate: f64, post_limit: f64, votes_avg: f64) -> f64 {
    (author_rate - post_limit) * votes_avg
}

/// Produces one ranked, cursor-paginated feed page for the requester.
/// Reads whatever state exists at query time; staleness is accepted.
pub async fn build_feed(
    store: &GraphStore,
    requester: &str,
    cursor: Option<String>,
    limit: Option<u32>,
) -> Result<FeedPage> {
    let store = store.clone();
    let requester = requester.to_string();
    let page = tokio::task::spawn_blocking(move || build_feed_blocking(&store, &requester, cursor, limit)).await??;
    Ok(page)
}

fn build_feed_blocking(
    store: &GraphStore,
    requester: &str,
    cursor: Option<String>,
    limit: Option<u32>,
) -> Result<FeedPage> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let (total_posts, distinct_authors) = store.network_post_stats()?;
    if total_posts == 0 || distinct_authors == 0 {
        return Ok(FeedPage::default());
    }
    let user_posts_avg = total_posts as f64 / distinct_authors as f64;

    let mut votes_by_author: HashMap<String, Vec<i64>> = HashMap::new();
    for (contributor, votes) in store.followed_post_votes(requester)? {
        votes_by_author.entry(contributor).or_default().push(votes);
    }

    let stats: HashMap<String, AuthorStats> = votes_by_author
        .into_iter()
        .map(|(contributor, votes)| {
            let rate = post_rate(votes.len() as u64, user_posts_avg);
            (
                contributor,
                AuthorStats {
                    votes_avg: geometric_mean_votes(&votes),
                    post_rate: rate,
                },
            )
        })
        .collect();

    let mut rates: Vec<f64> = stats.values().map(|s| s.post_rate).collect();
    rates.sort_by(|a, b| b.total_cmp(a));
    let post_limit = admission_limit(&rates);
    debug!(requester, post_limit, followed_with_posts = rates.len(), "admission bar");

    let before = cursor.unwrap_or_else(now_iso);
    let candidates = store.list_candidate_posts(requester, &before, limit * OVERFETCH)?;

    let mut feed = Vec::new();
    let mut last_iso: Option<String> = None;
    for p in &candidates {
        let Some(s) = stats.get(&p.contributor) else { continue };
        let threshold = votes_threshold(s.post_rate, post_limit, s.votes_avg);
        if p.votes as f64 > threshold {
            last_iso = Some(p.iso_time.clone());
            let reason = p.is_amplification().then(|| SkeletonReason {
                kind: REASON_REPOST.to_string(),
                repost: p.uri.clone(),
            });
            feed.push(FeedItem {
                post: p.post_uri.clone(),
                reason,
            });
            if feed.len() as u32 == limit {
                break;
            }
        }
    }

    // An empty page carries no cursor: end of feed.
    Ok(FeedPage { cursor: last_iso, feed })
}
