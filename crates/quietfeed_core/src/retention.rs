/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::store::GraphStore;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub const DEFAULT_RETENTION_DAYS: u32 = 5;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Periodically purges posts older than the retention horizon, independent
/// of request traffic. Best-effort: a failed sweep is logged and the worker
/// keeps ticking.
pub fn start_retention_sweeper(
    store: GraphStore,
    retention_days: u32,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(30)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
                _ = tick.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = sweep_once(&store, retention_days).await {
                warn!("retention sweep error: {e:#}");
            }
        }
    });
}

pub async fn sweep_once(store: &GraphStore, retention_days: u32) -> Result<u64> {
    let cutoff = horizon_cutoff(retention_days);
    let deleted = tokio::task::spawn_blocking({
        let s = store.clone();
        move || s.prune_posts_before(&cutoff)
    })
    .await??;
    if deleted > 0 {
        info!(deleted, "retention pruned posts");
    }
    Ok(deleted)
}

fn horizon_cutoff(retention_days: u32) -> String {
    (Utc::now() - ChronoDuration::days(retention_days as i64))
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
