/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::follows::{fetch_all_follows, FollowSource};
use crate::store::{GraphStore, INTEREST_FOLLOWED, INTEREST_SELF};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Converges the locally stored follow set for `requester` onto the canonical
/// one: inserts the additions (plus a self-follow, so the requester's own
/// posts reach their feed), deletes the removals, and tags newly-seen
/// identities with their interest level.
pub async fn reconcile(
    store: &GraphStore,
    source: &dyn FollowSource,
    requester: &str,
    page_size: u32,
) -> Result<()> {
    let follows = fetch_all_follows(source, requester, page_size)
        .await
        .context("fetch canonical follows")?;

    let mut canonical: HashSet<String> = follows.into_iter().collect();
    canonical.insert(requester.to_string());

    let store = store.clone();
    let requester = requester.to_string();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let local: HashSet<String> = store.list_followed(&requester)?.into_iter().collect();

        let mut added = 0u32;
        let mut removed = 0u32;
        for followed in canonical.difference(&local) {
            let interest = if followed == &requester { INTEREST_SELF } else { INTEREST_FOLLOWED };
            store.insert_user_if_missing(followed, interest)?;
            store.add_follow(&requester, followed)?;
            added += 1;
        }
        for gone in local.difference(&canonical) {
            store.remove_follow(&requester, gone)?;
            removed += 1;
        }
        // The requester may already have been known as someone else's follow.
        store.insert_user_if_missing(&requester, INTEREST_SELF)?;

        if added > 0 || removed > 0 {
            debug!(%requester, added, removed, "follow set reconciled");
        }
        Ok(())
    })
    .await??;
    Ok(())
}

/// Fire-and-forget dispatch from the query path. The query never waits and a
/// failure leaves the stored follow set as-is until the next attempt.
pub fn spawn_reconcile(
    store: GraphStore,
    source: Arc<dyn FollowSource>,
    requester: String,
    page_size: u32,
) {
    tokio::spawn(async move {
        if let Err(e) = reconcile(&store, source.as_ref(), &requester, page_size).await {
            warn!(%requester, "reconcile failed: {e:#}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::follows::FollowPage;
    use async_trait::async_trait;

    struct FixedSource {
        follows: Vec<String>,
    }

    #[async_trait]
    impl FollowSource for FixedSource {
        async fn list_follows_page(&self, _account: &str, _cursor: Option<&str>) -> Result<FollowPage> {
            Ok(FollowPage {
                entries: self.follows.clone(),
                cursor: None,
            })
        }
    }

    fn test_store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = GraphStore::open(dir.path().join("graph.db")).expect("open store");
        (dir, store)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_set_converges_on_canonical() {
        let (_dir, store) = test_store();
        // Stale local state: follows someone the canonical list no longer has.
        store.add_follow("did:me", "did:stale").unwrap();

        let source = FixedSource {
            follows: vec!["did:a".to_string(), "did:b".to_string()],
        };
        reconcile(&store, &source, "did:me", 30).await.unwrap();

        let mut local = store.list_followed("did:me").unwrap();
        local.sort();
        assert_eq!(local, vec!["did:a", "did:b", "did:me"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interest_tags_requester_and_followed() {
        let (_dir, store) = test_store();
        let source = FixedSource {
            follows: vec!["did:a".to_string()],
        };
        reconcile(&store, &source, "did:me", 30).await.unwrap();

        assert_eq!(store.user_interest("did:me").unwrap(), Some(INTEREST_SELF));
        assert_eq!(store.user_interest("did:a").unwrap(), Some(INTEREST_FOLLOWED));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rerun_is_idempotent() {
        let (_dir, store) = test_store();
        let source = FixedSource {
            follows: vec!["did:a".to_string()],
        };
        reconcile(&store, &source, "did:me", 30).await.unwrap();
        reconcile(&store, &source, "did:me", 30).await.unwrap();

        let mut local = store.list_followed("did:me").unwrap();
        local.sort();
        assert_eq!(local, vec!["did:a", "did:me"]);
    }
}
