/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::store::{GraphStore, PostRow};
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

const PROGRESS_EVERY: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A like targeting a content item.
    Endorsement,
    /// An original content item.
    ContentPost,
    /// A repost of another account's content item.
    Amplification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAction {
    Create,
    Delete,
}

/// One decoded create/delete event, as delivered by the firehose source.
#[derive(Debug, Clone)]
pub struct RecordOp {
    pub kind: RecordKind,
    pub action: OpAction,
    /// The record's own at-uri.
    pub uri: String,
    /// The repo the record lives in.
    pub author: String,
    /// Subject uri for endorsements and amplifications.
    pub target_uri: Option<String>,
}

/// Applies firehose operations to the store, in delivery order.
pub struct IngestConsumer {
    store: GraphStore,
    seen: u64,
}

impl IngestConsumer {
    pub fn new(store: GraphStore) -> Self {
        Self { store, seen: 0 }
    }

    /// One op, one pure mutation. Callers decide what to do with failures;
    /// the loop below logs and moves on.
    pub fn apply(&mut self, op: &RecordOp) -> Result<()> {
        self.seen = self.seen.wrapping_add(1);
        if self.seen % PROGRESS_EVERY == 0 {
            info!(seen = self.seen, "ingest progress");
        }

        match (op.kind, op.action) {
            (RecordKind::Endorsement, OpAction::Create) => self.bump_target(op, 1),
            (RecordKind::Endorsement, OpAction::Delete) => self.bump_target(op, -1),
            (RecordKind::ContentPost, OpAction::Create) => self.create_content_post(op),
            (RecordKind::ContentPost, OpAction::Delete) => {
                self.store.delete_post_by_post_uri(&op.uri)?;
                Ok(())
            }
            (RecordKind::Amplification, OpAction::Create) => self.create_amplification(op),
            (RecordKind::Amplification, OpAction::Delete) => {
                self.store.delete_post_by_uri(&op.uri)?;
                Ok(())
            }
        }
    }

    fn bump_target(&self, op: &RecordOp, delta: i64) -> Result<()> {
        // No target recorded: the counter simply does not move.
        let Some(target) = op.target_uri.as_deref() else {
            return Ok(());
        };
        self.store.bump_votes(target, delta)
    }

    fn create_content_post(&self, op: &RecordOp) -> Result<()> {
        if !self.store.is_known_user(&op.author)? {
            return Ok(());
        }
        self.store.insert_post(&PostRow {
            uri: op.uri.clone(),
            contributor: op.author.clone(),
            post_uri: op.uri.clone(),
            author: op.author.clone(),
            iso_time: now_iso(),
            votes: 0,
        })
    }

    fn create_amplification(&self, op: &RecordOp) -> Result<()> {
        let Some(target) = op.target_uri.as_deref() else {
            return Ok(());
        };
        let Some(original_author) = author_of_at_uri(target) else {
            return Ok(());
        };
        // Self-amplification is never admitted.
        if original_author == op.author {
            return Ok(());
        }
        if !self.store.is_known_user(&op.author)? {
            return Ok(());
        }
        self.store.insert_post(&PostRow {
            uri: op.uri.clone(),
            contributor: op.author.clone(),
            post_uri: target.to_string(),
            author: original_author.to_string(),
            iso_time: now_iso(),
            votes: 0,
        })
    }
}

/// Drains the firehose channel until it closes or shutdown is signalled.
/// A bad op is logged and skipped; ingestion never halts on a single event.
pub async fn run_ingest_loop(
    store: GraphStore,
    mut ops: mpsc::Receiver<RecordOp>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut consumer = IngestConsumer::new(store);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
            }
            op = ops.recv() => {
                let Some(op) = op else { break };
                let uri = op.uri.clone();
                let result = tokio::task::block_in_place(|| consumer.apply(&op));
                if let Err(e) = result {
                    warn!(%uri, "ingest op failed: {e:#}");
                }
            }
        }
    }
    info!("ingest loop stopped");
}

/// Repo did of an at-uri (`at://did/collection/rkey` -> `did`).
pub fn author_of_at_uri(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("at://")?;
    let did = rest.split('/').next().unwrap_or(rest);
    if did.is_empty() {
        None
    } else {
        Some(did)
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::INTEREST_FOLLOWED;

    fn test_store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = GraphStore::open(dir.path().join("graph.db")).expect("open store");
        (dir, store)
    }

    fn create_post(uri: &str, author: &str) -> RecordOp {
        RecordOp {
            kind: RecordKind::ContentPost,
            action: OpAction::Create,
            uri: uri.to_string(),
            author: author.to_string(),
            target_uri: None,
        }
    }

    #[test]
    fn at_uri_author_extraction() {
        assert_eq!(
            author_of_at_uri("at://did:plc:abc/app.bsky.feed.post/3kx"),
            Some("did:plc:abc")
        );
        assert_eq!(author_of_at_uri("at://did:plc:abc"), Some("did:plc:abc"));
        assert_eq!(author_of_at_uri("https://nope"), None);
        assert_eq!(author_of_at_uri("at://"), None);
    }

    #[test]
    fn post_from_unknown_user_is_dropped() {
        let (_dir, store) = test_store();
        let mut consumer = IngestConsumer::new(store.clone());
        consumer
            .apply(&create_post("at://did:stranger/app.bsky.feed.post/1", "did:stranger"))
            .unwrap();
        assert_eq!(store.count_posts().unwrap(), 0);
    }

    #[test]
    fn post_from_known_user_lands_as_original() {
        let (_dir, store) = test_store();
        store.insert_user_if_missing("did:a", INTEREST_FOLLOWED).unwrap();
        let mut consumer = IngestConsumer::new(store.clone());
        let uri = "at://did:a/app.bsky.feed.post/1";
        consumer.apply(&create_post(uri, "did:a")).unwrap();

        let row = store.get_post(uri).unwrap().unwrap();
        assert_eq!(row.post_uri, row.uri);
        assert_eq!(row.author, row.contributor);
        assert!(!row.is_amplification());
    }

    #[test]
    fn replayed_create_is_idempotent() {
        let (_dir, store) = test_store();
        store.insert_user_if_missing("did:a", INTEREST_FOLLOWED).unwrap();
        let mut consumer = IngestConsumer::new(store.clone());
        let op = create_post("at://did:a/app.bsky.feed.post/1", "did:a");
        consumer.apply(&op).unwrap();
        consumer.apply(&op).unwrap();
        assert_eq!(store.count_posts().unwrap(), 1);
    }

    #[test]
    fn create_then_delete_leaves_no_trace() {
        let (_dir, store) = test_store();
        store.insert_user_if_missing("did:a", INTEREST_FOLLOWED).unwrap();
        let mut consumer = IngestConsumer::new(store.clone());
        let uri = "at://did:a/app.bsky.feed.post/1";
        consumer.apply(&create_post(uri, "did:a")).unwrap();
        consumer
            .apply(&RecordOp {
                kind: RecordKind::ContentPost,
                action: OpAction::Delete,
                uri: uri.to_string(),
                author: "did:a".to_string(),
                target_uri: None,
            })
            .unwrap();
        assert_eq!(store.count_posts().unwrap(), 0);
    }

    #[test]
    fn delete_before_create_is_a_noop_then_create_sticks() {
        let (_dir, store) = test_store();
        store.insert_user_if_missing("did:a", INTEREST_FOLLOWED).unwrap();
        let mut consumer = IngestConsumer::new(store.clone());
        let uri = "at://did:a/app.bsky.feed.post/1";
        consumer
            .apply(&RecordOp {
                kind: RecordKind::ContentPost,
                action: OpAction::Delete,
                uri: uri.to_string(),
                author: "did:a".to_string(),
                target_uri: None,
            })
            .unwrap();
        consumer.apply(&create_post(uri, "did:a")).unwrap();
        assert_eq!(store.count_posts().unwrap(), 1);
    }

    #[test]
    fn endorsement_moves_the_counter_both_ways() {
        let (_dir, store) = test_store();
        store.insert_user_if_missing("did:a", INTEREST_FOLLOWED).unwrap();
        let mut consumer = IngestConsumer::new(store.clone());
        let post_uri = "at://did:a/app.bsky.feed.post/1";
        consumer.apply(&create_post(post_uri, "did:a")).unwrap();

        let like = |action| RecordOp {
            kind: RecordKind::Endorsement,
            action,
            uri: "at://did:b/app.bsky.feed.like/1".to_string(),
            author: "did:b".to_string(),
            target_uri: Some(post_uri.to_string()),
        };
        consumer.apply(&like(OpAction::Create)).unwrap();
        consumer.apply(&like(OpAction::Create)).unwrap();
        assert_eq!(store.get_post(post_uri).unwrap().unwrap().votes, 2);
        consumer.apply(&like(OpAction::Delete)).unwrap();
        assert_eq!(store.get_post(post_uri).unwrap().unwrap().votes, 1);
    }

    #[test]
    fn endorsement_without_target_is_silent() {
        let (_dir, store) = test_store();
        let mut consumer = IngestConsumer::new(store);
        consumer
            .apply(&RecordOp {
                kind: RecordKind::Endorsement,
                action: OpAction::Create,
                uri: "at://did:b/app.bsky.feed.like/1".to_string(),
                author: "did:b".to_string(),
                target_uri: None,
            })
            .unwrap();
    }

    #[test]
    fn amplification_carries_the_original_author() {
        let (_dir, store) = test_store();
        store.insert_user_if_missing("did:b", INTEREST_FOLLOWED).unwrap();
        let mut consumer = IngestConsumer::new(store.clone());
        let repost_uri = "at://did:b/app.bsky.feed.repost/1";
        let subject = "at://did:a/app.bsky.feed.post/1";
        consumer
            .apply(&RecordOp {
                kind: RecordKind::Amplification,
                action: OpAction::Create,
                uri: repost_uri.to_string(),
                author: "did:b".to_string(),
                target_uri: Some(subject.to_string()),
            })
            .unwrap();

        let row = store.get_post(repost_uri).unwrap().unwrap();
        assert!(row.is_amplification());
        assert_eq!(row.contributor, "did:b");
        assert_eq!(row.author, "did:a");
        assert_eq!(row.post_uri, subject);

        // Repost removal keys on the repost's own uri, not the subject.
        consumer
            .apply(&RecordOp {
                kind: RecordKind::Amplification,
                action: OpAction::Delete,
                uri: repost_uri.to_string(),
                author: "did:b".to_string(),
                target_uri: None,
            })
            .unwrap();
        assert_eq!(store.count_posts().unwrap(), 0);
    }

    #[test]
    fn self_amplification_is_rejected() {
        let (_dir, store) = test_store();
        store.insert_user_if_missing("did:a", INTEREST_FOLLOWED).unwrap();
        let mut consumer = IngestConsumer::new(store.clone());
        consumer
            .apply(&RecordOp {
                kind: RecordKind::Amplification,
                action: OpAction::Create,
                uri: "at://did:a/app.bsky.feed.repost/1".to_string(),
                author: "did:a".to_string(),
                target_uri: Some("at://did:a/app.bsky.feed.post/1".to_string()),
            })
            .unwrap();
        assert_eq!(store.count_posts().unwrap(), 0);
    }
}
