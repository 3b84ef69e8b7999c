/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Jetstream source: turns the hosted firehose's decoded JSON commit stream
//! into [`RecordOp`]s for the ingestion consumer. Transport only — no
//! cryptographic commit verification happens here.

use crate::ingest::{OpAction, RecordKind, RecordOp};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const COLLECTION_POST: &str = "app.bsky.feed.post";
const COLLECTION_LIKE: &str = "app.bsky.feed.like";
const COLLECTION_REPOST: &str = "app.bsky.feed.repost";

#[derive(Debug, Deserialize)]
struct JetstreamEvent {
    did: String,
    kind: String,
    commit: Option<JetstreamCommit>,
}

#[derive(Debug, Deserialize)]
struct JetstreamCommit {
    operation: String,
    collection: String,
    rkey: String,
    record: Option<JetstreamRecord>,
}

#[derive(Debug, Deserialize)]
struct JetstreamRecord {
    subject: Option<JetstreamSubject>,
}

#[derive(Debug, Deserialize)]
struct JetstreamSubject {
    uri: Option<String>,
}

fn subscribe_url(endpoint: &str) -> String {
    format!(
        "{}/subscribe?wantedCollections={COLLECTION_POST}&wantedCollections={COLLECTION_LIKE}&wantedCollections={COLLECTION_REPOST}",
        endpoint.trim_end_matches('/')
    )
}

/// One decoded envelope to at most one op. Identity/account messages,
/// unknown collections and malformed frames yield `None` and are skipped.
fn decode_event(text: &str) -> Option<RecordOp> {
    let evt: JetstreamEvent = serde_json::from_str(text).ok()?;
    if evt.kind != "commit" {
        return None;
    }
    let commit = evt.commit?;
    let kind = match commit.collection.as_str() {
        COLLECTION_POST => RecordKind::ContentPost,
        COLLECTION_LIKE => RecordKind::Endorsement,
        COLLECTION_REPOST => RecordKind::Amplification,
        _ => return None,
    };
    let action = match commit.operation.as_str() {
        "create" => OpAction::Create,
        "delete" => OpAction::Delete,
        _ => return None,
    };
    let uri = format!("at://{}/{}/{}", evt.did, commit.collection, commit.rkey);
    let target_uri = commit
        .record
        .and_then(|r| r.subject)
        .and_then(|s| s.uri);
    Some(RecordOp {
        kind,
        action,
        uri,
        author: evt.did,
        target_uri,
    })
}

/// Connects to the Jetstream endpoint and feeds ops into the consumer's
/// channel, in stream order. Any connection error is logged and followed by
/// a reconnect after `reconnect_secs`.
pub fn start_firehose_source(
    endpoint: String,
    reconnect_secs: u64,
    ops: mpsc::Sender<RecordOp>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let url = subscribe_url(&endpoint);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match run_stream(&url, &ops, &mut shutdown).await {
                Ok(()) => break, // channel closed, nothing left to feed
                Err(e) => warn!("firehose stream error: {e:#}"),
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
                _ = tokio::time::sleep(Duration::from_secs(reconnect_secs)) => {}
            }
        }
        info!("firehose source stopped");
    });
}

async fn run_stream(
    url: &str,
    ops: &mpsc::Sender<RecordOp>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (mut ws, _) = connect_async(url).await.context("firehose connect")?;
    info!(url, "firehose connected");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return Ok(()); }
            }
            msg = ws.next() => {
                let msg = match msg {
                    Some(m) => m.context("firehose read")?,
                    None => anyhow::bail!("firehose stream closed"),
                };
                let Message::Text(text) = msg else { continue };
                let Some(op) = decode_event(&text) else { continue };
                if ops.send(op).await.is_err() {
                    // Consumer gone: shut the source down for good.
                    return Ok(());
                }
            }
        }
    }
}
