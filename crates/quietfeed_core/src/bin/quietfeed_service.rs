/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use quietfeed_core::config::{self, ServiceConfig};
use quietfeed_core::firehose::start_firehose_source;
use quietfeed_core::follows::XrpcFollowSource;
use quietfeed_core::ingest::run_ingest_loop;
use quietfeed_core::retention::start_retention_sweeper;
use quietfeed_core::server::{self, AppState, UnverifiedJwtValidator};
use quietfeed_core::store::GraphStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

fn parse_config_path() -> Result<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return Ok(PathBuf::from(path));
            }
            return Err(anyhow::anyhow!("--config requires a path"));
        }
    }
    if let Ok(path) = std::env::var("QUIETFEED_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(config::default_config_path())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse().unwrap()),
        )
        .try_init()
        .ok();

    let cfg_path = parse_config_path()?;
    info!("config: {}", cfg_path.display());
    let text = std::fs::read_to_string(&cfg_path)
        .with_context(|| format!("read config: {}", cfg_path.display()))?;
    let cfg: ServiceConfig = config::load_config(&text)?;

    let store = GraphStore::open(&cfg.sqlite_path).context("open store")?;
    store.health_check().context("store health check")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.http_timeout_secs.unwrap_or(20)))
        .build()
        .context("build http client")?;
    let follow_source = Arc::new(XrpcFollowSource::new(
        http,
        cfg.follows_service_url().to_string(),
        cfg.follow_page_size(),
    ));

    // Firehose -> ingest: one bounded channel, one strictly ordered consumer.
    let (ops_tx, ops_rx) = mpsc::channel(4096);
    if let Some(endpoint) = cfg.firehose_endpoint.clone() {
        start_firehose_source(
            endpoint,
            cfg.firehose_reconnect_secs(),
            ops_tx,
            shutdown_rx.clone(),
        );
    } else {
        warn!("no firehose endpoint configured, ingestion idle");
        drop(ops_tx);
    }
    let ingest = tokio::spawn(run_ingest_loop(store.clone(), ops_rx, shutdown_rx.clone()));

    start_retention_sweeper(
        store.clone(),
        cfg.retention_days(),
        cfg.sweep_interval_secs(),
        shutdown_rx.clone(),
    );

    let bind = cfg.bind.clone();
    let state = AppState {
        store,
        cfg: Arc::new(cfg),
        follow_source,
        auth: Arc::new(UnverifiedJwtValidator),
    };

    tokio::select! {
        out = server::serve(state, &bind) => {
            if let Err(e) = out {
                warn!("server stopped: {e:#}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = ingest.await;
    Ok(())
}
