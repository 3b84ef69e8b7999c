/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::ServiceConfig;
use crate::follows::FollowSource;
use crate::ranking::{self, FeedPage};
use crate::reconcile::spawn_reconcile;
use crate::store::GraphStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Registered feed algorithms, keyed by the generator record's rkey.
pub const FEED_SHORTNAMES: &[&str] = &["quietfeed"];

/// Request-level failures: the only errors this surface reports to callers.
/// Everything else degrades (see [`get_feed_skeleton`]).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid credential")]
    Unauthorized,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "AuthRequired"),
            Self::UnsupportedAlgorithm(_) => (StatusCode::BAD_REQUEST, "UnsupportedAlgorithm"),
        };
        let body = json!({ "error": error, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Yields the requester identity from request headers, or fails.
#[async_trait]
pub trait AuthValidator: Send + Sync {
    async fn requester_did(&self, headers: &HeaderMap) -> Result<String>;
}

/// Reads the `iss` claim out of the bearer JWT without verifying the
/// signature. Signature validation is a collaborator concern; a verifying
/// implementation slots in behind the same trait.
pub struct UnverifiedJwtValidator;

#[async_trait]
impl AuthValidator for UnverifiedJwtValidator {
    async fn requester_did(&self, headers: &HeaderMap) -> Result<String> {
        let auth = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .context("missing authorization header")?;
        let token = auth
            .strip_prefix("Bearer ")
            .context("not a bearer credential")?;
        jwt_issuer(token)
    }
}

fn jwt_issuer(token: &str) -> Result<String> {
    let payload_b64 = token.split('.').nth(1).context("malformed jwt")?;
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .context("jwt payload b64")?;
    let claims: serde_json::Value = serde_json::from_slice(&payload).context("jwt payload json")?;
    let iss = claims
        .get("iss")
        .and_then(|v| v.as_str())
        .context("jwt missing iss")?;
    Ok(iss.to_string())
}

#[derive(Clone)]
pub struct AppState {
    pub store: GraphStore,
    pub cfg: Arc<ServiceConfig>,
    pub follow_source: Arc<dyn FollowSource>,
    pub auth: Arc<dyn AuthValidator>,
}

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub feed: String,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

/// `at://{publisher}/app.bsky.feed.generator/{rkey}` -> rkey, if the uri
/// names a feed this publisher serves.
fn registered_shortname<'a>(feed_uri: &'a str, publisher_did: &str) -> Option<&'a str> {
    let rest = feed_uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let host = parts.next()?;
    let collection = parts.next()?;
    let rkey = parts.next()?;
    if host != publisher_did || collection != "app.bsky.feed.generator" {
        return None;
    }
    FEED_SHORTNAMES.contains(&rkey).then_some(rkey)
}

/// `GET /xrpc/app.bsky.feed.getFeedSkeleton`
///
/// Kicks off a best-effort follow-set reconciliation (the response does not
/// wait for it) and serves the ranked page. A ranking fault degrades to an
/// empty page rather than a 500.
pub async fn get_feed_skeleton(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> Result<Json<FeedPage>, ApiError> {
    if registered_shortname(&params.feed, &state.cfg.publisher_did).is_none() {
        return Err(ApiError::UnsupportedAlgorithm(params.feed));
    }

    let requester = state
        .auth
        .requester_did(&headers)
        .await
        .map_err(|_| ApiError::Unauthorized)?;

    spawn_reconcile(
        state.store.clone(),
        state.follow_source.clone(),
        requester.clone(),
        state.cfg.follow_page_size(),
    );

    let page = match ranking::build_feed(&state.store, &requester, params.cursor, params.limit).await {
        Ok(page) => page,
        Err(e) => {
            warn!(%requester, "feed build failed, serving empty page: {e:#}");
            FeedPage::default()
        }
    };
    Ok(Json(page))
}

pub async fn describe_feed_generator(State(state): State<AppState>) -> Json<serde_json::Value> {
    let feeds: Vec<serde_json::Value> = FEED_SHORTNAMES
        .iter()
        .map(|name| {
            json!({
                "uri": format!("at://{}/app.bsky.feed.generator/{name}", state.cfg.publisher_did)
            })
        })
        .collect();
    Json(json!({ "did": state.cfg.service_did, "feeds": feeds }))
}

pub async fn well_known_did(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": state.cfg.service_did,
        "service": [{
            "id": "#bsky_fg",
            "type": "BskyFeedGenerator",
            "serviceEndpoint": format!("https://{}", state.cfg.hostname)
        }]
    }))
}

async fn health(State(state): State<AppState>) -> Response {
    match tokio::task::spawn_blocking(move || state.store.health_check()).await {
        Ok(Ok(())) => (StatusCode::OK, "ok").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "db unavailable").into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/xrpc/app.bsky.feed.getFeedSkeleton", get(get_feed_skeleton))
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(describe_feed_generator),
        )
        .route("/.well-known/did.json", get(well_known_did))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(bind, "quietfeed serving");
    axum::serve(listener, router(state)).await.context("serve")?;
    Ok(())
}
