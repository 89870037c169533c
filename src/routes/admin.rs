// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! Administrative routes
//!
//! Operator tooling: cache statistics, bulk invalidation, LRU purge, warmup
//! and rate-limit window inspection. Cache operations always answer with a
//! result object; failures are reported in the body instead of as errors.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::cache::{CacheStats, StoreLimits};
use crate::error::{AppError, CacheError};
use crate::rate_limit::RateWindow;
use crate::service::AdminOutcome;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct InvalidateRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PurgeLruRequest {
    pub target_entries: Option<usize>,
    pub target_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WarmupRequest {
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ResetResponse {
    pub success: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/cache/stats",
    tag = "admin",
    responses((status = 200, description = "Cache statistics", body = CacheStats)),
    operation_id = "cache_stats"
)]
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/cache/clear",
    tag = "admin",
    responses((status = 200, description = "Entries removed", body = AdminOutcome)),
    operation_id = "cache_clear"
)]
pub async fn clear_cache(State(state): State<AppState>) -> Json<AdminOutcome> {
    Json(state.cache.clear_all().await)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/cache/invalidate",
    tag = "admin",
    request_body = InvalidateRequest,
    responses((status = 200, description = "Distinct entries removed", body = AdminOutcome)),
    operation_id = "cache_invalidate"
)]
pub async fn invalidate_tags(
    State(state): State<AppState>,
    Json(request): Json<InvalidateRequest>,
) -> Json<AdminOutcome> {
    Json(state.cache.invalidate_tags(&request.tags).await)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/cache/purge-lru",
    tag = "admin",
    request_body = PurgeLruRequest,
    responses((status = 200, description = "Entries evicted", body = AdminOutcome)),
    operation_id = "cache_purge_lru"
)]
pub async fn purge_lru(
    State(state): State<AppState>,
    Json(request): Json<PurgeLruRequest>,
) -> Json<AdminOutcome> {
    let target = StoreLimits {
        max_entries: request.target_entries,
        max_bytes: request.target_bytes,
    };
    Json(state.cache.purge_lru(target).await)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/cache/warmup",
    tag = "admin",
    request_body = WarmupRequest,
    responses((status = 200, description = "Warmup result", body = AdminOutcome)),
    operation_id = "cache_warmup"
)]
pub async fn warmup(
    State(state): State<AppState>,
    Json(request): Json<WarmupRequest>,
) -> Json<AdminOutcome> {
    Json(state.cache.warmup_category(&request.category).await)
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/rate-limit/{identifier}",
    tag = "admin",
    params(("identifier" = String, Path, description = "Rate limit identifier, e.g. ip:10.0.0.1")),
    responses(
        (status = 200, description = "Current window", body = RateWindow),
        (status = 404, description = "No active window")
    ),
    operation_id = "rate_limit_status"
)]
pub async fn rate_limit_status(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<RateWindow>, AppError> {
    let policy = &state.rate_limit_policy;
    let window = state
        .rate_limiter
        .status(&identifier, policy.limit, policy.window)
        .await?
        .ok_or_else(|| CacheError::NotFound(format!("rate limit window '{}'", identifier)))?;
    Ok(Json(window))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/rate-limit/{identifier}",
    tag = "admin",
    params(("identifier" = String, Path, description = "Rate limit identifier")),
    responses((status = 200, description = "Window cleared", body = ResetResponse)),
    operation_id = "rate_limit_reset"
)]
pub async fn rate_limit_reset(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    let success = state.rate_limiter.reset(&identifier).await?;
    Ok(Json(ResetResponse { success }))
}
