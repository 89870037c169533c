// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! Entry routes
//!
//! Direct reads, writes and deletes against the cache.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;
use crate::cache::CacheOptions;
use crate::error::{AppError, CacheError};

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EntryResponse {
    pub key: String,
    #[schema(value_type = Object)]
    pub value: Value,
    /// True when the entry has expired and was served from the stale path
    pub stale: bool,
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct GetEntryQuery {
    /// Also return an expired entry that has not been swept yet
    #[serde(default)]
    pub allow_stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PutEntryRequest {
    #[schema(value_type = Object)]
    pub value: Value,
    pub ttl_seconds: Option<u64>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeleteEntryResponse {
    pub removed: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/entries/{key}",
    tag = "entries",
    params(
        ("key" = String, Path, description = "Cache key"),
        GetEntryQuery
    ),
    responses(
        (status = 200, description = "Entry found", body = EntryResponse),
        (status = 404, description = "Entry absent or expired"),
        (status = 429, description = "Rate limit exceeded")
    ),
    operation_id = "get_entry"
)]
pub async fn get_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<GetEntryQuery>,
) -> Result<Json<EntryResponse>, AppError> {
    let found = if query.allow_stale {
        state
            .cache
            .get_stale(&key)
            .await?
            .map(|read| (read.value, read.is_stale))
    } else {
        state.cache.get(&key).await?.map(|value| (value, false))
    };

    let (value, stale) = found.ok_or_else(|| CacheError::NotFound(format!("entry '{}'", key)))?;
    Ok(Json(EntryResponse { key, value, stale }))
}

#[utoipa::path(
    put,
    path = "/api/v1/entries/{key}",
    tag = "entries",
    params(("key" = String, Path, description = "Cache key")),
    request_body = PutEntryRequest,
    responses(
        (status = 204, description = "Entry stored"),
        (status = 400, description = "Invalid key, ttl, tags or oversized value"),
        (status = 422, description = "Malformed body or unknown field"),
        (status = 429, description = "Rate limit exceeded")
    ),
    operation_id = "put_entry"
)]
pub async fn put_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<PutEntryRequest>,
) -> Result<StatusCode, AppError> {
    let mut options = match request.ttl_seconds {
        Some(ttl) => CacheOptions::with_ttl_seconds(ttl),
        None => state.cache.default_options(),
    };
    if let Some(tags) = request.tags {
        options = options.with_tags(tags);
    }

    let outcome = state.cache.set(&key, request.value, &options).await?;
    if !outcome.stored {
        return Err(AppError::InvalidInput(format!(
            "value for '{}' exceeds the cache byte budget",
            key
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/entries/{key}",
    tag = "entries",
    params(("key" = String, Path, description = "Cache key")),
    responses(
        (status = 200, description = "Delete result", body = DeleteEntryResponse),
        (status = 429, description = "Rate limit exceeded")
    ),
    operation_id = "delete_entry"
)]
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteEntryResponse>, AppError> {
    let removed = state.cache.delete(&key).await?;
    Ok(Json(DeleteEntryResponse { removed }))
}
