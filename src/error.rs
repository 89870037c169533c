// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::backend::StoreError;
use crate::config::app::ConfigError;

/// 缓存与限流核心错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Backing store unavailable: {0}")]
    BackingStoreUnavailable(String),

    #[error("Fetch failed for key '{key}': {reason}")]
    FetchFailed { key: String, reason: String },

    #[error("Fetch for key '{key}' timed out after {timeout_ms}ms")]
    FetchTimeout { key: String, timeout_ms: u64 },

    #[error("Rate limit exceeded for '{identifier}'")]
    RateLimitExceeded {
        identifier: String,
        limit: u64,
        reset_at: DateTime<Utc>,
        retry_after_secs: u64,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for CacheError {
    fn from(e: StoreError) -> Self {
        CacheError::BackingStoreUnavailable(e.to_string())
    }
}

fn error_body(status: StatusCode, message: String) -> Json<serde_json::Value> {
    Json(json!({
        "error": status.canonical_reason().unwrap_or("Error"),
        "message": message,
        "statusCode": status.as_u16()
    }))
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::RateLimitExceeded {
                limit,
                reset_at,
                retry_after_secs,
                message,
                ..
            } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    error_body(StatusCode::TOO_MANY_REQUESTS, message.clone()),
                )
                    .into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
                headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
                headers.insert("x-ratelimit-remaining", HeaderValue::from(0u64));
                headers.insert(
                    "x-ratelimit-reset",
                    HeaderValue::from(reset_at.timestamp().max(0) as u64),
                );
                return response;
            }
            CacheError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::FetchTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CacheError::FetchFailed { .. } | CacheError::BackingStoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::InvalidConfiguration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // 上游故障细节只写日志，不暴露给调用方
        let message = match &self {
            CacheError::FetchFailed { .. }
            | CacheError::FetchTimeout { .. }
            | CacheError::BackingStoreUnavailable(_) => {
                tracing::warn!("Request failed: {}", self);
                "The service is temporarily unable to fulfil the request".to_string()
            }
            CacheError::InvalidConfiguration(_) => {
                tracing::error!("Request failed: {}", self);
                "Configuration Error".to_string()
            }
            _ => self.to_string(),
        };

        (status, error_body(status, message)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Cache(err) => return err.into_response(),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration Error".to_string(),
            ),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };

        (status, error_body(status, message)).into_response()
    }
}
