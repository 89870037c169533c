// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 路由模块
//!
//! 所有 API 路由定义。`/api/v1` 下的路由经过限流中间件和请求超时层。

pub(crate) mod admin;
pub(crate) mod entries;
pub(crate) mod health;

use axum::{
    Router,
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use tower_http::timeout::TimeoutLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;
use crate::rate_limit::rate_limit_middleware;

/// Cachet API OpenAPI 文档
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cachet API",
        version = "0.1.0",
        description = "带标签失效、过期回源与限流的缓存服务 API 文档",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    paths(
        health::health_check,
        health::metrics_endpoint,
        entries::get_entry,
        entries::put_entry,
        entries::delete_entry,
        admin::cache_stats,
        admin::clear_cache,
        admin::invalidate_tags,
        admin::purge_lru,
        admin::warmup,
        admin::rate_limit_status,
        admin::rate_limit_reset,
    ),
    components(
        schemas(
            entries::EntryResponse,
            entries::PutEntryRequest,
            entries::DeleteEntryResponse,
            admin::InvalidateRequest,
            admin::PurgeLruRequest,
            admin::WarmupRequest,
            admin::ResetResponse,
            crate::cache::CacheStats,
            crate::cache::WarmupReport,
            crate::service::AdminOutcome,
            crate::rate_limit::RateWindow,
            crate::rate_limit::RateLimitDecision,
        )
    ),
    servers(
        (url = "http://localhost:3000", description = "本地开发服务器")
    ),
    tags(
        (name = "health", description = "健康检查"),
        (name = "entries", description = "缓存条目"),
        (name = "admin", description = "运维管理")
    )
)]
pub(crate) struct ApiDoc;

pub(crate) fn create_openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// 按路由模板记录请求次数和耗时
async fn track_http_metrics(
    State(app_state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(collector) = app_state.prometheus_collector.clone() else {
        return next.run(request).await;
    };

    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let timer = collector.start_http_request_timer(&method, &endpoint);
    let response = next.run(request).await;
    timer.observe_duration();
    collector.record_http_request(&method, &endpoint, response.status().as_u16());
    response
}

/// Create the service router
///
/// `/health`, `/metrics` and the API docs are public; everything under
/// `/api/v1` is rate limited and bounded by the configured request timeout.
pub fn create_router(app_state: AppState) -> Router {
    let openapi = create_openapi();

    let api_routes = Router::new()
        .route(
            "/api/v1/entries/{key}",
            get(entries::get_entry)
                .put(entries::put_entry)
                .delete(entries::delete_entry),
        )
        .route("/api/v1/admin/cache/stats", get(admin::cache_stats))
        .route("/api/v1/admin/cache/clear", post(admin::clear_cache))
        .route("/api/v1/admin/cache/invalidate", post(admin::invalidate_tags))
        .route("/api/v1/admin/cache/purge-lru", post(admin::purge_lru))
        .route("/api/v1/admin/cache/warmup", post(admin::warmup))
        .route(
            "/api/v1/admin/rate-limit/{identifier}",
            get(admin::rate_limit_status).delete(admin::rate_limit_reset),
        )
        .layer(middleware::from_fn_with_state(
            app_state.rate_limit_state(),
            rate_limit_middleware,
        ))
        .layer(TimeoutLayer::new(app_state.request_timeout));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics_endpoint))
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", openapi))
        .merge(api_routes)
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            track_http_metrics,
        ))
        .with_state(app_state)
}
