// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::identifier::RequestIdentity;
use super::limiter::{RateLimitDecision, RateLimitPolicy, RateLimiter};
use crate::error::CacheError;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub policy: Arc<RateLimitPolicy>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, policy: RateLimitPolicy) -> Self {
        Self {
            limiter,
            policy: Arc::new(policy),
        }
    }
}

/// 限流中间件
///
/// 超限的请求直接返回 429，不会进入后续处理器。
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let policy = &state.policy;
    if !policy.enabled {
        return next.run(request).await;
    }

    let identity = RequestIdentity::from_request(&request, policy.trusted_headers);
    let identifier = (policy.identifier)(&identity);

    match state.limiter.enforce(&identifier, policy).await {
        Ok(decision) => {
            let mut response = next.run(request).await;
            if policy.headers_enabled {
                apply_headers(response.headers_mut(), &decision);
            }
            response
        }
        Err(err @ CacheError::RateLimitExceeded { .. }) => {
            let mut response = err.into_response();
            if !policy.headers_enabled {
                let headers = response.headers_mut();
                headers.remove(HEADER_LIMIT);
                headers.remove(HEADER_REMAINING);
                headers.remove(HEADER_RESET);
            }
            response
        }
        Err(err) => err.into_response(),
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        HEADER_RESET,
        HeaderValue::from(decision.reset_at.timestamp().max(0) as u64),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::{IdentifierChoice, RateLimitSettings};
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(settings: RateLimitSettings, hits: Arc<AtomicUsize>) -> Router {
        let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryBackend::new())));
        let state = RateLimitState::new(limiter, RateLimitPolicy::from_settings(&settings).unwrap());
        Router::new()
            .route(
                "/work",
                get(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "done"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
    }

    fn get_work() -> Request {
        Request::builder()
            .uri("/work")
            .header(crate::rate_limit::PRINCIPAL_HEADER, "tester")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_handled() {
        let hits = Arc::new(AtomicUsize::new(0));
        let settings = RateLimitSettings {
            limit: 2,
            ..Default::default()
        };
        let app = app(settings, hits.clone());

        let first = app.clone().oneshot(get_work()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[HEADER_LIMIT], "2");
        assert_eq!(first.headers()[HEADER_REMAINING], "1");
        assert!(first.headers().contains_key(HEADER_RESET));

        app.clone().oneshot(get_work()).await.unwrap();
        let rejected = app.clone().oneshot(get_work()).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(rejected.headers().contains_key("retry-after"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_headers_can_be_disabled() {
        let hits = Arc::new(AtomicUsize::new(0));
        let settings = RateLimitSettings {
            limit: 1,
            headers_enabled: false,
            ..Default::default()
        };
        let app = app(settings, hits);

        let ok = app.clone().oneshot(get_work()).await.unwrap();
        assert!(!ok.headers().contains_key(HEADER_LIMIT));

        let rejected = app.oneshot(get_work()).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(rejected.headers().contains_key("retry-after"));
        assert!(!rejected.headers().contains_key(HEADER_REMAINING));
    }

    #[tokio::test]
    async fn test_disabled_policy_passes_through() {
        let hits = Arc::new(AtomicUsize::new(0));
        let settings = RateLimitSettings {
            enabled: false,
            limit: 1,
            ..Default::default()
        };
        let app = app(settings, hits.clone());

        for _ in 0..3 {
            let response = app.clone().oneshot(get_work()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    fn get_work_as(principal: &str) -> Request {
        Request::builder()
            .uri("/work")
            .header(crate::rate_limit::PRINCIPAL_HEADER, principal)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_rotating_principal_header_does_not_escape_limit() {
        let hits = Arc::new(AtomicUsize::new(0));
        let settings = RateLimitSettings {
            limit: 1,
            identifier: IdentifierChoice::Principal,
            ..Default::default()
        };
        let app = app(settings, hits.clone());

        let mut accepted = 0;
        for i in 0..20 {
            let response = app
                .clone()
                .oneshot(get_work_as(&format!("user-{}", i)))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trusted_principal_header_limits_each_principal() {
        let hits = Arc::new(AtomicUsize::new(0));
        let settings = RateLimitSettings {
            limit: 1,
            identifier: IdentifierChoice::Principal,
            trust_principal_header: true,
            ..Default::default()
        };
        let app = app(settings, hits.clone());

        for who in ["alice", "bob"] {
            let response = app.clone().oneshot(get_work_as(who)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let again = app.oneshot(get_work_as("alice")).await.unwrap();
        assert_eq!(again.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
