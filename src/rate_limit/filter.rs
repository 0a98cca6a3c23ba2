/// axum middleware that applies [`RateLimiter`] decisions to the request path
use super::{Decision, Principal, RateLimitInfo, RateLimiter, RequestDescriptor};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Runs after authentication so the caller's [`Principal`] is already attached.
/// Internal failures let the request through: admission control must never be
/// the reason the API is down.
pub async fn admission_control(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let decision = {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let descriptor = RequestDescriptor {
            path: req.uri().path(),
            headers: req.headers(),
            principal: req.extensions().get::<Principal>(),
            peer,
        };
        limiter.check(&descriptor)
    };

    match decision {
        Decision::Exempt => next.run(req).await,
        Decision::Admitted(info) => {
            let mut response = next.run(req).await;
            decorate(response.headers_mut(), &info);
            response
        }
        Decision::Rejected(info) => RateLimitExceeded(info).into_response(),
        Decision::Failed(err) => {
            error!(kind = err.kind(), "Admission check failed, letting request through: {}", err);
            next.run(req).await
        }
    }
}

/// Add rate-limit headers to a downstream response. Headers already present
/// (set by the handler or an inner limiter) are left alone.
fn decorate(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers
        .entry(X_RATELIMIT_LIMIT)
        .or_insert(HeaderValue::from(info.limit));
    headers
        .entry(X_RATELIMIT_REMAINING)
        .or_insert(HeaderValue::from(info.remaining));
    headers
        .entry(X_RATELIMIT_RESET)
        .or_insert(HeaderValue::from(info.reset));
}

/// Terminal 429 response
#[derive(Debug, Clone, Copy)]
pub struct RateLimitExceeded(pub RateLimitInfo);

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let info = self.0;
        let body = json!({
            "title": "Rate limit exceeded",
            "detail": format!(
                "Limit of {} requests per minute exceeded. Retry in {} seconds.",
                info.limit, info.retry_after
            ),
            "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
            "retryAfter": info.retry_after,
        });

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_UTF8));
        headers.insert(header::RETRY_AFTER, HeaderValue::from(info.retry_after));
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(info.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(info.reset));

        (StatusCode::TOO_MANY_REQUESTS, headers, body.to_string()).into_response()
    }
}
