// Admission-control tests driving the full axum application in-process.
// Time is controlled with a ManualClock so refill behaviour is exact.

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request, Response, StatusCode, header},
};
use mockall::mock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use turnstile::{
    Config, RateLimitConfig, RateLimiter,
    auth::{Authenticator, StaticTokenAuthenticator},
    rate_limit::ManualClock,
    server::http::{AppState, api_routes, build_app},
};

const CALLER: &str = "203.0.113.5:52000";

mock! {
    pub Auth {}
    impl Authenticator for Auth {
        fn authenticate(&self, headers: &HeaderMap) -> Option<String>;
    }
}

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
    limiter: Arc<RateLimiter>,
}

fn harness_with(rate_limit: RateLimitConfig, authenticator: Arc<dyn Authenticator>) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::new(rate_limit.clone(), clock.clone()));
    let config = Config {
        rate_limit,
        ..Config::default()
    };
    let state = AppState {
        config: Arc::new(config),
        limiter: limiter.clone(),
    };

    Harness {
        app: build_app(state, authenticator, api_routes()),
        clock,
        limiter,
    }
}

fn harness() -> Harness {
    let tokens = HashMap::from([("alice-token".to_string(), "alice".to_string())]);
    harness_with(
        RateLimitConfig::default(),
        Arc::new(StaticTokenAuthenticator::new(tokens)),
    )
}

fn get(path: &str) -> Request<Body> {
    let mut req = Request::builder().uri(path).body(Body::empty()).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(CALLER.parse::<SocketAddr>().unwrap()));
    req
}

fn get_with(path: &str, name: &str, value: &str) -> Request<Body> {
    let mut req = get(path);
    req.headers_mut()
        .insert(header::HeaderName::from_bytes(name.as_bytes()).unwrap(), value.parse().unwrap());
    req
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

fn header_str<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_anonymous_burst_then_refill() {
    let h = harness();

    for i in 0..10 {
        let response = send(&h.app, get("/api/v1/whoami")).await;
        assert_eq!(response.status(), StatusCode::OK, "request {}", i + 1);
        assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("10"));
        assert_eq!(
            header_str(&response, "x-ratelimit-remaining"),
            Some((9 - i).to_string().as_str())
        );
        assert!(header_str(&response, "x-ratelimit-reset").is_some());
    }

    let response = send(&h.app, get("/api/v1/whoami")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        header_str(&response, "content-type"),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(header_str(&response, "retry-after"), Some("60"));
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("0"));
    assert_eq!(header_str(&response, "x-ratelimit-limit"), Some("10"));

    let body = json_body(response).await;
    assert_eq!(body["status"], 429);
    assert_eq!(body["retryAfter"], 60);
    assert_eq!(body["title"], "Rate limit exceeded");

    h.clock.advance(Duration::from_secs(61));

    let response = send(&h.app, get("/api/v1/whoami")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("9"));
}

#[tokio::test]
async fn test_authenticated_user_has_own_bucket_on_same_address() {
    let h = harness();

    for _ in 0..11 {
        send(&h.app, get("/api/v1/whoami")).await;
    }
    let response = send(&h.app, get("/api/v1/whoami")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = send(
        &h.app,
        get_with("/api/v1/whoami", "authorization", "Bearer alice-token"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("9"));

    let body = json_body(response).await;
    assert_eq!(body["user"], "alice");

    assert!(h.limiter.store().contains("user:alice"));
    assert!(h.limiter.store().contains("ip:203.0.113.5"));
}

#[tokio::test]
async fn test_forwarded_clients_are_limited_separately() {
    let h = harness();

    for _ in 0..10 {
        let response = send(
            &h.app,
            get_with("/api/v1/whoami", "x-forwarded-for", "198.51.100.1, 10.0.0.1"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = send(
        &h.app,
        get_with("/api/v1/whoami", "x-forwarded-for", "198.51.100.1"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = send(
        &h.app,
        get_with("/api/v1/whoami", "x-real-ip", "198.51.100.2"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.limiter.store().contains("ip:198.51.100.2"));
    assert!(!h.limiter.store().contains("ip:203.0.113.5"));
}

#[tokio::test]
async fn test_exempt_paths_ignore_volume() {
    let h = harness();

    for _ in 0..50 {
        for path in ["/health", "/metrics", "/"] {
            let response = send(&h.app, get(path)).await;
            assert_eq!(response.status(), StatusCode::OK, "{}", path);
            assert!(header_str(&response, "x-ratelimit-limit").is_none());
        }
    }

    assert!(h.limiter.store().is_empty());
}

#[tokio::test]
async fn test_disabled_limiter_passes_everything() {
    let tokens = HashMap::new();
    let config = RateLimitConfig {
        enabled: false,
        ..RateLimitConfig::default()
    };
    let h = harness_with(config, Arc::new(StaticTokenAuthenticator::new(tokens)));

    for _ in 0..30 {
        let response = send(&h.app, get("/api/v1/whoami")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header_str(&response, "x-ratelimit-remaining").is_none());
    }
}

#[tokio::test]
async fn test_addressless_callers_are_still_limited() {
    let h = harness();

    // No peer address, no proxy headers, no credentials
    let addressless = || {
        Request::builder()
            .uri("/api/v1/whoami")
            .body(Body::empty())
            .unwrap()
    };

    for i in 0..10 {
        let response = send(&h.app, addressless()).await;
        assert_eq!(response.status(), StatusCode::OK, "request {}", i + 1);
        assert_eq!(
            header_str(&response, "x-ratelimit-remaining"),
            Some((9 - i).to_string().as_str())
        );
    }

    let response = send(&h.app, addressless()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(h.limiter.store().contains("ip:unknown"));
}

#[tokio::test]
async fn test_full_store_fails_open_for_new_callers() {
    let config = RateLimitConfig {
        max_buckets: 1,
        ..RateLimitConfig::default()
    };
    let h = harness_with(config, Arc::new(StaticTokenAuthenticator::new(HashMap::new())));

    let response = send(&h.app, get("/api/v1/whoami")).await;
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), Some("9"));

    // A second caller cannot get a bucket; it is let through untracked
    for _ in 0..15 {
        let response = send(
            &h.app,
            get_with("/api/v1/whoami", "x-real-ip", "198.51.100.9"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header_str(&response, "x-ratelimit-remaining").is_none());
    }
    assert_eq!(h.limiter.store().len(), 1);
}

#[tokio::test]
async fn test_authenticator_sees_every_limited_request() {
    let mut auth = MockAuth::new();
    auth.expect_authenticate()
        .times(3)
        .returning(|_| Some("bob".to_string()));

    let h = harness_with(RateLimitConfig::default(), Arc::new(auth));

    for _ in 0..3 {
        let response = send(&h.app, get("/api/v1/whoami")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert!(h.limiter.store().contains("user:bob"));
    assert!(!h.limiter.store().contains("ip:203.0.113.5"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_burst_admits_exactly_capacity() {
    let h = harness();

    let requests = (0..40).map(|_| {
        let app = h.app.clone();
        tokio::spawn(async move { app.oneshot(get("/api/v1/whoami")).await.unwrap().status() })
    });
    let statuses = futures::future::join_all(requests).await;

    let admitted = statuses
        .iter()
        .filter(|s| *s.as_ref().unwrap() == StatusCode::OK)
        .count();
    let rejected = statuses
        .iter()
        .filter(|s| *s.as_ref().unwrap() == StatusCode::TOO_MANY_REQUESTS)
        .count();

    assert_eq!(admitted, 10);
    assert_eq!(rejected, 30);
    assert_eq!(h.limiter.store().len(), 1);
}
