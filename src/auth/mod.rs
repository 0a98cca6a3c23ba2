// Caller authentication seam. Token verification (JWT in production) lives
// behind `Authenticator`; this module only attaches the resulting principal.

pub mod static_tokens;

pub use static_tokens::StaticTokenAuthenticator;

use crate::rate_limit::Principal;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Resolves request credentials to a caller identity
pub trait Authenticator: Send + Sync {
    /// `None` when the request carries no valid credentials
    fn authenticate(&self, headers: &HeaderMap) -> Option<String>;
}

/// Attach a [`Principal`] to every request. Never rejects: endpoints that
/// require a login enforce that themselves.
pub async fn authenticate(
    State(authenticator): State<Arc<dyn Authenticator>>,
    mut req: Request,
    next: Next,
) -> Response {
    let principal = match authenticator.authenticate(req.headers()) {
        Some(name) => {
            debug!(user = %name, "Authenticated request");
            Principal::Authenticated(name)
        }
        None => Principal::Anonymous,
    };

    req.extensions_mut().insert(principal);
    next.run(req).await
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
