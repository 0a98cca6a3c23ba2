/// Admission-control key derivation
use axum::http::HeaderMap;
use std::net::SocketAddr;
use tracing::debug;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Address used when neither proxy headers nor the peer address are available
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Principal name some auth layers use for unauthenticated callers
pub const ANONYMOUS_PRINCIPAL: &str = "anonymousUser";

/// Caller identity attached to a request by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Authenticated(String),
    Anonymous,
}

impl Principal {
    /// Name of an authenticated, non-anonymous caller
    pub fn name(&self) -> Option<&str> {
        match self {
            Principal::Authenticated(name)
                if !name.is_empty() && name != ANONYMOUS_PRINCIPAL =>
            {
                Some(name.as_str())
            }
            _ => None,
        }
    }
}

/// Transport-independent view of an inbound request
#[derive(Debug, Clone, Copy)]
pub struct RequestDescriptor<'a> {
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub principal: Option<&'a Principal>,
    pub peer: Option<SocketAddr>,
}

/// Derives the bucket key: `user:<name>` for authenticated callers,
/// `ip:<address>` otherwise. Callers with no usable address all share the
/// `ip:unknown` bucket.
///
/// Forwarded headers are taken at face value. Deployments must sit behind a
/// proxy that overwrites them, or anonymous callers can pick their own key.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyResolver;

impl KeyResolver {
    pub fn resolve(&self, request: &RequestDescriptor<'_>) -> String {
        if let Some(name) = request.principal.and_then(Principal::name) {
            return format!("user:{}", name);
        }

        match self.client_address(request) {
            Some(address) => format!("ip:{}", address),
            None => {
                debug!(path = request.path, "No client address, using shared fallback key");
                format!("ip:{}", UNKNOWN_CLIENT)
            }
        }
    }

    fn client_address(&self, request: &RequestDescriptor<'_>) -> Option<String> {
        let forwarded = header_value(request.headers, X_FORWARDED_FOR)
            .and_then(|v| v.split(',').next().map(str::trim).map(str::to_string))
            .filter(|v| !v.is_empty());
        if forwarded.is_some() {
            return forwarded;
        }

        if let Some(real_ip) = header_value(request.headers, X_REAL_IP) {
            return Some(real_ip.to_string());
        }

        request.peer.map(|addr| addr.ip().to_string())
    }
}

/// Trimmed, non-empty header value; unreadable values count as absent
fn header_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    let value = headers.get(name)?;
    match value.to_str() {
        Ok(v) => Some(v.trim()).filter(|v| !v.is_empty()),
        Err(_) => {
            debug!(header = name, "Ignoring non-UTF-8 header value");
            None
        }
    }
}
