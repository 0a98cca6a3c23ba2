pub mod auth;
pub mod config;
pub mod metrics;
pub mod rate_limit;
pub mod server;

// Re-export commonly used types
pub use config::{Config, RateLimitConfig};
pub use rate_limit::{Decision, RateLimiter};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
