//! `tether-http` is an async HTTP client wrapper that adds, to every request:
//! - configured headers (authentication, user agent, custom headers)
//! - optional client-side rate limiting ([`TokenBucket`] or any [`RateLimiter`])
//! - a bounded retry loop with linear backoff, steered by a [`RetryPredicate`]
//!
//! Requests go through [`TetherClient::execute`] or the per-verb helpers;
//! [`decode_json`] turns a response body into a typed value.

mod builder;
mod client;
mod decode;
mod error;
mod options;
mod rate_limit;
mod transport;

pub use builder::ClientBuilder;
pub use client::{RetryPredicate, TetherClient};
pub use decode::decode_json;
pub use error::{RateLimitError, TetherError, TransportError};
pub use options::ClientOptions;
pub use rate_limit::{RateLimiter, TokenBucket};
pub use transport::Transport;

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, TetherError>;
