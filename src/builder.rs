use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Request, Response};

use crate::{
    ClientOptions, RateLimiter, Result, RetryPredicate, TetherClient, TetherError, TokenBucket,
    Transport, TransportError,
};

enum LimiterSetting {
    PerMinute(u32),
    Custom(Arc<dyn RateLimiter>),
}

/// Collects client options in call order.
///
/// Options touching the same field overwrite each other: the last call wins.
/// Invalid header names or values are remembered and reported by
/// [`ClientBuilder::build`].
#[must_use]
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    headers: HeaderMap,
    limiter: Option<LimiterSetting>,
    max_retries: usize,
    retry_predicate: Option<RetryPredicate>,
    options: ClientOptions,
    error: Option<TetherError>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            headers: HeaderMap::new(),
            limiter: None,
            max_retries: 0,
            retry_predicate: None,
            options: ClientOptions::default(),
            error: None,
        }
    }

    /// Replaces the default `reqwest::Client` transport.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets one header sent with every request.
    pub fn header(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let key = key.as_ref();
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(err) => {
                self.fail(TetherError::InvalidHeader(format!("name '{key}': {err}")));
                return self;
            }
        };
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => self.insert(name, value),
            Err(err) => self.fail(TetherError::InvalidHeader(format!("value for '{key}': {err}"))),
        }
        self
    }

    /// Merges several headers, overwriting existing values for the same name.
    pub fn headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        headers
            .into_iter()
            .fold(self, |builder, (key, value)| builder.header(key, value))
    }

    /// Limits the client to `requests_per_minute`, evenly spaced.
    ///
    /// Zero is rejected by [`ClientBuilder::build`].
    pub fn rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.limiter = Some(LimiterSetting::PerMinute(requests_per_minute));
        self
    }

    /// Uses a custom admission gate instead of the built-in token bucket.
    pub fn rate_limiter<L: RateLimiter + 'static>(mut self, limiter: L) -> Self {
        self.limiter = Some(LimiterSetting::Custom(Arc::new(limiter)));
        self
    }

    /// Sets `Authorization: Basic base64(username:password)`.
    pub fn basic_auth(mut self, username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        let credentials = format!("{}:{}", username.as_ref(), password.as_ref());
        let encoded = STANDARD.encode(credentials);
        self.authorization(format!("Basic {encoded}"));
        self
    }

    /// Sets `Authorization: Bearer <token>`.
    pub fn bearer_auth(mut self, token: impl AsRef<str>) -> Self {
        self.authorization(format!("Bearer {}", token.as_ref()));
        self
    }

    pub fn user_agent(self, user_agent: impl AsRef<str>) -> Self {
        self.header(header::USER_AGENT.as_str(), user_agent)
    }

    /// Sets the retry budget and the predicate consulted after each attempt.
    ///
    /// The predicate returns `true` to keep going and `false` to stop. See
    /// [`RetryPredicate`].
    pub fn retries<F>(mut self, max_retries: usize, predicate: F) -> Self
    where
        F: Fn(&Request, Option<&Response>, Option<&TransportError>) -> bool
            + Send
            + Sync
            + 'static,
    {
        self.max_retries = max_retries;
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Length of one linear backoff unit.
    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.options.backoff_unit_ms = u64::try_from(unit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Timeout applied to requests that do not set their own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Replaces backoff and timeout settings wholesale.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Finishes configuration.
    ///
    /// Creates a fresh `reqwest::Client` when no transport was supplied.
    pub fn build(self) -> Result<TetherClient> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let rate_limiter: Option<Arc<dyn RateLimiter>> = match self.limiter {
            None => None,
            Some(LimiterSetting::Custom(limiter)) => Some(limiter),
            Some(LimiterSetting::PerMinute(rpm)) => {
                let rpm = NonZeroU32::new(rpm).ok_or_else(|| {
                    TetherError::Config(
                        "rate limit must allow at least one request per minute".to_owned(),
                    )
                })?;
                Some(Arc::new(TokenBucket::per_minute(rpm)))
            }
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(reqwest::Client::new()),
        };

        Ok(TetherClient {
            transport,
            headers: self.headers,
            rate_limiter,
            max_retries: self.max_retries,
            retry_predicate: self.retry_predicate,
            options: self.options,
        })
    }

    fn authorization(&mut self, value: String) {
        match HeaderValue::from_str(&value) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.insert(header::AUTHORIZATION, value);
            }
            Err(err) => self.fail(TetherError::InvalidHeader(format!(
                "value for 'authorization': {err}"
            ))),
        }
    }

    fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    fn fail(&mut self, err: TetherError) {
        self.error.get_or_insert(err);
    }
}
