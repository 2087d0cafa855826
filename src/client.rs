use std::fmt;
use std::sync::Arc;

use reqwest::header::{self, HeaderMap};
use reqwest::{Body, Method, Request, Response, Url};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    ClientBuilder, ClientOptions, RateLimiter, Result, TetherError, Transport, TransportError,
};

/// Decides after each attempt whether the retry loop continues.
///
/// Arguments are the request as sent, the response (if any) and the transport
/// error (if any). Returning `true` moves on to the next attempt while retries
/// remain; returning `false` stops the loop immediately and the current
/// outcome becomes the result. Note the polarity: a predicate that always
/// returns `true` uses the full retry budget even when every attempt succeeds.
pub type RetryPredicate =
    Arc<dyn Fn(&Request, Option<&Response>, Option<&TransportError>) -> bool + Send + Sync>;

#[derive(Clone)]
/// HTTP client that injects headers, rate limits and retries every request.
pub struct TetherClient {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) headers: HeaderMap,
    pub(crate) rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub(crate) max_retries: usize,
    pub(crate) retry_predicate: Option<RetryPredicate>,
    pub(crate) options: ClientOptions,
}

impl fmt::Debug for TetherClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut headers = self.headers.clone();
        if headers.contains_key(header::AUTHORIZATION) {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_static("<redacted>"),
            );
        }
        f.debug_struct("TetherClient")
            .field("headers", &headers)
            .field("rate_limited", &self.rate_limiter.is_some())
            .field("max_retries", &self.max_retries)
            .field("retry_predicate", &self.retry_predicate.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl Default for TetherClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TetherClient {
    /// Creates a client with no extra headers, no rate limit and no retries.
    pub fn new() -> Self {
        Self {
            transport: Arc::new(reqwest::Client::new()),
            headers: HeaderMap::new(),
            rate_limiter: None,
            max_retries: 0,
            retry_predicate: None,
            options: ClientOptions::default(),
        }
    }

    /// Starts a [`ClientBuilder`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tether_http::TetherClient;
    ///
    /// let client = TetherClient::builder()
    ///     .bearer_auth("my-token")
    ///     .rate_limit(120)
    ///     .retries(3, |_, response, err| {
    ///         err.is_some() || response.is_some_and(|r| r.status().is_server_error())
    ///     })
    ///     .build()
    ///     .expect("valid configuration");
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Headers injected into every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn has_retry_predicate(&self) -> bool {
        self.retry_predicate.is_some()
    }

    pub fn has_rate_limiter(&self) -> bool {
        self.rate_limiter.is_some()
    }

    pub fn client_options(&self) -> &ClientOptions {
        &self.options
    }

    /// Dispatches `request` through headers, rate limiter and retry loop.
    ///
    /// `request` is taken by value. The configured headers are written into
    /// it before the first attempt, overwriting caller values of the same
    /// name, so the transport and the [`RetryPredicate`] see them; the caller
    /// keeps no handle to the modified request.
    ///
    /// Buffered bodies are re-sent in full on every attempt. A streamed body
    /// can only be read once: the first attempt sends it and later attempts
    /// send the request without a body.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`TetherClient::execute`], but the rate limiter wait gives up
    /// when `cancel` fires.
    ///
    /// The backoff sleep between attempts does not observe `cancel`; drop the
    /// returned future to abandon a request mid-retry.
    pub async fn execute_with_cancel(
        &self,
        mut request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        for (name, value) in &self.headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }
        if request.timeout().is_none() {
            *request.timeout_mut() = self.options.timeout();
        }

        if let Some(limiter) = &self.rate_limiter {
            limiter.wait(cancel).await.map_err(TetherError::RateLimit)?;
        }

        let mut attempt = 0usize;
        loop {
            // A streamed body is consumed by the first send; later attempts
            // go out with a body-less copy.
            let next = match request.try_clone() {
                Some(copy) => copy,
                None => {
                    #[cfg(feature = "tracing")]
                    if attempt < self.max_retries {
                        tracing::warn!(
                            attempt,
                            "request body is not replayable, retries are sent without it"
                        );
                    }
                    without_body(&request)
                }
            };

            let result = self.transport.send(request).await;

            let proceed = match &self.retry_predicate {
                Some(predicate) => predicate(&next, result.as_ref().ok(), result.as_ref().err()),
                None => true,
            };
            if !proceed {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempt, "retry predicate stopped request");
                return result.map_err(TetherError::Transport);
            }
            if attempt >= self.max_retries {
                return result.map_err(TetherError::Transport);
            }

            self.wait_before_retry(attempt).await;
            request = next;
            attempt += 1;
        }
    }

    pub async fn head(&self, url: &str) -> Result<Response> {
        self.execute(build_request(Method::HEAD, url, None)?).await
    }

    pub async fn options(&self, url: &str) -> Result<Response> {
        self.execute(build_request(Method::OPTIONS, url, None)?)
            .await
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.execute(build_request(Method::GET, url, None)?).await
    }

    pub async fn post(&self, url: &str, body: impl Into<Body>) -> Result<Response> {
        self.execute(build_request(Method::POST, url, Some(body.into()))?)
            .await
    }

    pub async fn put(&self, url: &str, body: impl Into<Body>) -> Result<Response> {
        self.execute(build_request(Method::PUT, url, Some(body.into()))?)
            .await
    }

    pub async fn patch(&self, url: &str, body: impl Into<Body>) -> Result<Response> {
        self.execute(build_request(Method::PATCH, url, Some(body.into()))?)
            .await
    }

    pub async fn delete(&self, url: &str) -> Result<Response> {
        self.execute(build_request(Method::DELETE, url, None)?)
            .await
    }

    /// Waits `attempt` backoff units before the next attempt.
    async fn wait_before_retry(&self, attempt: usize) {
        let delay = self.options.backoff_delay(attempt);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying request"
        );

        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

fn build_request(method: Method, url: &str, body: Option<Body>) -> Result<Request> {
    let url = Url::parse(url).map_err(TetherError::InvalidUrl)?;
    let mut request = Request::new(method, url);
    *request.body_mut() = body;
    Ok(request)
}

fn without_body(request: &Request) -> Request {
    let mut copy = Request::new(request.method().clone(), request.url().clone());
    *copy.headers_mut() = request.headers().clone();
    *copy.timeout_mut() = request.timeout().copied();
    *copy.version_mut() = request.version();
    copy
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream;
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
    use reqwest::{Body, Method, Request, Response, Url};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::{build_request, TetherClient};
    use crate::{RateLimitError, RateLimiter, TetherError, Transport, TransportError};

    #[derive(Debug, Clone)]
    struct SentRequest {
        headers: HeaderMap,
        has_body: bool,
        body: Option<Vec<u8>>,
        at: Instant,
    }

    /// Answers every request with a fixed status and records what it saw.
    #[derive(Clone)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<SentRequest>>>,
        status: u16,
    }

    impl RecordingTransport {
        fn with_status(status: u16) -> Self {
            Self {
                sent: Arc::default(),
                status,
            }
        }

        fn sent(&self) -> Vec<SentRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, request: Request) -> Result<Response, TransportError> {
            let body = request
                .body()
                .and_then(Body::as_bytes)
                .map(<[u8]>::to_vec);
            self.sent.lock().unwrap().push(SentRequest {
                headers: request.headers().clone(),
                has_body: request.body().is_some(),
                body,
                at: Instant::now(),
            });
            let response = http::Response::builder()
                .status(self.status)
                .body("ok")
                .unwrap();
            Ok(Response::from(response))
        }
    }

    /// Fails every attempt with a message naming the attempt.
    #[derive(Clone, Default)]
    struct FailingTransport {
        sends: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for FailingTransport {
        async fn send(&self, _request: Request) -> Result<Response, TransportError> {
            let attempt = self.sends.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::other(format!("attempt {attempt} failed")))
        }
    }

    struct ClosedGate;

    #[async_trait]
    impl RateLimiter for ClosedGate {
        async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
            cancel.cancelled().await;
            Err(RateLimitError::Cancelled)
        }
    }

    fn get(url: &str) -> Request {
        build_request(Method::GET, url, None).unwrap()
    }

    #[tokio::test]
    async fn configured_headers_overwrite_request_headers() {
        let transport = RecordingTransport::with_status(200);
        let client = TetherClient::builder()
            .transport(transport.clone())
            .header("X-Api-Key", "configured")
            .bearer_auth("token")
            .build()
            .unwrap();

        let mut request = get("http://localhost/resource");
        request
            .headers_mut()
            .insert("x-api-key", HeaderValue::from_static("caller"));
        request
            .headers_mut()
            .insert("x-caller-only", HeaderValue::from_static("kept"));
        client.execute(request).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].headers["x-api-key"], "configured");
        assert_eq!(sent[0].headers[AUTHORIZATION], "Bearer token");
        assert_eq!(sent[0].headers["x-caller-only"], "kept");
    }

    #[tokio::test(start_paused = true)]
    async fn continuing_predicate_makes_max_retries_plus_one_attempts() {
        let transport = RecordingTransport::with_status(500);
        let client = TetherClient::builder()
            .transport(transport.clone())
            .retries(3, |_, _, _| true)
            .build()
            .unwrap();

        let response = client.execute(get("http://localhost/")).await.unwrap();

        assert_eq!(response.status().as_u16(), 500);
        assert_eq!(transport.sent().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_predicate_on_attempt_k_makes_k_plus_one_attempts() {
        let transport = RecordingTransport::with_status(503);
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let client = TetherClient::builder()
            .transport(transport.clone())
            .retries(5, move |_, _, _| {
                let mut calls = counter.lock().unwrap();
                *calls += 1;
                // Stop after the third attempt (k = 2).
                *calls < 3
            })
            .build()
            .unwrap();

        client.execute(get("http://localhost/")).await.unwrap();

        assert_eq!(transport.sent().len(), 3);
        assert_eq!(*seen.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn predicate_returning_false_stops_after_first_attempt() {
        let transport = RecordingTransport::with_status(500);
        let client = TetherClient::builder()
            .transport(transport.clone())
            .retries(3, |_, _, _| false)
            .build()
            .unwrap();

        client.execute(get("http://localhost/")).await.unwrap();
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn without_predicate_every_attempt_runs_even_on_success() {
        let transport = RecordingTransport::with_status(200);
        let mut client = TetherClient::builder()
            .transport(transport.clone())
            .build()
            .unwrap();
        client.max_retries = 2;

        let response = client.execute(get("http://localhost/")).await.unwrap();

        assert!(response.status().is_success());
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_linear_in_attempt_number() {
        let transport = RecordingTransport::with_status(500);
        let client = TetherClient::builder()
            .transport(transport.clone())
            .backoff_unit(Duration::from_secs(1))
            .retries(3, |_, _, _| true)
            .build()
            .unwrap();

        client.execute(get("http://localhost/")).await.unwrap();

        let at: Vec<_> = transport.sent().iter().map(|sent| sent.at).collect();
        assert_eq!(at.len(), 4);
        assert_eq!(at[1] - at[0], Duration::ZERO);
        assert_eq!(at[2] - at[1], Duration::from_secs(1));
        assert_eq!(at[3] - at[2], Duration::from_secs(2));
        assert_eq!(at[2] - at[0], Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_body_is_resent_on_every_attempt() {
        let transport = RecordingTransport::with_status(500);
        let client = TetherClient::builder()
            .transport(transport.clone())
            .retries(2, |_, _, _| true)
            .build()
            .unwrap();

        let request =
            build_request(Method::POST, "http://localhost/", Some(Body::from("payload"))).unwrap();
        client.execute(request).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        for attempt in sent {
            assert_eq!(attempt.body.as_deref(), Some(&b"payload"[..]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn streamed_body_goes_out_once_and_retries_still_run() {
        let transport = RecordingTransport::with_status(500);
        let mut client = TetherClient::builder()
            .transport(transport.clone())
            .build()
            .unwrap();
        client.max_retries = 2;

        let chunks = stream::iter(vec![Ok::<_, std::io::Error>("chunk")]);
        let request = build_request(
            Method::POST,
            "http://localhost/",
            Some(Body::wrap_stream(chunks)),
        )
        .unwrap();
        client.execute(request).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].has_body);
        assert!(!sent[1].has_body);
        assert!(!sent[2].has_body);
    }

    #[tokio::test(start_paused = true)]
    async fn continuing_predicate_keeps_retrying_a_streamed_request() {
        let transport = RecordingTransport::with_status(500);
        let client = TetherClient::builder()
            .transport(transport.clone())
            .retries(3, |request, _, _| {
                assert!(request.body().is_none());
                true
            })
            .build()
            .unwrap();

        let chunks = stream::iter(vec![Ok::<_, std::io::Error>("chunk")]);
        let request = build_request(
            Method::POST,
            "http://localhost/",
            Some(Body::wrap_stream(chunks)),
        )
        .unwrap();
        client.execute(request).await.unwrap();

        assert_eq!(transport.sent().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_last_attempt_error_is_returned() {
        let transport = FailingTransport::default();
        let client = TetherClient::builder()
            .transport(transport.clone())
            .retries(2, |_, response, err| {
                assert!(response.is_none());
                err.is_some()
            })
            .build()
            .unwrap();

        let err = client
            .execute(get("http://localhost/"))
            .await
            .unwrap_err();

        assert_eq!(transport.sends.load(Ordering::SeqCst), 3);
        match err {
            TetherError::Transport(inner) => {
                assert_eq!(inner.to_string(), "attempt 2 failed");
                assert!(inner.as_reqwest().is_none());
                assert!(!inner.is_timeout());
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_rate_limiter_wait_never_reaches_transport() {
        let transport = RecordingTransport::with_status(200);
        let client = TetherClient::builder()
            .transport(transport.clone())
            .rate_limiter(ClosedGate)
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .execute_with_cancel(get("http://localhost/"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TetherError::RateLimit(RateLimitError::Cancelled)
        ));
        assert!(err.to_string().starts_with("rate limiter wait failed"));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_gate_runs_once_per_execute() {
        let transport = RecordingTransport::with_status(500);
        let client = TetherClient::builder()
            .transport(transport.clone())
            .rate_limit(60)
            .backoff_unit(Duration::from_millis(10))
            .retries(2, |_, _, _| true)
            .build()
            .unwrap();
        let start = Instant::now();

        client.execute(get("http://localhost/")).await.unwrap();
        // Two attempts for the retries, only the backoff in between.
        assert_eq!(start.elapsed(), Duration::from_millis(10));

        client.execute(get("http://localhost/")).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1_010));
        assert_eq!(transport.sent().len(), 6);
    }

    #[tokio::test]
    async fn default_timeout_applies_only_when_request_has_none() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let client = TetherClient::builder()
            .transport(RecordingTransport::with_status(200))
            .timeout(Duration::from_secs(5))
            .retries(0, move |request, _, _| {
                record.lock().unwrap().push(request.timeout().copied());
                true
            })
            .build()
            .unwrap();

        client.execute(get("http://localhost/")).await.unwrap();
        let mut request = get("http://localhost/");
        *request.timeout_mut() = Some(Duration::from_millis(100));
        client.execute(request).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Some(Duration::from_secs(5)),
                Some(Duration::from_millis(100))
            ]
        );
    }

    #[test]
    fn invalid_url_is_rejected_before_dispatch() {
        let err = build_request(Method::GET, "not a url", None).unwrap_err();
        assert!(matches!(err, TetherError::InvalidUrl(_)));
    }

    #[test]
    fn build_request_sets_method_url_and_body() {
        let request =
            build_request(Method::PUT, "http://localhost/items/1", Some(Body::from("x"))).unwrap();
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(
            request.url(),
            &Url::parse("http://localhost/items/1").unwrap()
        );
        assert_eq!(request.body().and_then(Body::as_bytes), Some(&b"x"[..]));
    }

    #[test]
    fn debug_redacts_authorization_value() {
        let client = TetherClient::builder()
            .bearer_auth("secret-token")
            .build()
            .unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }
}
