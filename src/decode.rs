use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::{Result, TetherError};

/// Decodes a JSON response body into `T`.
///
/// The response is consumed on every path, which releases its connection.
/// A `reqwest::Response` always carries a body, so an empty one (a `204` or a
/// `HEAD` answer) reaches the JSON parser and fails as
/// [`TetherError::Decode`].
///
/// # Example
///
/// ```no_run
/// use std::collections::HashMap;
/// use tether_http::{decode_json, TetherClient};
///
/// # async fn run() -> tether_http::Result<()> {
/// let client = TetherClient::new();
/// let response = client.get("https://httpbin.org/anything").await?;
/// let body: HashMap<String, serde_json::Value> = decode_json(Some(response)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn decode_json<T: DeserializeOwned>(response: Option<Response>) -> Result<T> {
    let response = response.ok_or(TetherError::MissingResponse)?;
    let body = response.bytes().await.map_err(TetherError::Body)?;
    serde_json::from_slice(&body).map_err(TetherError::Decode)
}
