use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Request, Response};

use crate::TransportError;

/// Performs the network exchange for one fully built request.
///
/// The client treats the transport as opaque: it never inspects status codes
/// and relies on the implementation being safe to call from many tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the response or the failure.
    ///
    /// Custom transports report their own failures through
    /// [`TransportError::other`].
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        Ok(self.execute(request).await?)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        (**self).send(request).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        (**self).send(request).await
    }
}
