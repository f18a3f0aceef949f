//! Request ID tracking.
//!
//! Every request gets a [`RequestId`]: the `X-Request-ID` header when the
//! caller (typically the payment processor or the storefront) sent a valid
//! UUID, a fresh one otherwise. The ID is stored in request extensions,
//! recorded on an `http_request` tracing span and echoed in the response
//! header, so a webhook delivery can be followed through the logs.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/webhooks/payment", post(payment_webhook))
//!     .layer(request_id_layer());
//! ```

use axum::{
    extract::Request,
    http::{HeaderValue, request::Parts},
    response::Response,
};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Identifier of one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Layer that assigns a [`RequestId`] to every request.
#[must_use]
pub const fn request_id_layer() -> RequestIdLayer {
    RequestIdLayer
}

/// See [`request_id_layer`].
#[derive(Clone, Copy, Debug)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Service produced by [`RequestIdLayer`].
#[derive(Clone, Debug)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request> for RequestIdService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let request_id = RequestId(
            req.headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok())
                .unwrap_or_else(Uuid::new_v4),
        );
        req.extensions_mut().insert(request_id);

        let span = tracing::info_span!(
            "http_request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;
            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            Ok(response)
        })
    }
}

/// Read the [`RequestId`] stored by the middleware.
pub trait RequestIdExt {
    /// `None` when the layer is not installed.
    fn request_id(&self) -> Option<RequestId>;
}

impl RequestIdExt for Request {
    fn request_id(&self) -> Option<RequestId> {
        self.extensions().get::<RequestId>().copied()
    }
}

impl RequestIdExt for Parts {
    fn request_id(&self) -> Option<RequestId> {
        self.extensions.get::<RequestId>().copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/ping",
                get(|req: Request<Body>| async move {
                    req.request_id().map(|id| id.to_string()).unwrap_or_default()
                }),
            )
            .layer(request_id_layer())
    }

    #[tokio::test]
    async fn test_request_id_generated_if_missing() {
        let request = Request::builder().uri("/ping").body(Body::empty()).unwrap();

        let response = app().oneshot(request).await.unwrap();

        let header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("request id header should be present");
        assert!(Uuid::parse_str(header.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_request_id_preserved_from_caller() {
        let sent = Uuid::new_v4();
        let request = Request::builder()
            .uri("/ping")
            .header(REQUEST_ID_HEADER, sent.to_string())
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let echoed = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert_eq!(echoed, sent.to_string());
    }

    #[tokio::test]
    async fn test_invalid_request_id_is_replaced() {
        let request = Request::builder()
            .uri("/ping")
            .header(REQUEST_ID_HEADER, "evt_123")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let echoed = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert_ne!(echoed, "evt_123");
        assert!(Uuid::parse_str(echoed).is_ok());
    }
}
