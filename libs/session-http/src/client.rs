use crate::builder::HttpClientBuilder;
use crate::config::TransportSecurity;
use crate::descriptor::RequestDescriptor;
use crate::error::HttpError;
use crate::response::{HttpResponse, ResponseBody};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::Service;
use tower::buffer::Buffer;

/// Future type of the type-erased inner stack
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// The buffered stack every [`HttpClient`] clone shares
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// HTTP client over a buffered tower stack.
///
/// `HttpClient` is `Clone + Send + Sync`; clones share one connection pool
/// and one buffer worker, so store it directly without a `Mutex`.
///
/// It is also a [`tower::Service`] over `http::Request<Full<Bytes>>`, which is
/// what lets session-aware wrappers sit on top of it (or on top of any other
/// service with the same request/response/error types).
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    /// Create a builder for configuring the HTTP client
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Transport security mode URLs are validated against.
    #[must_use]
    pub fn transport_security(&self) -> TransportSecurity {
        self.transport_security
    }

    /// Body size limit applied to responses of this client.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Send a request described by `descriptor`.
    ///
    /// The descriptor is borrowed so the caller may issue it again.
    ///
    /// # Errors
    ///
    /// - URL/header validation failures (`InvalidUri`, `InvalidScheme`, ...)
    /// - `Overloaded` when the request buffer is full (fail-fast)
    /// - `Transport`, `Timeout`, `Tls` for I/O failures
    ///
    /// Non-2xx statuses are returned as `Ok`.
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<HttpResponse, HttpError> {
        let request = descriptor.to_request(self.transport_security)?;

        let mut service = self.service.clone();
        try_acquire_buffer_slot(&mut service).await?;
        let inner = service.call(request).await.map_err(map_buffer_error)?;

        Ok(HttpResponse::new(inner, self.max_body_size))
    }
}

impl Service<Request<Full<Bytes>>> for HttpClient {
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx).map_err(map_buffer_error)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map_err(map_buffer_error) })
    }
}

/// Map buffer errors to `HttpError`
///
/// The buffer either forwards the inner service's (boxed) `HttpError` or
/// reports that its worker is gone.
pub(crate) fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

/// Poll the buffer once; a full buffer is `Overloaded` instead of a wait.
async fn try_acquire_buffer_slot(service: &mut BufferedService) -> Result<(), HttpError> {
    let poll_result = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match poll_result {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}
