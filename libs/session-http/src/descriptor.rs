use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue, IntoHeaderName};
use http::{HeaderMap, Method, Request};
use http_body_util::Full;
use serde::Serialize;

/// Owned, replayable description of an HTTP request.
///
/// Unlike a one-shot request builder, a descriptor is `Clone` and is only
/// turned into an [`http::Request`] at send time, so the same call can be
/// issued again (for example with a refreshed bearer token) without the
/// caller rebuilding it.
///
/// The URL may be relative (`/groups/7`) while the descriptor is being
/// assembled; it must be absolute by the time [`to_request`] runs.
///
/// ```ignore
/// let descriptor = RequestDescriptor::post("https://api.example.com/children")
///     .json(&NewChild { name: "Mia" })?;
/// let resp = client.execute(&descriptor).await?;
/// ```
///
/// [`to_request`]: RequestDescriptor::to_request
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestDescriptor {
    /// Create a descriptor with an empty body and no headers.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// `GET <url>`
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// `POST <url>`
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// `PUT <url>`
    #[must_use]
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    /// `PATCH <url>`
    #[must_use]
    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// `DELETE <url>`
    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replace the URL, keeping method, headers and body.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set a header from already-validated parts, replacing any previous value.
    #[must_use]
    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a header from strings.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::InvalidHeaderName` / `HttpError::InvalidHeaderValue`
    /// if either part is not a valid header token.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, HttpError> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        Ok(self.header(name, value))
    }

    /// Replace the `Authorization` header with the given (sensitive) value.
    pub fn set_authorization(&mut self, value: HeaderValue) {
        self.headers.insert(AUTHORIZATION, value);
    }

    /// Set request body as JSON.
    ///
    /// Sets `Content-Type: application/json` unless a content type is
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Json` if serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        self.body = Bytes::from(serde_json::to_vec(body)?);
        self.default_content_type("application/json");
        Ok(self)
    }

    /// Set request body as `application/x-www-form-urlencoded`.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::FormEncode` if encoding fails.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Result<Self, HttpError> {
        self.body = Bytes::from(serde_urlencoded::to_string(fields)?);
        self.default_content_type("application/x-www-form-urlencoded");
        Ok(self)
    }

    /// Set request body as raw bytes (no content type is implied).
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    fn default_content_type(&mut self, value: &'static str) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(value));
        }
    }

    /// Validate the URL against the transport security mode and build a
    /// request. Borrows `self` so the descriptor can be replayed later.
    ///
    /// # Errors
    ///
    /// - `HttpError::InvalidUri` for an empty, malformed, relative or
    ///   scheme-less URL
    /// - `HttpError::InvalidScheme` for non-http(s) schemes, or `http` under
    ///   [`TransportSecurity::TlsOnly`]
    pub fn to_request(
        &self,
        transport: TransportSecurity,
    ) -> Result<Request<Full<Bytes>>, HttpError> {
        let uri = validate_url(&self.url, transport)?;

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(uri)
            .body(Full::new(self.body.clone()))?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

fn validate_url(url: &str, transport: TransportSecurity) -> Result<http::Uri, HttpError> {
    if url.trim().is_empty() {
        return Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::Empty,
            reason: "URL is empty".to_owned(),
        });
    }

    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("https") => Ok(uri),
        Some("http") => match transport {
            TransportSecurity::AllowInsecureHttp => Ok(uri),
            TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
            }),
        },
        Some(scheme) => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
        None => Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        }),
    }
}
