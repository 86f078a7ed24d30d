use std::fmt;

use http::HeaderValue;
use http::header::InvalidHeaderValue;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Opaque bearer access token.
///
/// The coordinator never parses or validates the value; expiry is enforced
/// by the server and observed as an unauthorized response.
///
/// `Debug` and `Display` print `[REDACTED]`, and the backing buffer is
/// zeroed on drop. Use [`expose`](Self::expose) or
/// [`bearer_header`](Self::bearer_header) for controlled access.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read-only access to the raw token. Do not log the returned slice.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Authorization` header value `Bearer <token>`, marked sensitive so
    /// that it is skipped by header dumps.
    ///
    /// # Errors
    ///
    /// Returns an error if the token contains bytes not allowed in a header.
    pub fn bearer_header(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let raw = Zeroizing::new(format!("Bearer {}", self.0));
        let mut value = HeaderValue::from_str(&raw)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Credential exchanged for a new [`AccessToken`] at the refresh endpoint.
///
/// Owned by whatever holds it (a cookie jar, a login flow); the session
/// client only ever reads it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RefreshCredential(String);

impl RefreshCredential {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshCredential([REDACTED])")
    }
}
