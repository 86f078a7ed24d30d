#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for the kindergarten session client
//!
//! This crate provides a hyper-based HTTP client with:
//! - Automatic TLS via rustls (HTTPS only by default)
//! - Connection pooling
//! - Per-request timeouts
//! - User-Agent header injection
//! - Fail-fast request buffering
//! - Transparent response decompression (gzip, brotli, deflate)
//!
//! Requests are described by a [`RequestDescriptor`], an owned and
//! cloneable value that can be sent more than once. That is what the
//! session layer relies on to replay a call with a refreshed token.
//!
//! [`HttpClient`] is also a [`tower::Service`], so anything written against
//! the service signature (`http::Request<Full<Bytes>>` in,
//! `http::Response<ResponseBody>` out, [`HttpError`] on failure) can run on
//! a real client or a scripted stub.
//!
//! # Example
//!
//! ```ignore
//! use session_http::{HttpClient, RequestDescriptor};
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .user_agent("kg-portal/1.0")
//!     .build()?;
//!
//! let groups: Vec<Group> = client
//!     .execute(&RequestDescriptor::get("https://api.example.com/groups"))
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod descriptor;
mod error;
mod layers;
mod response;
mod tls;

pub use builder::HttpClientBuilder;
pub use client::{BufferedService, HttpClient, ServiceFuture};
pub use config::{DEFAULT_USER_AGENT, HttpClientConfig, TlsRootConfig, TransportSecurity};
pub use descriptor::RequestDescriptor;
pub use error::{HttpError, InvalidUriKind};
pub use layers::{UserAgentLayer, UserAgentService};
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, ResponseBody, full_body};
