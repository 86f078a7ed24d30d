#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Session-aware HTTP client for the kindergarten portal backend.
//!
//! [`AuthenticatedClient::send`] attaches the session's bearer token to each
//! request. When the backend rejects an expired token, one shared refresh
//! is run for every request rejected at the same time, and each of them is
//! replayed once with the new token. If the refresh itself fails, all of
//! them fail with [`SessionError::SessionExpired`] and the configured
//! [`SessionTerminator`] runs once.
//!
//! # Example
//!
//! ```ignore
//! use session_auth::{
//!     AuthenticatedClient, SessionClientConfig, SharedRefreshCredential, DEFAULT_ENV_PREFIX,
//! };
//! use session_http::RequestDescriptor;
//! use std::sync::Arc;
//!
//! let config = SessionClientConfig::load(Some("session.yaml".as_ref()), DEFAULT_ENV_PREFIX)?;
//! let credential = SharedRefreshCredential::new();
//! let client = AuthenticatedClient::from_config(&config, Arc::new(credential.clone()))?
//!     .terminator(Arc::new(scope.clone()))
//!     .build();
//!
//! let children = client
//!     .send(RequestDescriptor::get("/children"))
//!     .await?
//!     .json::<Vec<Child>>()
//!     .await?;
//! ```

mod client;
mod config;
mod coordinator;
mod credential;
mod endpoint;
mod error;
pub mod metrics;
mod store;
mod terminator;
mod token;

pub use client::{AuthenticatedClient, AuthenticatedClientBuilder};
pub use config::{DEFAULT_ENV_PREFIX, SessionClientConfig};
pub use coordinator::RefreshCoordinator;
pub use credential::{RefreshCredentialSource, SharedRefreshCredential, StaticRefreshCredential};
pub use endpoint::{
    CredentialPlacement, DEFAULT_REFRESH_COOKIE, HttpRefreshEndpoint, RefreshEndpoint,
    RefreshError,
};
pub use error::{ConfigError, SessionError, SessionExpiry};
pub use metrics::{LoggingMetrics, NoOpMetrics, SessionEvent, SessionMetrics};
pub use store::{InMemoryTokenStore, TokenStore};
pub use terminator::{FnTerminator, LoggingTerminator, SessionTerminator};
pub use token::{AccessToken, RefreshCredential};

/// Re-exported for implementors of the collaborator traits.
pub use async_trait::async_trait;
