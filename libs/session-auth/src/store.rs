use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;

use crate::token::AccessToken;

/// Where the current access token lives outside the session client.
///
/// The client keeps its own mirror of the token and consults the store
/// only when the mirror is empty. Lookups are bounded by the configured
/// token lookup timeout.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current token, or `None` when signed out.
    async fn current_token(&self) -> Option<AccessToken>;

    /// Persist a refreshed token. `None` signals logout.
    async fn set_token(&self, token: Option<AccessToken>);
}

/// Lock-free in-process [`TokenStore`].
#[derive(Default)]
pub struct InMemoryTokenStore {
    token: ArcSwapOption<AccessToken>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(token: AccessToken) -> Self {
        Self {
            token: ArcSwapOption::from_pointee(token),
        }
    }

    /// Synchronous read of the stored token.
    #[must_use]
    pub fn snapshot(&self) -> Option<AccessToken> {
        self.token.load_full().map(|token| AccessToken::clone(&token))
    }
}

impl std::fmt::Debug for InMemoryTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTokenStore")
            .field("has_token", &self.token.load().is_some())
            .finish()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn current_token(&self) -> Option<AccessToken> {
        self.snapshot()
    }

    async fn set_token(&self, token: Option<AccessToken>) {
        self.token.store(token.map(Arc::new));
    }
}
