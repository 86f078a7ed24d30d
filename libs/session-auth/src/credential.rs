use arc_swap::ArcSwapOption;
use std::sync::Arc;

use crate::token::RefreshCredential;

/// Read-only access to the refresh credential.
///
/// Called once per refresh attempt. The session client never writes the
/// credential back.
pub trait RefreshCredentialSource: Send + Sync {
    fn refresh_credential(&self) -> Option<RefreshCredential>;
}

/// A credential fixed at construction time.
#[derive(Debug, Clone)]
pub struct StaticRefreshCredential(RefreshCredential);

impl StaticRefreshCredential {
    #[must_use]
    pub fn new(credential: RefreshCredential) -> Self {
        Self(credential)
    }
}

impl RefreshCredentialSource for StaticRefreshCredential {
    fn refresh_credential(&self) -> Option<RefreshCredential> {
        Some(self.0.clone())
    }
}

/// Credential slot shared between a login flow (writer) and the session
/// client (reader). Clones share the slot.
#[derive(Clone, Default)]
pub struct SharedRefreshCredential {
    slot: Arc<ArcSwapOption<RefreshCredential>>,
}

impl SharedRefreshCredential {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the credential; `None` removes it.
    pub fn set(&self, credential: Option<RefreshCredential>) {
        self.slot.store(credential.map(Arc::new));
    }
}

impl std::fmt::Debug for SharedRefreshCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRefreshCredential")
            .field("present", &self.slot.load().is_some())
            .finish()
    }
}

impl RefreshCredentialSource for SharedRefreshCredential {
    fn refresh_credential(&self) -> Option<RefreshCredential> {
        self.slot
            .load_full()
            .map(|credential| RefreshCredential::clone(&credential))
    }
}
