// In-memory credential store

use std::sync::{Arc, PoisonError, RwLock};

/// Holds the current bearer token.
///
/// Cloning is cheap and every clone observes the same value, so the store can be
/// handed to the executor, the refresh coordinator and the terminator alike.
#[derive(Clone, Default)]
pub struct CredentialStore {
    token: Arc<RwLock<Option<String>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a token (restored session, tests)
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(token);
        store
    }

    pub fn get(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Replace the token only if it still equals `expected`.
    /// Returns false when another writer got there first.
    pub fn replace_if(&self, expected: Option<&str>, token: impl Into<String>) -> bool {
        let mut guard = self.token.write().unwrap_or_else(PoisonError::into_inner);
        if guard.as_deref() != expected {
            return false;
        }
        *guard = Some(token.into());
        true
    }

    pub fn is_present(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("present", &self.is_present())
            .finish()
    }
}
