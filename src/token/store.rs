//! Credential Store
//!
//! Holds the current credential for one identity. Reads are lock-free
//! snapshots; only the token manager mutates it.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{Credential, SessionLogin};

/// Current credential plus the long-lived login used to obtain it.
pub struct CredentialStore {
    login: SessionLogin,
    current: ArcSwapOption<Credential>,
}

impl CredentialStore {
    /// Create an empty store for the given login.
    pub fn new(login: SessionLogin) -> Self {
        Self {
            login,
            current: ArcSwapOption::empty(),
        }
    }

    /// Identity the store authenticates as.
    pub fn identity(&self) -> &str {
        &self.login.identity
    }

    pub(crate) fn secret(&self) -> &SecretString {
        &self.login.secret
    }

    /// Snapshot of the current credential.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current.load_full()
    }

    /// Current credential if it outlives `buffer`.
    pub fn fresh(&self, buffer: Duration, now: DateTime<Utc>) -> Option<Arc<Credential>> {
        self.current
            .load_full()
            .filter(|credential| credential.is_fresh(buffer, now))
    }

    /// Whether a present credential is held.
    pub fn is_authenticated(&self) -> bool {
        self.current()
            .map(|credential| !credential.is_absent())
            .unwrap_or(false)
    }

    pub(crate) fn replace(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        self.current.store(Some(Arc::clone(&credential)));
        credential
    }

    pub(crate) fn clear(&self) {
        self.current.store(None);
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("identity", &self.login.identity)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
