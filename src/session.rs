//! Client-side session holder consumed by portal front ends. Keeps the bearer
//! token and cached user view in memory, persists the token across restarts,
//! and reacts to authorization failures by dropping back to anonymous.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::auth::dto::PublicUser;

#[derive(Debug, Error)]
pub enum ApiFailure {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Transport(String),
}

/// The one server call session restore needs: exchange a token for the
/// current user view.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn fetch_profile(&self, token: &str) -> Result<PublicUser, ApiFailure>;
}

/// Durable token storage surviving process restarts.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, token: &str);
    fn clear(&self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Anonymous,
    Authenticated { token: String, user: PublicUser },
}

pub struct SessionClient<A: IdentityApi, S: TokenStore> {
    api: A,
    store: S,
    state: SessionState,
}

impl<A: IdentityApi, S: TokenStore> SessionClient<A, S> {
    pub fn new(api: A, store: S) -> Self {
        Self {
            api,
            store,
            state: SessionState::Anonymous,
        }
    }

    /// Start-up restore. Always resolves: Authenticated when a stored token
    /// still passes the identity fetch, Anonymous otherwise (the token is
    /// dropped on any failure).
    pub async fn initialize(&mut self) -> &SessionState {
        let Some(token) = self.store.load() else {
            self.state = SessionState::Anonymous;
            return &self.state;
        };
        match self.api.fetch_profile(&token).await {
            Ok(user) => self.state = SessionState::Authenticated { token, user },
            Err(e) => {
                warn!(error = %e, "session restore failed, dropping token");
                self.store.clear();
                self.state = SessionState::Anonymous;
            }
        }
        &self.state
    }

    /// Adopt a fresh token after login or registration.
    pub fn establish(&mut self, token: String, user: PublicUser) {
        self.store.save(&token);
        self.state = SessionState::Authenticated { token, user };
    }

    /// Reaction to a 401 from any authenticated call: clear everything and
    /// return to the unauthenticated entry point.
    pub fn on_unauthorized(&mut self) {
        self.store.clear();
        self.state = SessionState::Anonymous;
    }

    /// Logout is purely client-side; the token simply stops being presented.
    pub fn logout(&mut self) {
        self.store.clear();
        self.state = SessionState::Anonymous;
    }

    pub fn token(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated { token, .. } => Some(token),
            SessionState::Anonymous => None,
        }
    }

    pub fn user(&self) -> Option<&PublicUser> {
        match &self.state {
            SessionState::Authenticated { user, .. } => Some(user),
            SessionState::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated { .. })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    token: String,
}

/// Token store backed by a small JSON file.
pub struct FileTokenStore {
    path: std::path::PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let stored: StoredToken = serde_json::from_str(&raw).ok()?;
        Some(stored.token)
    }

    fn save(&self, token: &str) {
        let stored = StoredToken {
            token: token.to_string(),
        };
        if let Ok(raw) = serde_json::to_string(&stored) {
            if let Err(e) = std::fs::write(&self.path, raw) {
                warn!(error = %e, "failed to persist session token");
            }
        }
    }

    fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
