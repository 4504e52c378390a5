//! Session Credential Abstraction
//!
//! The core never acquires or stores credentials itself. The host supplies
//! the current opaque cookie-equivalent string and its validity window; a
//! missing or expired session is a hard precondition failure for every
//! remote call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::{BridgeError, Result};

/// Opaque credential material for the remote provider.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    /// Raw `Cookie` header value
    pub cookie: String,
    /// End of the validity window, if known
    pub expires_at: Option<DateTime<Utc>>,
    /// Login of the authenticated user, if known
    pub login: Option<String>,
}

impl SessionCredential {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            expires_at: None,
            login: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    /// Non-empty and not past its expiry at `now`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.cookie.trim().is_empty() && self.expires_at.map_or(true, |at| at > now)
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("cookie", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("login", &self.login)
            .finish()
    }
}

/// Supplies the current session to the core.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Current credential, or `None` when the user is signed out
    async fn current_session(&self) -> Result<Option<SessionCredential>>;

    /// Current credential if it is valid at `now`
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unauthorized`] when there is no session or it
    /// has expired.
    async fn require_session(&self, now: DateTime<Utc>) -> Result<SessionCredential> {
        match self.current_session().await? {
            Some(session) if session.is_valid(now) => Ok(session),
            Some(_) => Err(BridgeError::Unauthorized("session expired".to_string())),
            None => Err(BridgeError::Unauthorized("no active session".to_string())),
        }
    }
}
