//! Session providers for desktop hosts

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    session::{SessionCredential, SessionProvider},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory session that the host updates after sign-in or sign-out.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    session: RwLock<Option<SessionCredential>>,
}

impl StaticSessionProvider {
    pub fn new(session: Option<SessionCredential>) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    /// Replace the current session
    pub async fn set_session(&self, session: Option<SessionCredential>) {
        *self.session.write().await = session;
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self) -> Result<Option<SessionCredential>> {
        Ok(self.session.read().await.clone())
    }
}

#[derive(Debug, Deserialize)]
struct SessionFile {
    cookie: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    login: Option<String>,
}

/// Reads the session from a JSON file written by the host's login flow.
///
/// The file is re-read on every call so a fresh login is picked up without
/// restarting. A missing file means "signed out".
#[derive(Debug, Clone)]
pub struct FileSessionProvider {
    path: PathBuf,
}

impl FileSessionProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionProvider for FileSessionProvider {
    async fn current_session(&self) -> Result<Option<SessionCredential>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No session file");
                return Ok(None);
            }
            Err(e) => return Err(BridgeError::Io(e)),
        };

        let file: SessionFile = serde_json::from_slice(&raw).map_err(|e| {
            BridgeError::OperationFailed(format!("Invalid session file: {}", e))
        })?;

        Ok(Some(SessionCredential {
            cookie: file.cookie,
            expires_at: file.expires_at,
            login: file.login,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_swaps_session() {
        let provider = StaticSessionProvider::default();
        assert!(provider.current_session().await.unwrap().is_none());

        provider
            .set_session(Some(SessionCredential::new("_yuque_session=abc")))
            .await;
        let session = provider.require_session(Utc::now()).await.unwrap();
        assert_eq!(session.cookie, "_yuque_session=abc");
    }

    #[tokio::test]
    async fn test_file_provider_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            r#"{"cookie":"_yuque_session=xyz","expires_at":"2099-01-01T00:00:00Z","login":"alice"}"#,
        )
        .unwrap();

        let provider = FileSessionProvider::new(&path);
        let session = provider.current_session().await.unwrap().unwrap();

        assert_eq!(session.cookie, "_yuque_session=xyz");
        assert_eq!(session.login.as_deref(), Some("alice"));
        assert!(session.is_valid(Utc::now()));
    }

    #[tokio::test]
    async fn test_file_provider_missing_file_is_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileSessionProvider::new(dir.path().join("absent.json"));

        let err = provider.require_session(Utc::now()).await.unwrap_err();
        assert!(err.is_unauthorized());
    }
}
