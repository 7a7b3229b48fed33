//! Query and command surface over the shared session.

use crate::api::SessionApi;
use crate::error::{SessionError, SessionResult};
use crate::state::{Grant, Session};
use crate::task::ConnectionTask;
use secrecy::SecretString;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Parses a server URL, accepting a bare `host[:port]`.
///
/// A missing scheme defaults to `https`.
pub fn parse_server_url(raw: &str) -> SessionResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidUrl(raw.to_string()));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate).map_err(|e| SessionError::InvalidUrl(format!("{raw}: {e}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(SessionError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

/// Login, logout, reset and remote-file commands.
///
/// Each command reads what it needs from the session under the lock,
/// releases it for the network call, and commits through a
/// [`ConnectionTask`] completion callback.
#[derive(Clone)]
pub struct SessionClient {
    session: Session,
    api: Arc<dyn SessionApi>,
    timeout: Duration,
}

impl SessionClient {
    pub fn new(session: Session, api: Arc<dyn SessionApi>, timeout: Duration) -> Self {
        Self {
            session,
            api,
            timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn get_expiry(&self) -> Option<Instant> {
        self.session.expiry()
    }

    pub fn get_token(&self) -> Option<SecretString> {
        self.session.token()
    }

    pub fn get_server_url(&self) -> Option<Url> {
        self.session.server_url()
    }

    fn server(&self) -> SessionResult<Url> {
        self.session.server_url().ok_or(SessionError::NoServer)
    }

    /// Points the session at another server and drops any credentials.
    pub fn reset(&self, server_url: &str) -> SessionResult<()> {
        let url = parse_server_url(server_url)?;
        self.session.reset(url);
        Ok(())
    }

    pub async fn ping(&self) -> SessionResult<()> {
        let server = self.server()?;
        let api = Arc::clone(&self.api);
        ConnectionTask::spawn_with_timeout(
            self.timeout,
            async move { api.ping(&server).await },
            |result| debug!(ok = result.is_ok(), "Ping finished"),
        )
        .join()
        .await
    }

    pub async fn login(&self, user: &str, password: SecretString) -> SessionResult<()> {
        let server = self.server()?;
        let api = Arc::clone(&self.api);
        let session = self.session.clone();
        let user = user.to_string();
        let committed_user = user.clone();
        ConnectionTask::spawn_with_timeout(
            self.timeout,
            async move { api.login(&server, &user, &password).await },
            move |result: &SessionResult<Grant>| {
                if let Ok(grant) = result {
                    session.commit_grant(&committed_user, grant);
                }
            },
        )
        .join()
        .await
        .map(|_| ())
    }

    /// Ends the session on the server and locally.
    ///
    /// A rejected token is already dead, so the session is cleared then too;
    /// a transient failure leaves it intact.
    pub async fn logout(&self) -> SessionResult<()> {
        let snapshot = self.session.snapshot();
        let server = snapshot.server_url.ok_or(SessionError::NoServer)?;
        let token = snapshot.token.ok_or(SessionError::NotAuthenticated)?;
        let generation = snapshot.generation;
        let api = Arc::clone(&self.api);
        let session = self.session.clone();
        let result = ConnectionTask::spawn_with_timeout(
            self.timeout,
            async move { api.logout(&server, &token).await },
            move |result| match result {
                Ok(()) | Err(SessionError::Rejected { .. }) => {
                    session.clear_if(generation);
                }
                Err(_) => {}
            },
        )
        .join()
        .await;
        match result {
            Err(SessionError::Rejected { status }) => {
                info!(status, "Server had already ended the session");
                Ok(())
            }
            other => other,
        }
    }

    /// Runs an authenticated remote-file call. A rejection clears the
    /// session.
    async fn authenticated<T, F, Fut>(&self, call: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn SessionApi>, Url, SecretString) -> Fut,
        Fut: Future<Output = SessionResult<T>> + Send + 'static,
    {
        let snapshot = self.session.snapshot();
        let server = snapshot.server_url.ok_or(SessionError::NoServer)?;
        let token = snapshot.token.ok_or(SessionError::NotAuthenticated)?;
        let generation = snapshot.generation;
        let session = self.session.clone();
        ConnectionTask::spawn_with_timeout(
            self.timeout,
            call(Arc::clone(&self.api), server, token),
            move |result| {
                if let Err(SessionError::Rejected { .. }) = result {
                    session.clear_if(generation);
                }
            },
        )
        .join()
        .await
    }

    pub async fn fetch_file(&self, file: &str) -> SessionResult<Vec<u8>> {
        let file = file.to_string();
        self.authenticated(|api, server, token| async move {
            api.fetch(&server, &token, &file).await
        })
        .await
    }

    pub async fn delete_file(&self, file: &str) -> SessionResult<()> {
        let file = file.to_string();
        self.authenticated(|api, server, token| async move {
            api.delete(&server, &token, &file).await
        })
        .await
    }

    pub async fn rename_file(&self, file: &str, new_name: &str) -> SessionResult<()> {
        let file = file.to_string();
        let new_name = new_name.to_string();
        self.authenticated(|api, server, token| async move {
            api.rename(&server, &token, &file, &new_name).await
        })
        .await
    }

    pub async fn write_file(&self, file: &str, data: Vec<u8>) -> SessionResult<()> {
        let file = file.to_string();
        self.authenticated(|api, server, token| async move {
            api.write(&server, &token, &file, data).await
        })
        .await
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("session", &self.session)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_url() {
        assert_eq!(
            parse_server_url("vdu.example:4443").unwrap().as_str(),
            "https://vdu.example:4443/"
        );
        assert_eq!(
            parse_server_url("http://localhost:8080").unwrap().as_str(),
            "http://localhost:8080/"
        );
        assert!(parse_server_url("").is_err());
        assert!(parse_server_url("ftp://vdu.example").is_err());
        assert!(parse_server_url("https://").is_err());
    }
}
