//! Remote API surface used by the session and the scheduler.
//!
//! [`SessionApi`] is the seam between session logic and the transport;
//! [`HttpApi`] is the `reqwest` implementation. Authenticated requests carry
//! the bearer token in the [`API_KEY_HEADER`] header.

use crate::error::{SessionError, SessionResult};
use crate::state::Grant;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Header carrying the session token.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Calls against the remote service.
///
/// Every method is one request; none of them touch the session.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Checks that the server answers.
    async fn ping(&self, server: &Url) -> SessionResult<()>;

    async fn login(&self, server: &Url, user: &str, password: &SecretString)
    -> SessionResult<Grant>;

    /// Exchanges a still-valid token for a fresh one.
    async fn refresh(&self, server: &Url, token: &SecretString) -> SessionResult<Grant>;

    async fn logout(&self, server: &Url, token: &SecretString) -> SessionResult<()>;

    async fn fetch(&self, server: &Url, token: &SecretString, file: &str)
    -> SessionResult<Vec<u8>>;

    async fn delete(&self, server: &Url, token: &SecretString, file: &str) -> SessionResult<()>;

    async fn rename(
        &self,
        server: &Url,
        token: &SecretString,
        file: &str,
        new_name: &str,
    ) -> SessionResult<()>;

    async fn write(
        &self,
        server: &Url,
        token: &SecretString,
        file: &str,
        data: Vec<u8>,
    ) -> SessionResult<()>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    user: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RenameRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct GrantResponse {
    token: String,
    expires_in: u64,
}

impl From<GrantResponse> for Grant {
    fn from(response: GrantResponse) -> Self {
        Self {
            token: SecretString::from(response.token),
            expires_in: Duration::from_secs(response.expires_in),
        }
    }
}

/// Builds `server` + `segments`, percent-encoding each segment.
pub fn endpoint(server: &Url, segments: &[&str]) -> SessionResult<Url> {
    let mut url = server.clone();
    url.path_segments_mut()
        .map_err(|()| SessionError::InvalidUrl(server.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// [`SessionApi`] over HTTPS with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    timeout: Duration,
}

impl HttpApi {
    /// Creates a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> SessionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vdu/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SessionError::ConnectionFailure(format!("Failed to build client: {e}")))?;
        Ok(Self { client, timeout })
    }

    fn transport_error(&self, e: &reqwest::Error) -> SessionError {
        if e.is_timeout() {
            SessionError::Timeout(self.timeout)
        } else {
            SessionError::ConnectionFailure(e.to_string())
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> SessionResult<Response> {
        let response = request.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();
        trace!(what, status = status.as_u16(), "Response received");
        if status.is_success() {
            Ok(response)
        } else {
            debug!(what, status = status.as_u16(), "Request failed");
            Err(SessionError::from_status(status.as_u16(), what))
        }
    }

    async fn grant(&self, request: RequestBuilder, what: &str) -> SessionResult<Grant> {
        let response = self.send(request, what).await?;
        let body: GrantResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Malformed(e.to_string()))?;
        Ok(body.into())
    }
}

#[async_trait]
impl SessionApi for HttpApi {
    async fn ping(&self, server: &Url) -> SessionResult<()> {
        let url = endpoint(server, &["ping"])?;
        self.send(self.client.get(url), "ping").await?;
        Ok(())
    }

    async fn login(
        &self,
        server: &Url,
        user: &str,
        password: &SecretString,
    ) -> SessionResult<Grant> {
        let url = endpoint(server, &["auth"])?;
        let body = LoginRequest {
            user,
            password: password.expose_secret(),
        };
        self.grant(self.client.post(url).json(&body), "login").await
    }

    async fn refresh(&self, server: &Url, token: &SecretString) -> SessionResult<Grant> {
        let url = endpoint(server, &["auth"])?;
        let request = self
            .client
            .get(url)
            .header(API_KEY_HEADER, token.expose_secret());
        self.grant(request, "refresh").await
    }

    async fn logout(&self, server: &Url, token: &SecretString) -> SessionResult<()> {
        let url = endpoint(server, &["auth"])?;
        let request = self
            .client
            .delete(url)
            .header(API_KEY_HEADER, token.expose_secret());
        self.send(request, "logout").await?;
        Ok(())
    }

    async fn fetch(
        &self,
        server: &Url,
        token: &SecretString,
        file: &str,
    ) -> SessionResult<Vec<u8>> {
        let url = endpoint(server, &["file", file])?;
        let request = self
            .client
            .get(url)
            .header(API_KEY_HEADER, token.expose_secret());
        let response = self.send(request, file).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&e))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, server: &Url, token: &SecretString, file: &str) -> SessionResult<()> {
        let url = endpoint(server, &["file", file])?;
        let request = self
            .client
            .delete(url)
            .header(API_KEY_HEADER, token.expose_secret());
        self.send(request, file).await?;
        Ok(())
    }

    async fn rename(
        &self,
        server: &Url,
        token: &SecretString,
        file: &str,
        new_name: &str,
    ) -> SessionResult<()> {
        let url = endpoint(server, &["file", file, "rename"])?;
        let request = self
            .client
            .post(url)
            .header(API_KEY_HEADER, token.expose_secret())
            .json(&RenameRequest { name: new_name });
        self.send(request, file).await?;
        Ok(())
    }

    async fn write(
        &self,
        server: &Url,
        token: &SecretString,
        file: &str,
        data: Vec<u8>,
    ) -> SessionResult<()> {
        let url = endpoint(server, &["file", file])?;
        let request = self
            .client
            .post(url)
            .header(API_KEY_HEADER, token.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        self.send(request, file).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_layout() {
        let server = Url::parse("https://vdu.example:4443").unwrap();
        assert_eq!(
            endpoint(&server, &["auth"]).unwrap().as_str(),
            "https://vdu.example:4443/auth"
        );
        let based = Url::parse("https://vdu.example/api/").unwrap();
        assert_eq!(
            endpoint(&based, &["file", "abc", "rename"]).unwrap().as_str(),
            "https://vdu.example/api/file/abc/rename"
        );
    }

    #[test]
    fn test_endpoint_encodes_tokens() {
        let server = Url::parse("http://localhost:8080").unwrap();
        let url = endpoint(&server, &["file", "a b/c"]).unwrap();
        assert_eq!(url.path(), "/file/a%20b%2Fc");
    }

    #[test]
    fn test_endpoint_rejects_opaque_urls() {
        let server = Url::parse("mailto:ops@vdu.example").unwrap();
        assert!(matches!(
            endpoint(&server, &["auth"]),
            Err(SessionError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_grant_from_response() {
        let body: GrantResponse =
            serde_json::from_str(r#"{"token":"abc","expires_in":90}"#).unwrap();
        let grant = Grant::from(body);
        assert_eq!(grant.token.expose_secret(), "abc");
        assert_eq!(grant.expires_in, Duration::from_secs(90));
    }

    #[test]
    fn test_client_creation() {
        assert!(HttpApi::new(Duration::from_secs(5)).is_ok());
    }
}
