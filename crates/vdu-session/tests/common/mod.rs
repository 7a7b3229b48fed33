//! Shared fakes for session integration tests.

// Not all tests use all helpers
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;
use vdu_session::{Grant, SessionApi, SessionError, SessionResult};

pub fn server() -> Url {
    Url::parse("https://vdu.test:4443").unwrap()
}

pub fn grant(token: &str, secs: u64) -> Grant {
    Grant {
        token: SecretString::from(token),
        expires_in: Duration::from_secs(secs),
    }
}

/// A scripted reply.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    /// Succeed with a token valid for this many seconds.
    Grant(u64),
    Connection,
    Rejected,
    NotFound,
}

impl Reply {
    fn into_result(self, token: String) -> SessionResult<Grant> {
        match self {
            Self::Grant(secs) => Ok(Grant {
                token: SecretString::from(token),
                expires_in: Duration::from_secs(secs),
            }),
            Self::Connection => Err(SessionError::ConnectionFailure("connection refused".into())),
            Self::Rejected => Err(SessionError::Rejected { status: 401 }),
            Self::NotFound => Err(SessionError::NotFound("file".into())),
        }
    }
}

/// In-memory [`SessionApi`] with scripted replies and call counters.
#[derive(Default)]
pub struct FakeApi {
    refresh_replies: Mutex<VecDeque<Reply>>,
    other_replies: Mutex<VecDeque<Reply>>,
    refresh_delay: Mutex<Duration>,
    pub refresh_calls: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
    /// Token seen by the last authenticated call.
    pub last_token: Mutex<Option<String>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues replies for `refresh`; once exhausted it grants 60 s tokens.
    pub fn script_refresh(&self, replies: &[Reply]) {
        self.refresh_replies.lock().extend(replies.iter().copied());
    }

    /// Queues replies for every other call; once exhausted they succeed.
    pub fn script(&self, replies: &[Reply]) {
        self.other_replies.lock().extend(replies.iter().copied());
    }

    pub fn delay_refresh(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String, token: Option<&SecretString>) -> SessionResult<Grant> {
        if let Some(token) = token {
            *self.last_token.lock() = Some(token.expose_secret().to_string());
        }
        self.calls.lock().push(call);
        let reply = self.other_replies.lock().pop_front().unwrap_or(Reply::Grant(60));
        reply.into_result("login-token".into())
    }
}

#[async_trait]
impl SessionApi for FakeApi {
    async fn ping(&self, _server: &Url) -> SessionResult<()> {
        self.record("ping".into(), None).map(|_| ())
    }

    async fn login(
        &self,
        _server: &Url,
        user: &str,
        password: &SecretString,
    ) -> SessionResult<Grant> {
        self.record(format!("login {user}:{}", password.expose_secret()), None)
    }

    async fn refresh(&self, _server: &Url, token: &SecretString) -> SessionResult<Grant> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_token.lock() = Some(token.expose_secret().to_string());
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self.refresh_replies.lock().pop_front().unwrap_or(Reply::Grant(60));
        reply.into_result(format!("refreshed-{n}"))
    }

    async fn logout(&self, _server: &Url, token: &SecretString) -> SessionResult<()> {
        self.record("logout".into(), Some(token)).map(|_| ())
    }

    async fn fetch(
        &self,
        _server: &Url,
        token: &SecretString,
        file: &str,
    ) -> SessionResult<Vec<u8>> {
        self.record(format!("fetch {file}"), Some(token))
            .map(|_| format!("contents of {file}").into_bytes())
    }

    async fn delete(&self, _server: &Url, token: &SecretString, file: &str) -> SessionResult<()> {
        self.record(format!("delete {file}"), Some(token)).map(|_| ())
    }

    async fn rename(
        &self,
        _server: &Url,
        token: &SecretString,
        file: &str,
        new_name: &str,
    ) -> SessionResult<()> {
        self.record(format!("rename {file}={new_name}"), Some(token))
            .map(|_| ())
    }

    async fn write(
        &self,
        _server: &Url,
        token: &SecretString,
        file: &str,
        data: Vec<u8>,
    ) -> SessionResult<()> {
        self.record(format!("write {file} {}", data.len()), Some(token))
            .map(|_| ())
    }
}

/// One request received by [`MockServer`].
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A canned response for a method and path.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: &'static str,
    pub path: &'static str,
    pub status: u16,
    pub body: Vec<u8>,
}

impl Route {
    pub fn new(method: &'static str, path: &'static str, status: u16, body: &str) -> Self {
        Self {
            method,
            path,
            status,
            body: body.as_bytes().to_vec(),
        }
    }
}

/// Minimal HTTP/1.1 server on loopback. Unknown routes answer 404.
pub struct MockServer {
    pub url: Url,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let Some(request) = read_request(&mut stream).await else {
                    continue;
                };
                let route = routes
                    .iter()
                    .find(|r| r.method == request.method && r.path == request.path);
                let (status, body) = route.map_or((404, Vec::new()), |r| (r.status, r.body.clone()));
                recorded.lock().push(request);
                let head = format!(
                    "HTTP/1.1 {status} Mock\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            }
        });
        Self {
            url: Url::parse(&format!("http://{addr}")).unwrap(),
            requests,
            task,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some(Recorded {
        method,
        path,
        headers,
        body,
    })
}
