//! Scriptable stand-ins for Earth Engine, for unit tests: a mock of the
//! service trait, and a canned-reply HTTP server for the real client.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::{
    auth::AccessToken,
    config::Credentials,
    earthengine::{ImageRef, ImageryService, ThumbnailParams},
    expr::SceneQuery,
    session::Session,
};

pub fn credentials() -> Credentials {
    Credentials {
        project_id: "test-project".to_owned(),
        client_email: "svc@test-project.iam.gserviceaccount.com".to_owned(),
        private_key: "unused".to_owned(),
    }
}

#[derive(Default)]
pub struct MockService {
    pub image: Option<String>,
    pub thumb_id: String,
    pub token_lifetime_secs: AtomicU64,

    pub fail_auth: AtomicBool,
    pub fail_init: AtomicBool,
    pub fail_thumbnail: AtomicBool,
    pub auth_delay_ms: AtomicU64,

    pub auth_calls: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub thumb_calls: AtomicUsize,

    pub last_query: Mutex<Option<(SceneQuery, Vec<[f64; 2]>)>>,
    pub last_params: Mutex<Option<ThumbnailParams>>,
}

impl MockService {
    pub fn with_image(thumb_id: &str) -> Self {
        MockService {
            image: Some("COPERNICUS/S2_SR/20240214T143729_20240214T144442_T19HCC".to_owned()),
            thumb_id: thumb_id.to_owned(),
            token_lifetime_secs: AtomicU64::new(3600),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        MockService {
            token_lifetime_secs: AtomicU64::new(3600),
            ..Default::default()
        }
    }

    pub fn total_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
            + self.init_calls.load(Ordering::SeqCst)
            + self.query_calls.load(Ordering::SeqCst)
            + self.thumb_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageryService for MockService {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AccessToken> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.auth_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        if self.fail_auth.load(Ordering::SeqCst) {
            bail!("invalid_grant: bad key");
        }

        let lifetime = self.token_lifetime_secs.load(Ordering::SeqCst) as i64;
        Ok(AccessToken {
            value: format!("token-for-{}", credentials.client_email),
            expires_at: Utc::now() + Duration::seconds(lifetime),
        })
    }

    async fn initialize(&self, token: &AccessToken, project: &str) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        assert!(token.value.starts_with("token-for-"));
        assert_eq!(project, "test-project");

        if self.fail_init.load(Ordering::SeqCst) {
            bail!("PERMISSION_DENIED: project not registered");
        }

        Ok(())
    }

    async fn first_image(
        &self,
        session: &Session,
        query: &SceneQuery,
        ring: &[[f64; 2]],
    ) -> Result<Option<ImageRef>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(session.project, "test-project");
        *self.last_query.lock().unwrap() = Some((query.clone(), ring.to_vec()));
        Ok(self.image.clone().map(|id| ImageRef { id }))
    }

    async fn thumbnail_id(
        &self,
        _session: &Session,
        _image: &ImageRef,
        params: &ThumbnailParams,
    ) -> Result<String> {
        self.thumb_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());

        if self.fail_thumbnail.load(Ordering::SeqCst) {
            return Err(anyhow!("thumbnail rendering failed"));
        }

        Ok(self.thumb_id.clone())
    }
}

/// A throwaway HTTP server that answers each incoming connection with the
/// next canned reply, then hangs up.
pub struct StubServer {
    pub base: String,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub fn request(&self, n: usize) -> String {
        self.requests.lock().unwrap()[n].clone()
    }
}

pub async fn stub_server(replies: Vec<(u16, &'static str)>) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        for (status, body) in replies {
            let (mut stream, _) = listener.accept().await.unwrap();
            let raw = read_request(&mut stream).await;
            seen.lock().unwrap().push(raw);

            let reply = format!(
                "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
    });

    StubServer { base, requests }
}

/// Read one request: the headers, then `content-length` bytes of body.
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let wanted = text[..end]
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + wanted {
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}
