use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, RANGE};
use reqwest::Client;

use crate::core::error::{LauncherError, LauncherResult};

const APP_USER_AGENT: &str = concat!("convoy/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

pub fn build_http_client() -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    // Digests are computed over the exact bytes served.
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .build()
}

/// An open streamed transfer.
pub struct Transfer {
    pub status: u16,
    /// Bytes the body will carry, when the server says so.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, LauncherResult<Vec<u8>>>,
}

impl Transfer {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `206 Partial Content`: the body continues from the requested offset.
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }
}

/// Network seam used by the resolver and the download manager.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a small document; non-2xx statuses are errors.
    async fn get_document(&self, url: &str) -> LauncherResult<Vec<u8>>;

    /// Open a streamed GET, asking for a byte range when `offset > 0`.
    async fn open(&self, url: &str, offset: u64) -> LauncherResult<Transfer>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn with_default_client() -> LauncherResult<Self> {
        Ok(Self::new(build_http_client()?))
    }
}

fn network_error(url: &str, err: reqwest::Error) -> LauncherError {
    LauncherError::Network {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_document(&self, url: &str) -> LauncherResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| network_error(url, e))?;
        Ok(bytes.to_vec())
    }

    async fn open(&self, url: &str, offset: u64) -> LauncherResult<Transfer> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request.send().await.map_err(|e| network_error(url, e))?;
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let owned_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| network_error(&owned_url, e))
            })
            .boxed();

        Ok(Transfer {
            status,
            content_length,
            body,
        })
    }
}
