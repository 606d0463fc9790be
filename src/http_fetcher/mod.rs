//! HTTPFetcher (spec §4.4): one HTTP request with bounded retries and optional proxy.

mod proxy;

pub use proxy::{NoProxyPool, Proxy, ProxyPool, ProxyPoolKind};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::{debug, warn};

use crate::error::FetchError;

/// Thin trait wrapper around [`HttpFetcher`] so spiders can be driven by a fake fetcher in
/// tests without making real network calls.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
    pub expected_status: u16,
    pub max_retries: u32,
    pub retry_delay_base: Duration,
    pub need_proxy: bool,
    pub proxy_pool: ProxyPoolKind,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        FetchRequest {
            method: Method::GET,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(30),
            expected_status: 200,
            max_retries: 3,
            retry_delay_base: Duration::from_secs(1),
            need_proxy: false,
            proxy_pool: ProxyPoolKind::Free,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub elapsed_ms: u64,
    pub attempts: u32,
}

pub struct HttpFetcher {
    client: Client,
    proxy_pool: Box<dyn ProxyPool>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher {
            client: Client::builder()
                .gzip(true)
                .brotli(true)
                .build()
                .expect("failed to build http client"),
            proxy_pool: Box::new(NoProxyPool),
        }
    }

    pub fn with_proxy_pool(mut self, pool: Box<dyn ProxyPool>) -> Self {
        self.proxy_pool = pool;
        self
    }

    /// Executes one logical request, retrying transport errors and status mismatches up to
    /// `max_retries` times with `retry_delay_base * attempt` between attempts. A proxy (if
    /// `need_proxy`) is acquired once for the whole logical request, not once per retry.
    pub async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, FetchError> {
        let proxy = if req.need_proxy {
            Some(self.proxy_pool.acquire(req.proxy_pool).await?)
        } else {
            None
        };

        let client = match &proxy {
            Some(p) => self.client_with_proxy(p)?,
            None => self.client.clone(),
        };

        let start = Instant::now();
        let mut last_err = None;

        for attempt in 1..=req.max_retries.max(1) {
            match self.attempt_once(&client, &req).await {
                Ok(resp) if u16::from(resp.status()) == req.expected_status => {
                    let body = resp
                        .bytes()
                        .await
                        .map_err(FetchError::from)?
                        .to_vec();
                    return Ok(FetchResponse {
                        status: req.expected_status,
                        body,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        attempts: attempt,
                    });
                }
                Ok(resp) => {
                    let actual = resp.status().as_u16();
                    let body = resp.bytes().await.unwrap_or_default().to_vec();
                    if attempt == req.max_retries.max(1) {
                        return Ok(FetchResponse {
                            status: actual,
                            body,
                            elapsed_ms: start.elapsed().as_millis() as u64,
                            attempts: attempt,
                        });
                    }
                    last_err = Some(FetchError::StatusMismatch {
                        expected: req.expected_status,
                        actual,
                    });
                }
                Err(e) => {
                    warn!(url = %req.url, attempt, error = %e, "fetch attempt failed");
                    last_err = Some(e);
                }
            }

            if attempt < req.max_retries.max(1) {
                tokio::time::sleep(req.retry_delay_base * attempt).await;
            }
        }

        Err(last_err.unwrap_or(FetchError::HttpTransport("exhausted retries".into())))
    }

    fn client_with_proxy(&self, proxy: &Proxy) -> Result<Client, FetchError> {
        let reqwest_proxy =
            reqwest::Proxy::all(&proxy.url).map_err(|e| FetchError::ProxyConnect(e.to_string()))?;
        Client::builder()
            .gzip(true)
            .brotli(true)
            .proxy(reqwest_proxy)
            .build()
            .map_err(|e| FetchError::ProxyConnect(e.to_string()))
    }

    async fn attempt_once(
        &self,
        client: &Client,
        req: &FetchRequest,
    ) -> Result<reqwest::Response, FetchError> {
        let mut builder = client
            .request(req.method.clone(), &req.url)
            .timeout(req.timeout);

        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        debug!(url = %req.url, method = %req.method, "sending request");
        builder.send().await.map_err(FetchError::from)
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, FetchError> {
        HttpFetcher::fetch(self, req).await
    }
}
