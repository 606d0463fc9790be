//! Proxy acquisition (spec §4.4): proxy is acquired once per logical request, not per retry.
//! Acquisition itself retries internally (5 attempts, 1s fixed delay) and is fatal on exhaustion.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyPoolKind {
    Free,
    Paid,
}

#[derive(Debug, Clone)]
pub struct Proxy {
    pub url: String,
}

#[async_trait]
pub trait ProxyPool: Send + Sync {
    async fn acquire(&self, kind: ProxyPoolKind) -> Result<Proxy, FetchError>;
}

/// Default pool: `need_proxy=true` without a configured backend is a `CONFIG`-class error
/// surfaced at the call site, not a silently-degraded direct connection.
pub struct NoProxyPool;

#[async_trait]
impl ProxyPool for NoProxyPool {
    async fn acquire(&self, _kind: ProxyPoolKind) -> Result<Proxy, FetchError> {
        Err(FetchError::ProxyAcquire(
            "no proxy pool configured".to_string(),
        ))
    }
}

/// A proxy pool backed by a fixed list, cycling through entries and retrying acquisition
/// up to 5 times with a 1s fixed delay before giving up.
pub struct StaticProxyPool {
    free: Vec<String>,
    paid: Vec<String>,
    counter: std::sync::atomic::AtomicUsize,
}

impl StaticProxyPool {
    pub fn new(free: Vec<String>, paid: Vec<String>) -> Self {
        StaticProxyPool {
            free,
            paid,
            counter: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProxyPool for StaticProxyPool {
    async fn acquire(&self, kind: ProxyPoolKind) -> Result<Proxy, FetchError> {
        let list = match kind {
            ProxyPoolKind::Free => &self.free,
            ProxyPoolKind::Paid => &self.paid,
        };

        for _ in 0..5 {
            if !list.is_empty() {
                let idx = self
                    .counter
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                    % list.len();
                return Ok(Proxy {
                    url: list[idx].clone(),
                });
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        Err(FetchError::ProxyAcquire(format!(
            "no proxies available in {kind:?} pool after 5 attempts"
        )))
    }
}
