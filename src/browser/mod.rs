//! BrowserWorker (spec §4.8, §9 "one browser per process"): consumes cookie jobs and drives a
//! single long-lived headless browser to capture the headers a real browser sends for a target
//! URL, writing them back onto the owning datasource config.
//!
//! Grounded on the teacher's `scrapers/browser.rs` (`Browser::launch`, CDP `page.execute`,
//! page lifecycle) generalized from cookie-jar extraction to full outgoing-request-header
//! capture via the CDP `Network.requestWillBeSent` event stream, per spec §4.8's header-capture
//! requirement (the teacher only needed cookies, not arbitrary headers).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{EnableParams, EventRequestWillBeSent};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{AckAction, DeliveryMetadata};
use crate::document_store::DocumentStoreClient;

const COLLECTION: &str = "recruitment_datasource_config";
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(20);

pub struct CookieJob {
    pub datasource_id: String,
    pub url: String,
}

/// Owns the single browser instance for the process lifetime. Jobs are processed one at a time
/// on the task that owns the browser, never via a fresh `tokio::spawn` per job, so there is
/// never more than one open page racing CDP commands against the same browser connection.
pub struct BrowserWorker {
    browser: Mutex<Browser>,
    document_store: Arc<dyn DocumentStoreClient>,
}

impl BrowserWorker {
    pub async fn launch(document_store: Arc<dyn DocumentStoreClient>) -> anyhow::Result<Self> {
        let config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to launch browser: {e}"))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(BrowserWorker {
            browser: Mutex::new(browser),
            document_store,
        })
    }

    /// Drives the cookie-job consume loop. Jobs arrive over `rx` rather than being dispatched
    /// directly from the broker handler, keeping every CDP interaction on this one task.
    pub async fn run(&self, mut rx: mpsc::Receiver<(CookieJob, mpsc::Sender<AckAction>)>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = rx.recv() => {
                    let Some((job, reply)) = job else { break };
                    let action = match self.process_job(&job).await {
                        Ok(()) => AckAction::Ack,
                        Err(e) => {
                            warn!(id = %job.datasource_id, error = %e, "cookie job failed, requeuing");
                            AckAction::NackRequeue
                        }
                    };
                    let _ = reply.send(action).await;
                }
            }
        }
    }

    async fn process_job(&self, job: &CookieJob) -> anyhow::Result<()> {
        let browser = self.browser.lock().await;
        let page = browser.new_page("about:blank").await?;

        page.execute(EnableParams::default()).await?;

        let mut events = page.event_listener::<EventRequestWillBeSent>().await?;
        let target = job.url.clone();
        let (tx, mut capture_rx) = mpsc::channel(1);
        let listen_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.request.url == target {
                    let raw = serde_json::to_value(&event.request.headers).unwrap_or(json!({}));
                    let headers = strip_pseudo_headers(&raw);
                    let _ = tx.send(headers).await;
                    break;
                }
            }
        });

        page.execute(NavigateParams::new(job.url.clone())).await?;

        let headers = tokio::time::timeout(CAPTURE_TIMEOUT, capture_rx.recv())
            .await
            .ok()
            .flatten();
        listen_task.abort();
        let _ = page.close().await;

        let Some(headers) = headers else {
            anyhow::bail!("no matching request observed for {} within timeout", job.url);
        };

        self.document_store
            .update_one(
                COLLECTION,
                json!({"id": job.datasource_id}),
                json!({"$set": {"request_params.headers": headers}}),
            )
            .await?;

        info!(id = %job.datasource_id, header_count = headers.len(), "captured browser headers");
        Ok(())
    }
}

/// CDP reports HTTP/2 pseudo-headers (`:method`, `:path`, ...) alongside real headers; they
/// aren't valid to replay on a plain HTTP/1.1 request.
fn strip_pseudo_headers(headers: &serde_json::Value) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(obj) = headers.as_object() {
        for (k, v) in obj {
            if k.starts_with(':') {
                continue;
            }
            if let Some(s) = v.as_str() {
                out.insert(k.clone(), s.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_pseudo_headers_drops_colon_prefixed_keys() {
        let raw = json!({
            ":method": "GET",
            ":path": "/x",
            "user-agent": "test-agent",
            "accept": "*/*",
        });
        let cleaned = strip_pseudo_headers(&raw);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned.get("user-agent"), Some(&"test-agent".to_string()));
        assert!(!cleaned.contains_key(":method"));
    }
}
