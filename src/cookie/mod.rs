//! CookieRefresher (spec §4.8): periodically scans every datasource config and enqueues one
//! cookie-capture job per config (that carries a `social_index_url`) onto the cookie queue for a
//! [`BrowserWorker`] to pick up.
//!
//! Grounded on `cookie_manager.py`'s `CookieManager.start` poll pattern — an unfiltered
//! `find()` over the whole collection every `update_interval` seconds — adapted from its
//! signal-driven dispatch to this crate's broker-queue dispatch (there is no in-process signal
//! bus here — everything crosses a process boundary via the broker, same as Master/Worker).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::broker::BrokerClient;
use crate::config::CookieRefresherConfig;
use crate::document_store::DocumentStoreClient;

const COLLECTION: &str = "recruitment_datasource_config";

pub struct CookieRefresher {
    broker: Arc<dyn BrokerClient>,
    document_store: Arc<dyn DocumentStoreClient>,
    config: CookieRefresherConfig,
}

impl CookieRefresher {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        document_store: Arc<dyn DocumentStoreClient>,
        config: CookieRefresherConfig,
    ) -> Self {
        CookieRefresher {
            broker,
            document_store,
            config,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.broker.declare_queue(&self.config.task_queue, true, 0).await?;

        while !cancel.is_cancelled() {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "cookie refresh iteration failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.update_interval_seconds)) => {}
                _ = cancel.cancelled() => break,
            }
        }
        Ok(())
    }

    async fn run_once(&self) -> anyhow::Result<usize> {
        let docs = self.document_store.find(COLLECTION, json!({}), None, None).await?;

        let mut enqueued = 0usize;
        for doc in &docs {
            let Some(id) = doc.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(url) = doc
                .get("social_index_url")
                .and_then(|v| v.as_str())
                .filter(|u| !u.is_empty())
            else {
                continue;
            };

            let job = json!({"datasource_id": id, "url": url});
            let body = serde_json::to_vec(&job)?;
            if let Err(e) = self
                .broker
                .publish(&self.config.task_queue, "", &body, true, 0)
                .await
            {
                error!(id, error = %e, "failed to enqueue cookie job");
                continue;
            }
            enqueued += 1;
        }

        info!(enqueued, total = docs.len(), "cookie refresh scan complete");
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::{Filter, Update, UpdateOutcome};
    use crate::error::{BrokerError, DocumentStoreError};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    struct RecordingBroker {
        published: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BrokerClient for RecordingBroker {
        async fn declare_queue(&self, _: &str, _: bool, _: u8) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn declare_exchange(&self, _: &str, _: bool) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn bind_queue(&self, _: &str, _: &str, _: &str) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn publish(&self, _: &str, _: &str, body: &[u8], _: bool, _: u8) -> Result<(), BrokerError> {
            self.published.lock().unwrap().push(String::from_utf8_lossy(body).to_string());
            Ok(())
        }
        async fn consume(
            &self,
            _: &str,
            _: u16,
            _: crate::broker::DeliveryHandler,
            _: CancellationToken,
        ) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn queue_depth(&self, _: &str) -> Result<u32, BrokerError> {
            Ok(0)
        }
    }

    struct FixedStore(Vec<Value>);

    #[async_trait]
    impl DocumentStoreClient for FixedStore {
        async fn find(&self, _: &str, _: Filter, _: Option<i64>, _: Option<Value>) -> Result<Vec<Value>, DocumentStoreError> {
            Ok(self.0.clone())
        }
        async fn find_one(&self, _: &str, _: Filter) -> Result<Option<Value>, DocumentStoreError> {
            Ok(None)
        }
        async fn insert_one(&self, _: &str, _: Value) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn insert_many(&self, _: &str, _: Vec<Value>) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn update_one(&self, _: &str, _: Filter, _: Update) -> Result<UpdateOutcome, DocumentStoreError> {
            Ok(UpdateOutcome::default())
        }
        async fn update_many(&self, _: &str, _: Filter, _: Update) -> Result<UpdateOutcome, DocumentStoreError> {
            Ok(UpdateOutcome::default())
        }
        async fn drop(&self, _: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn skips_configs_without_a_social_index_url() {
        let broker = Arc::new(RecordingBroker { published: Mutex::new(Vec::new()) });
        let store = Arc::new(FixedStore(vec![
            json!({"id": "a", "social_index_url": "https://x/a"}),
            json!({"id": "b", "social_index_url": ""}),
            json!({"id": "c"}),
        ]));

        let refresher = CookieRefresher::new(broker.clone(), store, CookieRefresherConfig::default());
        let enqueued = refresher.run_once().await.unwrap();

        assert_eq!(enqueued, 1);
        assert_eq!(broker.published.lock().unwrap().len(), 1);
    }
}
