//! Process-wide context (spec §9 "Global singletons"): a single top-level object initialized
//! from config at startup and threaded explicitly into every component constructor, replacing
//! the module-level mutable globals (`rabbitmq_client`, `mongodb_conn`, `minio_client`) the
//! original system relied on.

use std::sync::Arc;

use crate::broker::BrokerClient;
use crate::config::Settings;
use crate::document_store::DocumentStoreClient;
use crate::http_fetcher::Fetcher;
use crate::object_store::ObjectStoreClient;

#[derive(Clone)]
pub struct Context {
    pub broker: Arc<dyn BrokerClient>,
    pub document_store: Arc<dyn DocumentStoreClient>,
    pub object_store: Arc<dyn ObjectStoreClient>,
    pub http_fetcher: Arc<dyn Fetcher>,
    pub settings: Arc<Settings>,
}
