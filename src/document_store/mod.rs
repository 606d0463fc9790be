//! DocumentStoreClient (spec §4.2): typed collections over a dynamic-schema document store.
//!
//! Documents, filters and updates are all `serde_json::Value` at the trait boundary (the spec's
//! wire shapes are already JSON-shaped: `{field: value}` filters, `{"$set": {...}}` updates).
//! Callers serialize their typed structs in and `serde_json::from_value` the results back out;
//! keeping the trait generic-free keeps it object-safe, so it can be shared as `Arc<dyn
//! DocumentStoreClient>` across Master/WorkerExecutor/CookieRefresher/BrowserWorker.

mod mongo;

pub use mongo::MongoDocumentStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DocumentStoreError;

/// Filter document, using `{field: value}` / `{field: {"$in": [...]}}` shape (spec §6).
pub type Filter = Value;
/// Update document, using `{"$set": {...}}` / `{"$unset": {...}}` shape (spec §6).
pub type Update = Value;

/// Result of an update: how many documents the filter matched (not just how many changed),
/// so callers can tell "applied" apart from "lost a compare-and-set race".
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

#[async_trait]
pub trait DocumentStoreClient: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: Filter,
        limit: Option<i64>,
        sort: Option<Value>,
    ) -> Result<Vec<Value>, DocumentStoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Option<Value>, DocumentStoreError>;

    async fn insert_one(&self, collection: &str, doc: Value) -> Result<(), DocumentStoreError>;

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Value>,
    ) -> Result<(), DocumentStoreError>;

    async fn update_one(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
    ) -> Result<UpdateOutcome, DocumentStoreError>;

    async fn update_many(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
    ) -> Result<UpdateOutcome, DocumentStoreError>;

    async fn drop(&self, collection: &str) -> Result<(), DocumentStoreError>;
}
