//! ObjectStoreClient (spec §4.3): opaque byte blobs under content-addressed keys.

mod s3;

pub use s3::S3ObjectStore;

use async_trait::async_trait;

use crate::error::ObjectStoreError;

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn put_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>)
        -> Result<(), ObjectStoreError>;

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Idempotent; buckets are created on first use, no versioning semantics required.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError>;
}
