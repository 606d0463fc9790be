//! S3-compatible [`ObjectStoreClient`](super::ObjectStoreClient), also used against MinIO
//! by pointing `endpoint_url` at a MinIO deployment.

use async_trait::async_trait;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use crate::error::ObjectStoreError;

use super::ObjectStoreClient;

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(
        endpoint_url: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "dspider");
        let config = aws_sdk_s3::Config::builder()
            .endpoint_url(endpoint_url)
            .credentials_provider(credentials)
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .force_path_style(true)
            .behavior_version_latest()
            .build();
        S3ObjectStore {
            client: Client::from_conf(config),
        }
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ObjectStoreError> {
        self.ensure_bucket(bucket).await?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
        debug!(bucket, key, "put object");
        Ok(())
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(ref se) if se.err().is_no_such_key() => {
                    ObjectStoreError::NotFound(key.to_string())
                }
                other => ObjectStoreError::Transport(other.to_string()),
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(_) => {
                match self.client.create_bucket().bucket(bucket).send().await {
                    Ok(_) => Ok(()),
                    // Another worker raced us to create it; that's fine.
                    Err(e) if e.to_string().contains("BucketAlreadyOwnedByYou") => Ok(()),
                    Err(e) => Err(ObjectStoreError::Transport(e.to_string())),
                }
            }
        }
    }
}
