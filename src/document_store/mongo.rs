//! MongoDB-backed [`DocumentStoreClient`](super::DocumentStoreClient).

use async_trait::async_trait;
use mongodb::bson::{self, Document};
use mongodb::options::{FindOneOptions, FindOptions, UpdateOptions};
use mongodb::Client;
use serde_json::Value;

use crate::error::DocumentStoreError;

use super::{DocumentStoreClient, Filter, Update, UpdateOutcome};

#[derive(Clone)]
pub struct MongoDocumentStore {
    client: Client,
    db_name: String,
}

impl MongoDocumentStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, DocumentStoreError> {
        let client = Client::with_uri_str(uri).await?;
        Ok(MongoDocumentStore {
            client,
            db_name: db_name.to_string(),
        })
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.client.database(&self.db_name).collection(name)
    }
}

fn json_to_bson_doc(value: Value) -> Result<Document, DocumentStoreError> {
    bson::to_document(&value).map_err(|e| DocumentStoreError::BadQuery(e.to_string()))
}

fn bson_doc_to_json(doc: Document) -> Result<Value, DocumentStoreError> {
    bson::from_document(doc).map_err(|e| DocumentStoreError::BadQuery(e.to_string()))
}

#[async_trait]
impl DocumentStoreClient for MongoDocumentStore {
    async fn find(
        &self,
        collection: &str,
        filter: Filter,
        limit: Option<i64>,
        sort: Option<Value>,
    ) -> Result<Vec<Value>, DocumentStoreError> {
        use futures::stream::TryStreamExt;

        let filter_doc = json_to_bson_doc(filter)?;
        let mut options = FindOptions::default();
        options.limit = limit;
        if let Some(sort) = sort {
            options.sort = Some(json_to_bson_doc(sort)?);
        }

        let mut cursor = self
            .collection(collection)
            .find(filter_doc)
            .with_options(options)
            .await?;

        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            out.push(bson_doc_to_json(doc)?);
        }
        Ok(out)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Option<Value>, DocumentStoreError> {
        let filter_doc = json_to_bson_doc(filter)?;
        let result = self
            .collection(collection)
            .find_one(filter_doc)
            .with_options(FindOneOptions::default())
            .await?;
        result.map(bson_doc_to_json).transpose()
    }

    async fn insert_one(&self, collection: &str, doc: Value) -> Result<(), DocumentStoreError> {
        let doc = json_to_bson_doc(doc)?;
        self.collection(collection).insert_one(doc).await?;
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Value>,
    ) -> Result<(), DocumentStoreError> {
        let docs = docs
            .into_iter()
            .map(json_to_bson_doc)
            .collect::<Result<Vec<_>, _>>()?;
        if docs.is_empty() {
            return Ok(());
        }
        self.collection(collection).insert_many(docs).await?;
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
    ) -> Result<UpdateOutcome, DocumentStoreError> {
        let filter_doc = json_to_bson_doc(filter)?;
        let update_doc = json_to_bson_doc(update)?;
        let result = self
            .collection(collection)
            .update_one(filter_doc, update_doc)
            .with_options(UpdateOptions::default())
            .await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
    ) -> Result<UpdateOutcome, DocumentStoreError> {
        let filter_doc = json_to_bson_doc(filter)?;
        let update_doc = json_to_bson_doc(update)?;
        let result = self
            .collection(collection)
            .update_many(filter_doc, update_doc)
            .await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn drop(&self, collection: &str) -> Result<(), DocumentStoreError> {
        self.collection(collection).drop().await?;
        Ok(())
    }
}
