//! MongoDB document-store adapter.

use super::BackendAdapter;
use crate::error::KeeperError;
use crate::types::{BackendKind, CleanupOutcome, KEEP_ALIVE_COLLECTION, KeepAliveRecord};
use async_trait::async_trait;
use mongodb::bson::{DateTime as BsonDateTime, Document, doc, oid::ObjectId};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::{Client, Collection, IndexModel};
use std::time::Duration;
use tracing::{debug, warn};

const KIND: BackendKind = BackendKind::DocumentStore;

/// Index created by earlier releases; its uniqueness broke inserts.
const LEGACY_INDEX: &str = "id_1";

/// Server error code for a missing index.
const INDEX_NOT_FOUND: i32 = 27;

/// MongoDB adapter
pub struct MongoAdapter {
    client: Option<Client>,
    database: String,
}

impl MongoAdapter {
    /// Connect and confirm the deployment answers a `ping`
    pub async fn connect(uri: &str, database: &str, limit: Duration) -> Result<Self, KeeperError> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| KeeperError::connection(KIND, format!("failed to parse mongodb uri: {e}")))?;

        options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
        options.connect_timeout = Some(limit);
        options.server_selection_timeout = Some(limit);
        options.app_name = Some("freeplan-keeper".to_string());

        let client = Client::with_options(options)
            .map_err(|e| KeeperError::connection(KIND, format!("failed to construct client: {e}")))?;

        if let Err(e) = client.database("admin").run_command(doc! { "ping": 1 }).await {
            client.shutdown().await;
            return Err(KeeperError::connection(KIND, format!("failed to ping MongoDB: {e}")));
        }

        debug!(database, "MongoDB session established");

        Ok(Self {
            client: Some(client),
            database: database.to_string(),
        })
    }

    fn collection(&self) -> Result<Collection<Document>, KeeperError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| KeeperError::sustain(KIND, "client already released"))?;
        Ok(client.database(&self.database).collection(KEEP_ALIVE_COLLECTION))
    }

    /// Create the descending timestamp index and drop the legacy one
    async fn ensure_schema(collection: &Collection<Document>) -> Result<(), KeeperError> {
        let index = IndexModel::builder().keys(doc! { "ping_timestamp": -1 }).build();
        collection
            .create_index(index)
            .await
            .map_err(|e| KeeperError::sustain(KIND, format!("failed to create index: {e}")))?;

        if let Err(e) = collection.drop_index(LEGACY_INDEX).await {
            if !is_index_not_found(&e) {
                warn!(backend = %KIND, error = %e, "Failed to drop legacy id index");
            }
        }

        Ok(())
    }

    /// Delete every record beyond the `limit` most recent ones
    async fn prune(collection: &Collection<Document>, limit: u32) -> Result<u64, KeeperError> {
        let cutoff = collection
            .find_one(doc! {})
            .sort(retention_order())
            .skip(u64::from(limit))
            .await
            .map_err(|e| KeeperError::cleanup(KIND, format!("failed to find cutoff record: {e}")))?;

        let Some(cutoff) = cutoff else {
            return Ok(0);
        };

        let timestamp = *cutoff
            .get_datetime("ping_timestamp")
            .map_err(|e| KeeperError::cleanup(KIND, format!("cutoff record has no timestamp: {e}")))?;
        let id = cutoff
            .get_object_id("_id")
            .map_err(|e| KeeperError::cleanup(KIND, format!("cutoff record has no object id: {e}")))?;

        let result = collection
            .delete_many(beyond_cutoff(timestamp, id))
            .await
            .map_err(|e| KeeperError::cleanup(KIND, format!("failed to delete old records: {e}")))?;

        Ok(result.deleted_count)
    }
}

#[async_trait]
impl BackendAdapter for MongoAdapter {
    fn kind(&self) -> BackendKind {
        KIND
    }

    async fn sustain(&mut self, hostname: &str) -> Result<KeepAliveRecord, KeeperError> {
        let collection = self.collection()?;
        Self::ensure_schema(&collection).await?;

        let id = ObjectId::new();
        let record = KeepAliveRecord::new(KIND, hostname).with_id(id.to_hex());
        let document = doc! {
            "_id": id,
            "ping_timestamp": BsonDateTime::from_millis(record.ping_timestamp.timestamp_millis()),
            "ping_source": record.ping_source.as_str(),
            "ping_details": {
                "hostname": record.ping_details.hostname.as_str(),
                "version": record.ping_details.version.as_str(),
            },
        };

        collection
            .insert_one(document)
            .await
            .map_err(|e| KeeperError::sustain(KIND, format!("failed to insert keep-alive record: {e}")))?;

        Ok(record)
    }

    async fn cleanup(&mut self, retention_limit: u32) -> Result<CleanupOutcome, KeeperError> {
        let collection = self
            .collection()
            .map_err(|_| KeeperError::cleanup(KIND, "client already released"))?;
        Self::prune(&collection, retention_limit)
            .await
            .map(CleanupOutcome::Pruned)
    }

    async fn release(&mut self) -> Result<(), KeeperError> {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
            debug!("MongoDB session closed");
        }
        Ok(())
    }
}

/// Newest first; `_id` breaks timestamp ties
fn retention_order() -> Document {
    doc! { "ping_timestamp": -1, "_id": -1 }
}

/// The cutoff record and everything after it in [`retention_order`]
fn beyond_cutoff(timestamp: BsonDateTime, id: ObjectId) -> Document {
    doc! {
        "$or": [
            { "ping_timestamp": { "$lt": timestamp } },
            { "ping_timestamp": timestamp, "_id": { "$lte": id } },
        ]
    }
}

fn is_index_not_found(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => command.code == INDEX_NOT_FOUND,
        _ => err.to_string().contains("index not found"),
    }
}
