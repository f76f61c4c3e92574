//! Backend adapter implementations.
//!
//! Each adapter owns one live session to a hosted service and knows how to
//! perform a keep-alive write against it and close it again. Adapters are
//! built from a [`BackendDescriptor`] by [`connect`], which dispatches on
//! the descriptor's connection parameters.

pub mod document;
pub mod memory;
pub mod queue;
pub mod relational;

pub use document::MongoAdapter;
pub use memory::{MemoryAdapter, MemoryBackend};
pub use queue::AmqpAdapter;
pub use relational::PostgresAdapter;

use crate::error::KeeperError;
use crate::types::{
    BackendDescriptor, BackendKind, CleanupOutcome, ConnectionParams, KeepAliveRecord,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Backend adapter trait
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Kind of backend this adapter talks to
    fn kind(&self) -> BackendKind;

    /// Write one keep-alive record, bootstrapping the schema if needed
    async fn sustain(&mut self, hostname: &str) -> Result<KeepAliveRecord, KeeperError>;

    /// Prune the log to the `retention_limit` most recent records.
    ///
    /// Runs after a successful [`sustain`](BackendAdapter::sustain) and
    /// returns [`CleanupOutcome::Pruned`] or [`CleanupOutcome::NotApplicable`].
    async fn cleanup(&mut self, retention_limit: u32) -> Result<CleanupOutcome, KeeperError>;

    /// Close the session. Releasing twice is a no-op.
    async fn release(&mut self) -> Result<(), KeeperError>;
}

/// Connect the adapter selected by the descriptor's kind.
///
/// The whole handshake is bounded by the descriptor's operation timeout.
/// The queue adapter enforces that deadline itself so it can close a
/// half-open broker connection.
pub async fn connect(descriptor: &BackendDescriptor) -> Result<Box<dyn BackendAdapter>, KeeperError> {
    let kind = descriptor.kind();
    let limit = descriptor.operation_timeout;

    debug!(backend = %kind, timeout_ms = limit.as_millis(), "Connecting backend adapter");

    let adapter: Box<dyn BackendAdapter> = match &descriptor.params {
        ConnectionParams::DocumentStore { uri, database } => {
            Box::new(bounded(kind, limit, MongoAdapter::connect(uri, database, limit)).await?)
        }
        ConnectionParams::RelationalStore { uri, password } => Box::new(
            bounded(kind, limit, PostgresAdapter::connect(uri, password.as_deref(), limit)).await?,
        ),
        ConnectionParams::Queue { uri, queue } => {
            Box::new(AmqpAdapter::connect(uri, queue, limit).await?)
        }
    };
    Ok(adapter)
}

async fn bounded<T>(
    kind: BackendKind,
    limit: Duration,
    connecting: impl Future<Output = Result<T, KeeperError>>,
) -> Result<T, KeeperError> {
    match timeout(limit, connecting).await {
        Ok(result) => result,
        Err(_) => Err(KeeperError::timeout(kind, "connect", limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn descriptor(params: ConnectionParams) -> BackendDescriptor {
        let mut descriptor = BackendDescriptor::new(params);
        descriptor.operation_timeout = Duration::from_secs(2);
        descriptor
    }

    #[tokio::test]
    async fn test_queue_connect_rejects_malformed_uri() {
        let result = connect(&descriptor(ConnectionParams::Queue {
            uri: "not-a-uri".to_string(),
            queue: "keep_alive_reserved".to_string(),
        }))
        .await;

        let err = result.err().expect("malformed uri must not connect");
        assert_eq!(err.kind(), BackendKind::Queue);
    }

    #[tokio::test]
    async fn test_relational_connect_rejects_malformed_uri() {
        let result = connect(&descriptor(ConnectionParams::RelationalStore {
            uri: "definitely not postgres".to_string(),
            password: None,
        }))
        .await;

        let err = result.err().expect("malformed uri must not connect");
        assert!(matches!(err, KeeperError::Connection { .. }));
        assert_eq!(err.kind(), BackendKind::RelationalStore);
    }

    #[tokio::test]
    async fn test_document_connect_rejects_malformed_uri() {
        let result = connect(&descriptor(ConnectionParams::DocumentStore {
            uri: "http://example.invalid".to_string(),
            database: "keeper".to_string(),
        }))
        .await;

        let err = result.err().expect("malformed uri must not connect");
        assert_eq!(err.kind(), BackendKind::DocumentStore);
    }
}
