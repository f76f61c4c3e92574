//! AMQP 0-9-1 queue adapter.
//!
//! The published message is the keep-alive record. There is no server-side
//! log to prune, so retention is not applicable here.

use super::BackendAdapter;
use crate::error::KeeperError;
use crate::types::{BackendKind, CleanupOutcome, KeepAliveRecord};
use async_trait::async_trait;
use lapin::options::{
    BasicGetOptions, BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_executor_trait::Tokio as TokioExecutor;
use tracing::{debug, warn};

const KIND: BackendKind = BackendKind::Queue;

const REPLY_SUCCESS: u16 = 200;

/// Persistent delivery mode
const DELIVERY_PERSISTENT: u8 = 2;

/// AMQP adapter
pub struct AmqpAdapter {
    connection: Option<Connection>,
    channel: Option<Channel>,
    queue: String,
}

impl AmqpAdapter {
    /// Connect, open a confirming channel and declare the durable queue.
    ///
    /// The handshake and channel setup share one deadline of `limit`. A
    /// connection that opened before a setup failure or timeout is closed
    /// before the error is returned.
    pub async fn connect(uri: &str, queue: &str, limit: Duration) -> Result<Self, KeeperError> {
        let deadline = Instant::now() + limit;
        let properties = ConnectionProperties::default().with_executor(TokioExecutor::current());

        let connection = match timeout_at(deadline, Connection::connect(uri, properties)).await {
            Ok(result) => result
                .map_err(|e| KeeperError::connection(KIND, format!("failed to connect to broker: {e}")))?,
            Err(_) => return Err(KeeperError::timeout(KIND, "connect", limit)),
        };

        let setup = match timeout_at(deadline, Self::open_channel(&connection, queue)).await {
            Ok(result) => result,
            Err(_) => Err(KeeperError::timeout(KIND, "connect", limit)),
        };

        match setup {
            Ok(channel) => {
                debug!(queue, "AMQP channel open");
                Ok(Self {
                    connection: Some(connection),
                    channel: Some(channel),
                    queue: queue.to_string(),
                })
            }
            Err(e) => {
                Self::close_partial(connection, limit).await;
                Err(e)
            }
        }
    }

    async fn close_partial(connection: Connection, limit: Duration) {
        match timeout(limit, connection.close(REPLY_SUCCESS, "setup failed")).await {
            Ok(Ok(())) => debug!("Closed connection after setup error"),
            Ok(Err(e)) => {
                warn!(backend = %KIND, error = %e, "Failed to close connection after setup error");
            }
            Err(_) => warn!(backend = %KIND, "Timed out closing connection after setup error"),
        }
    }

    async fn open_channel(connection: &Connection, queue: &str) -> Result<Channel, KeeperError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| KeeperError::connection(KIND, format!("failed to open channel: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| KeeperError::connection(KIND, format!("failed to enable publisher confirms: {e}")))?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| KeeperError::connection(KIND, format!("failed to declare queue: {e}")))?;

        Ok(channel)
    }
}

#[async_trait]
impl BackendAdapter for AmqpAdapter {
    fn kind(&self) -> BackendKind {
        KIND
    }

    async fn sustain(&mut self, hostname: &str) -> Result<KeepAliveRecord, KeeperError> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| KeeperError::sustain(KIND, "channel already released"))?;

        let record = KeepAliveRecord::new(KIND, hostname);
        let body = serde_json::to_vec(&record)
            .map_err(|e| KeeperError::sustain(KIND, format!("failed to marshal message: {e}")))?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(DELIVERY_PERSISTENT);

        let confirmation = channel
            .basic_publish("", &self.queue, BasicPublishOptions::default(), &body, properties)
            .await
            .map_err(|e| KeeperError::sustain(KIND, format!("failed to publish message: {e}")))?
            .await
            .map_err(|e| KeeperError::sustain(KIND, format!("publisher confirm failed: {e}")))?;

        if confirmation.is_nack() {
            return Err(KeeperError::sustain(KIND, "broker rejected keep-alive message"));
        }

        // Draining one message keeps the consumer side active and the queue short.
        match channel
            .basic_get(&self.queue, BasicGetOptions { no_ack: true })
            .await
        {
            Ok(Some(message)) => {
                debug!(
                    bytes = message.delivery.data.len(),
                    remaining = message.message_count,
                    "Received keep-alive message"
                );
            }
            Ok(None) => debug!(queue = %self.queue, "Queue empty after publish"),
            Err(e) => {
                return Err(KeeperError::sustain(KIND, format!("failed to drain message: {e}")));
            }
        }

        Ok(record)
    }

    async fn cleanup(&mut self, _retention_limit: u32) -> Result<CleanupOutcome, KeeperError> {
        Ok(CleanupOutcome::NotApplicable)
    }

    async fn release(&mut self) -> Result<(), KeeperError> {
        let mut first_error = None;

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close(REPLY_SUCCESS, "keeper stopping").await {
                first_error = Some(KeeperError::release(KIND, format!("failed to close channel: {e}")));
            }
        }

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close(REPLY_SUCCESS, "keeper stopping").await {
                first_error.get_or_insert(KeeperError::release(
                    KIND,
                    format!("failed to close connection: {e}"),
                ));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
