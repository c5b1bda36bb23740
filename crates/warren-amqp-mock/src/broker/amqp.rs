//! Production broker binding on lapin (AMQP 0.9.1).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::warn;

use super::{BrokerChannel, BrokerConnection, BrokerError, Delivery, DeliveryStream, Publication};

/// An established AMQP connection.
pub struct AmqpConnection {
    inner: Connection,
}

impl AmqpConnection {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let inner = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Dials the broker, retrying once per second until `timeout` elapses.
    pub async fn connect_with_retry(url: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match Self::connect(url).await {
                Ok(connection) => return Ok(connection),
                Err(err) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(BrokerError::Connect(format!(
                            "connection timeout after {}s: {err}",
                            timeout.as_secs()
                        )));
                    }
                    warn!(error = %err, "failed to establish broker connection, retrying in one second");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub async fn close(&self) -> Result<(), BrokerError> {
        match self.inner.close(200, "shutting down").await {
            Ok(()) => Ok(()),
            Err(lapin::Error::InvalidConnectionState(_)) => Ok(()),
            Err(e) => Err(BrokerError::Close(e.to_string())),
        }
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|e| BrokerError::OpenChannel(e.to_string()))?;
        Ok(Box::new(AmqpChannel { inner: channel }))
    }
}

struct AmqpChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let stream = consumer
            .filter_map(|delivery| async move {
                match delivery {
                    Ok(delivery) => Some(Delivery {
                        exchange: delivery.exchange.to_string(),
                        routing_key: delivery.routing_key.to_string(),
                        body: Bytes::from(delivery.data),
                        reply_to: delivery
                            .properties
                            .reply_to()
                            .as_ref()
                            .map(|s| s.as_str().to_string())
                            .unwrap_or_default(),
                        correlation_id: delivery
                            .properties
                            .correlation_id()
                            .as_ref()
                            .map(|s| s.as_str().to_string())
                            .unwrap_or_default(),
                        delivery_tag: delivery.delivery_tag,
                    }),
                    Err(err) => {
                        warn!(error = %err, "dropping errored delivery");
                        None
                    }
                }
            })
            .boxed();

        Ok(stream)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Publication,
    ) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(message.content_type))
            .with_correlation_id(ShortString::from(message.correlation_id));

        let _confirm = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                &message.body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|e| BrokerError::Ack {
                delivery_tag,
                reason: e.to_string(),
            })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        match self.inner.close(200, "unsubscribed").await {
            Ok(()) => Ok(()),
            // closing twice is fine, the broker already tore the channel down
            Err(lapin::Error::InvalidChannelState(_)) => Ok(()),
            Err(e) => Err(BrokerError::Close(e.to_string())),
        }
    }
}
