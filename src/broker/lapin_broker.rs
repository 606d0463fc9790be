//! `lapin`-backed [`BrokerClient`](super::BrokerClient) (AMQP 0-9-1).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use futures::StreamExt;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::BrokerError;

use super::{AckAction, BrokerClient, DeliveryHandler, DeliveryMetadata};

pub struct LapinBroker {
    uri: String,
    state: Mutex<Option<(Connection, Channel)>>,
}

impl LapinBroker {
    pub fn new(uri: impl Into<String>) -> Self {
        LapinBroker {
            uri: uri.into(),
            state: Mutex::new(None),
        }
    }

    async fn ensure_channel(&self) -> Result<Channel, BrokerError> {
        let mut guard = self.state.lock().await;
        if let Some((conn, channel)) = guard.as_ref() {
            if conn.status().connected() && channel.status().connected() {
                return Ok(channel.clone());
            }
        }
        let conn = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(BrokerError::from)?;
        let channel = conn.create_channel().await.map_err(BrokerError::from)?;
        *guard = Some((conn, channel.clone()));
        Ok(channel)
    }

    /// Tear down and rebuild connection+channel in one step.
    pub async fn reset_connection(&self) -> Result<(), BrokerError> {
        let mut guard = self.state.lock().await;
        *guard = None;
        drop(guard);
        self.ensure_channel().await.map(|_| ())
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64;
    let cap_ms = 60_000u64;
    let exp = base_ms.saturating_mul(1u64 << attempt.min(6));
    let capped = exp.min(cap_ms);
    let jitter = capped / 4;
    Duration::from_millis(capped - jitter + (rand_jitter() % (jitter.max(1))))
}

/// Cheap jitter source; a full `rand` dependency isn't justified for one call site.
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl BrokerClient for LapinBroker {
    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        max_priority: u8,
    ) -> Result<(), BrokerError> {
        let channel = self.ensure_channel().await?;
        let mut args = FieldTable::default();
        args.insert(
            ShortString::from("x-max-priority"),
            AMQPValue::ShortShortUInt(max_priority as i8 as u8),
        );
        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(BrokerError::from)?;
        Ok(())
    }

    async fn declare_exchange(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        if name.is_empty() {
            return Ok(());
        }
        let channel = self.ensure_channel().await?;
        channel
            .exchange_declare(
                name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::from)?;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        if exchange.is_empty() {
            return Ok(());
        }
        let channel = self.ensure_channel().await?;
        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::from)?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        persistent: bool,
        priority: u8,
    ) -> Result<(), BrokerError> {
        let channel = self.ensure_channel().await?;
        let mut props = BasicProperties::default().with_priority(priority);
        if persistent {
            props = props.with_delivery_mode(2);
        }
        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                props,
            )
            .await
            .map_err(BrokerError::from)?
            .await
            .map_err(BrokerError::from)?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        prefetch: u16,
        handler: DeliveryHandler,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<(), BrokerError> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let channel = match self.ensure_channel().await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, attempt, "broker connect failed, backing off");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
            };

            if let Err(e) = channel
                .basic_qos(prefetch, lapin::options::BasicQosOptions::default())
                .await
            {
                warn!(error = %e, "failed to set prefetch, retrying");
                tokio::time::sleep(backoff_delay(attempt)).await;
                attempt += 1;
                continue;
            }

            let consumer = match channel
                .basic_consume(
                    queue,
                    "dspider",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "failed to start consuming, backing off");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
            };
            attempt = 0;
            info!(queue, prefetch, "consuming");

            let mut consumer = consumer;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Ok(());
                    }
                    next = consumer.next() => {
                        let Some(delivery) = next else {
                            warn!("consumer stream ended, reconnecting");
                            break;
                        };
                        let delivery = match delivery {
                            Ok(d) => d,
                            Err(e) => {
                                error!(error = %e, "delivery error, reconnecting");
                                break;
                            }
                        };

                        let meta = DeliveryMetadata {
                            exchange: delivery.exchange.to_string(),
                            routing_key: delivery.routing_key.to_string(),
                            priority: *delivery.properties.priority(),
                            redelivered: delivery.redelivered,
                        };
                        let body = delivery.data.clone();
                        let action = handler(body, meta).await;

                        let ack_result = match action {
                            AckAction::Ack => {
                                delivery.ack(BasicAckOptions::default()).await
                            }
                            AckAction::NackRequeue => {
                                delivery
                                    .nack(BasicNackOptions { requeue: true, ..Default::default() })
                                    .await
                            }
                            AckAction::NackDrop => {
                                delivery
                                    .nack(BasicNackOptions { requeue: false, ..Default::default() })
                                    .await
                            }
                        };
                        if let Err(e) = ack_result {
                            warn!(error = %e, "failed to ack/nack delivery");
                        }
                    }
                }
            }
        }
    }

    async fn queue_depth(&self, queue: &str) -> Result<u32, BrokerError> {
        let channel = self.ensure_channel().await?;
        let info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::from)?;
        Ok(info.message_count())
    }
}
