//! BrokerClient (spec §4.1): durable message transport with priorities and manual acks.

mod lapin_broker;

pub use lapin_broker::LapinBroker;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BrokerError;

/// What the caller's delivery handler decided to do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Terminal success or permanent failure — remove the message.
    Ack,
    /// Transport-class error only — redeliver.
    NackRequeue,
    /// Permanent per-message failure — drop without redelivery.
    NackDrop,
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryMetadata {
    pub exchange: String,
    pub routing_key: String,
    pub priority: Option<u8>,
    pub redelivered: bool,
}

pub type DeliveryHandler =
    Arc<dyn Fn(Vec<u8>, DeliveryMetadata) -> Pin<Box<dyn Future<Output = AckAction> + Send>> + Send + Sync>;

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Idempotent.
    async fn declare_queue(&self, name: &str, durable: bool, max_priority: u8)
        -> Result<(), BrokerError>;

    /// Idempotent.
    async fn declare_exchange(&self, name: &str, durable: bool) -> Result<(), BrokerError>;

    /// Idempotent.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        persistent: bool,
        priority: u8,
    ) -> Result<(), BrokerError>;

    /// Blocking consume loop; reconnects with exponential backoff (base 1s, cap 60s, jitter)
    /// on connection loss and resumes. Returns only when `handler` (or the supplied
    /// cancellation) ends the loop.
    async fn consume(
        &self,
        queue: &str,
        prefetch: u16,
        handler: DeliveryHandler,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<(), BrokerError>;

    async fn queue_depth(&self, queue: &str) -> Result<u32, BrokerError>;
}
