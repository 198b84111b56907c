//! The external messaging capability.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Failure reported by the underlying messaging fabric.
///
/// Deliberately opaque: the gateway only needs to know *that* a publish
/// failed to drive its retry/backoff loop; the fabric's own error taxonomy
/// stays on the other side of the seam.
#[derive(Debug, Error, Diagnostic)]
#[error("transport error: {message}")]
#[diagnostic(code(warploom::gateway::transport))]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// At-least-once publish/subscribe primitive.
///
/// This is the seam to the real messaging fabric (NATS, AMQP, Kafka, ...);
/// the crate ships [`InMemoryTransport`](super::InMemoryTransport) for tests
/// and local development. Implementations guarantee at-least-once delivery
/// of acknowledged publishes; everything stronger (dedup, idempotent
/// acceptance, retry) is layered on top by the gateway and coordinator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `payload` on `channel`, resolving once the fabric
    /// acknowledges the message.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe to `channel`. Each returned receiver observes every
    /// subsequent delivery on that channel (fan-out, not work-sharing).
    fn subscribe(&self, channel: &str) -> flume::Receiver<Vec<u8>>;
}
