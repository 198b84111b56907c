//! Message dispatch gateway: the seam to the pub/sub messaging fabric.
//!
//! The transport itself is an external collaborator consumed through the
//! [`Transport`] capability trait — an at-least-once publish/subscribe
//! primitive. Everything this module adds sits on top of that weak
//! guarantee:
//!
//! - outbound: [`DispatchGateway::publish_command`] retries with exponential
//!   backoff and a capped attempt count; exhaustion surfaces as a
//!   [`GatewayError::Delivery`] the coordinator treats as a node failure
//! - inbound: a background pump decodes completion events, discards
//!   duplicates through a bounded [`DedupCache`] window, and fans accepted
//!   events into a `flume` channel for the coordinator
//!
//! The dedup cache is an injected, bounded capability (oldest keys evicted
//! first), not process-wide ambient state.

pub mod dedup;
pub mod memory;
pub mod retry;
pub mod transport;
pub mod wire;

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task;

use crate::message::{CompletionEvent, DispatchCommand};

pub use dedup::DedupCache;
pub use memory::InMemoryTransport;
pub use retry::RetryPolicy;
pub use transport::{Transport, TransportError};

/// Errors surfaced by the gateway.
#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    /// Publishing kept failing past the attempt cap. The coordinator maps
    /// this onto the node's failure policy with cause `DELIVERY_EXHAUSTED`.
    #[error("delivery to {channel} exhausted after {attempts} attempts: {message}")]
    #[diagnostic(
        code(warploom::gateway::delivery),
        help("Check transport connectivity; the node fails per its failure policy.")
    )]
    Delivery {
        channel: String,
        attempts: u32,
        message: String,
    },

    /// Wire encode/decode failure.
    #[error("wire codec error: {source}")]
    #[diagnostic(code(warploom::gateway::codec))]
    Codec {
        #[source]
        source: serde_json::Error,
    },

    /// The completion channel was closed (gateway stopped).
    #[error("completion channel closed")]
    #[diagnostic(code(warploom::gateway::channel_closed))]
    ChannelClosed,
}

struct PumpState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

/// Wraps the external transport with retrying publish and deduplicated
/// completion intake for one workflow type.
pub struct DispatchGateway {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    dedup: Arc<DedupCache>,
    dispatch_channel: String,
    completion_channel: String,
    completions: (flume::Sender<CompletionEvent>, flume::Receiver<CompletionEvent>),
    pump: Mutex<Option<PumpState>>,
}

impl DispatchGateway {
    /// Build a gateway for the named workflow type.
    ///
    /// Channels are derived from the prefix:
    /// `<prefix>.dispatch.<workflow>` outbound and
    /// `<prefix>.completion.<workflow>` inbound.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        workflow: &str,
        channel_prefix: &str,
        retry: RetryPolicy,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            transport,
            retry,
            dedup: Arc::new(DedupCache::new(dedup_capacity)),
            dispatch_channel: format!("{channel_prefix}.dispatch.{workflow}"),
            completion_channel: format!("{channel_prefix}.completion.{workflow}"),
            completions: flume::unbounded(),
            pump: Mutex::new(None),
        }
    }

    /// Outbound channel name (visible for workers and tests).
    #[must_use]
    pub fn dispatch_channel(&self) -> &str {
        &self.dispatch_channel
    }

    /// Inbound channel name workers publish completions on.
    #[must_use]
    pub fn completion_channel(&self) -> &str {
        &self.completion_channel
    }

    /// Publish a dispatch command, retrying with exponential backoff.
    ///
    /// Returns `Ok` as soon as one publish is acknowledged (at-least-once:
    /// the fabric may still deliver it more than once — acceptance is
    /// guarded by the idempotency key, not by delivery count). Exhausting
    /// the attempt cap returns [`GatewayError::Delivery`].
    pub async fn publish_command(&self, command: &DispatchCommand) -> Result<(), GatewayError> {
        let payload = wire::encode_command(command)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .transport
                .publish(&self.dispatch_channel, payload.clone())
                .await
            {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!(
                            channel = %self.dispatch_channel,
                            node = %command.node_id,
                            attempt,
                            "publish succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        channel = %self.dispatch_channel,
                        node = %command.node_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "publish failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(GatewayError::Delivery {
                        channel: self.dispatch_channel.clone(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Receiver of accepted (decoded, deduplicated) completion events.
    #[must_use]
    pub fn completions(&self) -> flume::Receiver<CompletionEvent> {
        self.completions.1.clone()
    }

    /// Spawn the background pump that drains the completion channel.
    /// Idempotent: calling multiple times has no effect.
    pub fn start(&self) {
        let mut guard = self.pump.lock();
        if guard.is_some() {
            return;
        }

        let inbound = self.transport.subscribe(&self.completion_channel);
        let dedup = Arc::clone(&self.dedup);
        let accepted_tx = self.completions.0.clone();
        let channel = self.completion_channel.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = inbound.recv_async() => match recv {
                        Err(_) => break,
                        Ok(payload) => {
                            let event = match wire::decode_completion(&payload) {
                                Ok(event) => event,
                                Err(e) => {
                                    tracing::warn!(channel = %channel, error = %e, "undecodable completion dropped");
                                    continue;
                                }
                            };
                            if !dedup.observe(event.idempotency_key.clone()) {
                                tracing::debug!(
                                    instance = %event.instance_id,
                                    node = %event.node_id,
                                    key = %event.idempotency_key,
                                    "duplicate completion discarded"
                                );
                                continue;
                            }
                            if accepted_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        *guard = Some(PumpState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background pump.
    pub async fn stop(&self) {
        let state = self.pump.lock().take();
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for DispatchGateway {
    fn drop(&mut self) {
        if let Some(state) = self.pump.lock().take() {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }
    }
}
