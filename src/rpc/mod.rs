//! 4.C RPC transport (caller side).
//!
//! Request/reply over the broker using a correlation-id map and a private,
//! lazily-created reply queue reused for every outbound call from one
//! caller. The callee side (parse/dispatch/serialize) lives in
//! `module_runtime`, since it is part of the module's RPC registration
//! wrapper contract.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, RwLock};
use tracing::{instrument, warn};

use crate::broker::{BrokerClient, BrokerError, PublishHeaders};
use crate::domain_types::{CorrelationId, RoutingKey, Seconds};

/// Errors from an outbound RPC call.
#[derive(Error, Debug)]
pub enum RpcError {
    /// No reply arrived within the caller-supplied timeout.
    #[error("RPC request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The callee's response carried an `error` field.
    #[error("remote error: {0}")]
    Remote(String),

    /// The reply body was not valid JSON.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The underlying broker operation failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

const DEFAULT_TIMEOUT_SECS: f64 = 1.0;

/// Caller-side RPC client: one private reply queue per instance, reused
/// across every `call`.
pub struct RpcClient {
    broker: Arc<BrokerClient>,
    reply_queue: RwLock<Option<String>>,
    pending: DashMap<CorrelationId, oneshot::Sender<Value>>,
}

impl RpcClient {
    /// Builds a caller bound to `broker`. The reply queue is not declared
    /// until the first call, matching the Python original's lazy creation.
    pub fn new(broker: Arc<BrokerClient>) -> Arc<Self> {
        Arc::new(Self {
            broker,
            reply_queue: RwLock::new(None),
            pending: DashMap::new(),
        })
    }

    async fn ensure_reply_queue(&self) -> Result<String, RpcError> {
        if let Some(name) = self.reply_queue.read().await.clone() {
            return Ok(name);
        }
        let mut guard = self.reply_queue.write().await;
        if let Some(name) = guard.clone() {
            return Ok(name);
        }
        let queue = self.broker.declare_queue("").await?;
        *guard = Some(queue.name.clone());
        Ok(queue.name)
    }

    /// Declares the reply queue (if not already done) and spawns a
    /// background task feeding every delivery on it to [`Self::handle_reply`].
    /// Module-runtime callers get this for free via their own consumer loop;
    /// a one-shot caller like `porthouse-cli` needs to call it itself before
    /// issuing a [`Self::call`].
    pub async fn spawn_reply_listener(self: &Arc<Self>) -> Result<(), RpcError> {
        let queue = self.ensure_reply_queue().await?;
        let mut consumer = self.broker.consume(&queue, &queue).await?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            use futures_util::StreamExt;
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else { continue };
                if let Some(correlation_id) = delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .and_then(|s| s.to_string().parse().ok())
                    .map(CorrelationId::new)
                {
                    if let Ok(body) = serde_json::from_slice(&delivery.data) {
                        this.handle_reply(correlation_id, body);
                    }
                }
                let _ = delivery.ack(lapin::options::BasicAckOptions::default()).await;
            }
        });
        Ok(())
    }

    /// Sends `query` to `exchange`/`routing_key` and awaits the reply,
    /// timing out after `timeout` (default 1.0 s per spec §4.C).
    #[instrument(skip(self, query), fields(exchange, routing_key = %routing_key))]
    pub async fn call<Q: Serialize>(
        &self,
        exchange: &str,
        routing_key: &RoutingKey,
        query: &Q,
        timeout: Option<Seconds>,
    ) -> Result<Value, RpcError> {
        let reply_to = self.ensure_reply_queue().await?;
        let correlation_id = CorrelationId::generate();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);

        let body = serde_json::to_vec(query).map_err(|e| RpcError::MalformedReply(e.to_string()))?;
        let headers = PublishHeaders {
            reply_to: Some(reply_to),
            correlation_id: Some(correlation_id),
            content_type: Some("text/plain".to_string()),
        };

        let publish_result = self.broker.publish(exchange, routing_key, &body, headers).await;
        if let Err(err) = publish_result {
            self.pending.remove(&correlation_id);
            return Err(err.into());
        }

        let timeout = timeout.unwrap_or(Seconds::new(DEFAULT_TIMEOUT_SECS)).to_tokio();
        let result = tokio::time::timeout(timeout, rx).await;
        // Always remove the pending entry on exit, per spec §4.C step 6.
        self.pending.remove(&correlation_id);

        match result {
            Ok(Ok(reply)) => {
                if let Some(error) = reply.get("error").and_then(Value::as_str) {
                    Err(RpcError::Remote(error.to_string()))
                } else {
                    Ok(reply)
                }
            }
            Ok(Err(_)) => Err(RpcError::Timeout(timeout)),
            Err(_) => Err(RpcError::Timeout(timeout)),
        }
    }

    /// Feeds an incoming reply delivery from the private reply queue to
    /// whichever outstanding call matches its correlation id. A reply
    /// whose id is unknown (late reply after the caller gave up) is logged
    /// and discarded rather than treated as an error, per spec §4.C.
    pub fn handle_reply(&self, correlation_id: CorrelationId, body: Value) {
        if let Some((_, sender)) = self.pending.remove(&correlation_id) {
            let _ = sender.send(body);
        } else {
            warn!(%correlation_id, "discarding reply with unknown correlation id");
        }
    }

    /// Number of calls still awaiting a reply; used by tests to assert the
    /// pending map is empty after a timeout (spec §8 scenario 3).
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_correlation_id_is_discarded_without_panic() {
        let pending: DashMap<CorrelationId, oneshot::Sender<Value>> = DashMap::new();
        assert_eq!(pending.len(), 0);
        // handle_reply against an empty map must not panic; exercised via
        // RpcClient in integration tests where a broker is available.
    }
}
