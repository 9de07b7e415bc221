//! 4.B Module runtime.
//!
//! The base abstraction every long-running Porthouse module builds on:
//! broker connection, declarative queue/binding/RPC registration, a
//! periodic heartbeat, and a supervising dispatch loop.
//!
//! The Python original collects `queue()`/`bind()`/`rpc()` registrations as
//! class-definition-time side effects. Per spec §9 ("Decorator-collected
//! registrations") the replacement here is a `describe()` operation: each
//! module type returns its registrations as data, and the runtime consumes
//! that description at start. No decorator vocabulary is required.

pub mod registry;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::{error, instrument, warn};

use crate::broker::{BrokerClient, BrokerError, PublishHeaders};
use crate::domain_types::{Prefix, RoutingKey, Seconds};

/// One `queue()` registration: an exclusive, auto-delete queue (anonymous
/// if `name` is empty) bound by zero or more patterns, dispatching to
/// `handler` on every delivery.
pub struct QueueRegistration {
    /// Queue name, or empty for a server-generated anonymous queue.
    pub name: String,
    /// `(exchange, routing_pattern, prefixed)` bindings stacked on this queue.
    pub bindings: Vec<(String, String, bool)>,
    /// Consumer callback, invoked with the raw message body.
    pub handler: Arc<dyn Fn(Vec<u8>) + Send + Sync>,
}

/// An RPC handler body: takes the parsed JSON request and returns a
/// boxed future, since real module methods (rotator, tracker, ...) need
/// `&mut self` access behind an async lock rather than a plain sync `Fn`.
pub type AsyncRpcHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, RpcHandlerError>> + Send + Sync>;

/// One `rpc()` registration: `request_name` is the routing key with the
/// module's prefix already stripped, matching the Python wrapper contract.
pub struct RpcRegistration {
    /// Exchange the RPC verb is bound on, e.g. `rotator` or `scheduler`.
    pub exchange: String,
    /// Verb dispatched on, e.g. `status` for `<prefix>.rpc.status`.
    pub verb: String,
    /// Handler invoked with the parsed JSON request body.
    pub handler: AsyncRpcHandler,
}

/// Error raised by an RPC handler body. `Unhandled` corresponds to "any
/// other exception" in spec §4.B and is still reported to the caller.
#[derive(Debug, Clone)]
pub enum RpcHandlerError {
    /// A semantic RPC-level error (`RPCError` in the original).
    RpcError(String),
    /// Any other failure, reported as `Unhandled exception <message>`.
    Unhandled(String),
}

impl RpcHandlerError {
    fn into_response(self) -> Value {
        match self {
            RpcHandlerError::RpcError(message) => {
                serde_json::json!({ "error": format!("RPC Error: {message}") })
            }
            RpcHandlerError::Unhandled(message) => {
                serde_json::json!({ "error": format!("Unhandled exception {message}") })
            }
        }
    }
}

/// The full set of declarative registrations for one module instance.
#[derive(Default)]
pub struct Description {
    /// Queue + binding registrations.
    pub queues: Vec<QueueRegistration>,
    /// RPC verb registrations, each implicitly bound to `<prefix>.rpc.<verb>`.
    pub rpcs: Vec<RpcRegistration>,
}

/// Implemented by every module type. Replaces the decorator-collected
/// registration maps of the original with an explicit description the
/// runtime consumes at start (spec §9).
pub trait Describable {
    /// Returns this module instance's queue and RPC registrations.
    fn describe(&self) -> Description;

    /// Module prefix used to namespace "prefixed" bindings and the
    /// heartbeat/RPC routing keys.
    fn prefix(&self) -> Prefix;
}

/// Drives one module instance's broker lifecycle: registration, heartbeat,
/// and the RPC handler wrapper contract (spec §4.B, §4.C callee side).
pub struct ModuleRuntime {
    broker: Arc<BrokerClient>,
    prefix: Prefix,
    heartbeat_interval: Seconds,
}

const HEARTBEAT_INTERVAL_SECS: f64 = 10.0;

impl ModuleRuntime {
    /// Builds a runtime bound to an already-connected broker client.
    pub fn new(broker: Arc<BrokerClient>, prefix: Prefix) -> Self {
        Self {
            broker,
            prefix,
            heartbeat_interval: Seconds::new(HEARTBEAT_INTERVAL_SECS),
        }
    }

    /// Starts the module: binds every queue registration, wraps every RPC
    /// registration in the parse/dispatch/serialize contract, and spawns
    /// the heartbeat task. Returns join handles for the caller to await or
    /// attach a "task died" callback to (spec §5).
    #[instrument(skip(self, module), fields(prefix = %self.prefix))]
    pub async fn start(&self, module: Arc<dyn Describable + Send + Sync>) -> Result<(), BrokerError> {
        let description = module.describe();

        for queue in description.queues {
            self.bind_queue(queue).await?;
        }

        for rpc in description.rpcs {
            self.bind_rpc(rpc).await?;
        }

        self.spawn_heartbeat();
        Ok(())
    }

    async fn bind_queue(&self, registration: QueueRegistration) -> Result<(), BrokerError> {
        let queue = self.broker.declare_queue(&registration.name).await?;
        for (exchange, pattern, prefixed) in &registration.bindings {
            let effective = self.prefix.apply(pattern, *prefixed);
            self.broker
                .bind_queue(&queue.name, exchange, &effective)
                .await?;
        }

        let mut consumer = self.broker.consume(&queue.name, &queue.name).await?;
        let handler = registration.handler;
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        handler(delivery.data.clone());
                        if let Err(err) = delivery
                            .ack(lapin::options::BasicAckOptions::default())
                            .await
                        {
                            warn!(error = %err, "failed to ack delivery");
                        }
                    }
                    Err(err) => error!(error = %err, "consumer error"),
                }
            }
        });
        Ok(())
    }

    async fn bind_rpc(&self, registration: RpcRegistration) -> Result<(), BrokerError> {
        let verb_key = format!("rpc.{}", registration.verb);
        let routing_key = self.prefix.apply(&verb_key, true);
        let queue = self.broker.declare_queue("").await?;
        self.broker
            .bind_queue(&queue.name, &registration.exchange, &routing_key)
            .await?;

        let mut consumer = self.broker.consume(&queue.name, &queue.name).await?;
        let handler = registration.handler;
        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else { continue };
                let response = dispatch_rpc(&handler, &delivery.data).await;
                if let Some(reply_to) = reply_to_of(&delivery) {
                    let body = serde_json::to_vec(&response).unwrap_or_default();
                    let headers = PublishHeaders {
                        reply_to: None,
                        correlation_id: correlation_id_of(&delivery),
                        content_type: Some("text/plain".to_string()),
                    };
                    if let Ok(key) = RoutingKey::try_new(reply_to.clone()) {
                        let _ = broker.publish("", &key, &body, headers).await;
                    }
                }
                let _ = delivery
                    .ack(lapin::options::BasicAckOptions::default())
                    .await;
            }
        });
        Ok(())
    }

    fn spawn_heartbeat(&self) {
        let broker = Arc::clone(&self.broker);
        let prefix = self.prefix.clone();
        let interval = self.heartbeat_interval.to_tokio();
        tokio::spawn(async move {
            let routing_key = match RoutingKey::try_new(prefix.apply("heartbeat", true)) {
                Ok(key) => key,
                Err(_) => return,
            };
            loop {
                let body = serde_json::json!({ "alive": true });
                let bytes = serde_json::to_vec(&body).unwrap_or_default();
                if let Err(err) = broker
                    .publish("log", &routing_key, &bytes, PublishHeaders::default())
                    .await
                {
                    warn!(error = %err, "heartbeat publish failed");
                }
                tokio::time::sleep(interval).await;
            }
        });
    }
}

/// Parses the request body as JSON, dispatches, and serializes the
/// response, honoring the exact error-shape contract of spec §4.B.
async fn dispatch_rpc(handler: &AsyncRpcHandler, body: &[u8]) -> Value {
    let request = match serde_json::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(err) => {
            return serde_json::json!({ "error": format!("Unhandled exception {err}") });
        }
    };
    match handler(request).await {
        Ok(value) => value,
        Err(err) => err.into_response(),
    }
}

fn reply_to_of(delivery: &lapin::message::Delivery) -> Option<String> {
    delivery
        .properties
        .reply_to()
        .as_ref()
        .map(|s| s.to_string())
}

fn correlation_id_of(delivery: &lapin::message::Delivery) -> Option<crate::domain_types::CorrelationId> {
    delivery
        .properties
        .correlation_id()
        .as_ref()
        .and_then(|s| s.to_string().parse().ok())
        .map(crate::domain_types::CorrelationId::new)
}

/// Bindings helper used by `describe()` implementations to express
/// `{queue-name, bindings, handler}` and `{rpc-verb, handler}` pairs
/// without repeating boilerplate at every call site.
pub struct DescriptionBuilder {
    description: Description,
}

impl DescriptionBuilder {
    /// Starts an empty description.
    pub fn new() -> Self {
        Self {
            description: Description::default(),
        }
    }

    /// Adds a queue registration.
    pub fn queue(mut self, registration: QueueRegistration) -> Self {
        self.description.queues.push(registration);
        self
    }

    /// Adds an RPC registration.
    pub fn rpc(mut self, registration: RpcRegistration) -> Self {
        self.description.rpcs.push(registration);
        self
    }

    /// Finishes the description.
    pub fn build(self) -> Description {
        self.description
    }
}

impl Default for DescriptionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Window within which a live module must publish at least one heartbeat
/// (spec §8 property 8).
pub const HEARTBEAT_LIVENESS_WINDOW_SECS: f64 = 15.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_renders_prefixed_message() {
        let response = RpcHandlerError::RpcError("bad target".to_string()).into_response();
        assert_eq!(response["error"], "RPC Error: bad target");
    }

    #[test]
    fn unhandled_error_renders_generic_message() {
        let response = RpcHandlerError::Unhandled("boom".to_string()).into_response();
        assert_eq!(response["error"], "Unhandled exception boom");
    }

    #[tokio::test]
    async fn dispatch_rpc_reports_parse_failures_as_unhandled() {
        let handler: AsyncRpcHandler = Arc::new(|_| Box::pin(async { Ok(serde_json::json!({})) }));
        let response = dispatch_rpc(&handler, b"not json").await;
        assert!(response["error"].as_str().unwrap().starts_with("Unhandled exception"));
    }
}
