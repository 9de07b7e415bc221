//! 4.J Packet router: a typed endpoint graph with per-route formatters,
//! bridging broker topics and external sockets (spec §4.J).
//!
//! Grounded on `mcs/packets/packet_router.py`'s `PacketRouter`: an
//! `endpoints` map, `create_route`/`route_frame`, and the
//! `router.rpc.{list,connect,disconnect,disconnect_all}` control surface.

pub mod endpoint;
pub mod formatter;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, instrument, warn};

pub use endpoint::{EndpointError, RouterEndpoint};
pub use formatter::{Formatter, JsonFormatter, RawHexFormatter};

/// Errors from the router's endpoint graph.
#[derive(Error, Debug)]
pub enum RouterError {
    /// `connect(a, a)` was rejected (spec §4.J "loop detection").
    #[error("cannot route an endpoint to itself: '{0}'")]
    Loop(String),

    /// Either side of a `connect`/`disconnect` named an unknown endpoint.
    #[error("endpoint '{0}' not found")]
    UnknownEndpoint(String),

    /// An endpoint operation (connect/disconnect/send) failed.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// One endpoint's static configuration: source/satellite tags, metadata,
/// and whether it persists (auto-connects at load time), mirroring the
/// Python `Endpoint` dataclass's fields besides `link`.
#[derive(Debug, Clone, Default)]
pub struct EndpointMeta {
    /// Free-form source tag merged into every frame this endpoint emits.
    pub source: Option<String>,
    /// Free-form satellite tag merged into every frame this endpoint emits.
    pub satellite: Option<String>,
    /// Key/value pairs merged into every routed frame's `metadata`.
    pub metadata: Map<String, Value>,
    /// Whether this endpoint auto-connects when the router starts.
    pub persistent: bool,
}

struct EndpointEntry {
    driver: Arc<dyn RouterEndpoint>,
    formatter: Option<Arc<dyn Formatter>>,
    meta: EndpointMeta,
    link: Option<String>,
}

/// Endpoint summary reported by `router.rpc.list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSummary {
    /// Endpoint name.
    pub name: String,
    /// Stable type tag (`broker-in`, `tcp`, ...).
    #[serde(rename = "type")]
    pub kind: String,
}

/// Route summary reported by `router.rpc.list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSummary {
    /// Source endpoint name.
    pub source: String,
    /// Destination endpoint name.
    pub destination: String,
}

/// The endpoint graph and route table (spec §4.J).
pub struct PacketRouter {
    endpoints: RwLock<HashMap<String, EndpointEntry>>,
}

impl Default for PacketRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRouter {
    /// Builds an empty router.
    pub fn new() -> Self {
        Self { endpoints: RwLock::new(HashMap::new()) }
    }

    /// Registers `driver` under `name` and, if `meta.persistent`, connects
    /// it immediately, wiring its inbound frames to `route_frame`.
    #[instrument(skip(self, driver, formatter, router), fields(name))]
    pub async fn add_endpoint(
        router: &Arc<Self>,
        name: impl Into<String>,
        driver: Arc<dyn RouterEndpoint>,
        formatter: Option<Arc<dyn Formatter>>,
        meta: EndpointMeta,
    ) -> Result<(), RouterError> {
        let name = name.into();
        let persistent = meta.persistent;
        {
            let mut guard = router.endpoints.write().await;
            guard.insert(name.clone(), EndpointEntry { driver: Arc::clone(&driver), formatter, meta, link: None });
        }

        if persistent {
            let (tx, mut rx) = mpsc::unbounded_channel();
            driver.connect(tx).await?;
            let router = Arc::clone(router);
            let source_name = name.clone();
            tokio::spawn(async move {
                while let Some(raw) = rx.recv().await {
                    router.route_frame(&source_name, raw).await;
                }
            });
        }

        Ok(())
    }

    /// `router.rpc.connect {a, b}` / `router.rpc.disconnect {a}` (`b =
    /// None`): replaces endpoint `a`'s outbound route, rejecting self-loops
    /// (spec §4.J "Loop detection").
    pub async fn create_route(&self, a: &str, b: Option<&str>) -> Result<(), RouterError> {
        if Some(a) == b {
            return Err(RouterError::Loop(a.to_string()));
        }

        let mut guard = self.endpoints.write().await;
        if !guard.contains_key(a) {
            return Err(RouterError::UnknownEndpoint(a.to_string()));
        }
        if let Some(b) = b {
            if !guard.contains_key(b) {
                return Err(RouterError::UnknownEndpoint(b.to_string()));
            }
        }

        let entry = guard.get_mut(a).expect("checked above");
        if let Some(old) = entry.link.take() {
            info!(source = a, destination = %old, "removed existing route");
        }
        entry.link = b.map(str::to_string);
        if let Some(b) = b {
            info!(source = a, destination = b, "created new route");
        }
        Ok(())
    }

    /// `router.rpc.disconnect_all`: clears every endpoint's outbound route.
    pub async fn disconnect_all(&self) {
        let mut guard = self.endpoints.write().await;
        for entry in guard.values_mut() {
            entry.link = None;
        }
    }

    /// `router.rpc.list`: the endpoint catalog and current route table.
    pub async fn list(&self) -> (Vec<EndpointSummary>, Vec<RouteSummary>) {
        let guard = self.endpoints.read().await;
        let endpoints = guard
            .iter()
            .map(|(name, entry)| EndpointSummary { name: name.clone(), kind: entry.driver.type_identifier().to_string() })
            .collect();
        let routes = guard
            .iter()
            .filter_map(|(name, entry)| entry.link.as_ref().map(|link| RouteSummary { source: name.clone(), destination: link.clone() }))
            .collect();
        (endpoints, routes)
    }

    /// Routes one frame received from endpoint `source_name` to its linked
    /// destination, applying the formatter/metadata-merge/formatter
    /// pipeline (spec §4.J, §8 property 7). Failures are logged, never
    /// propagated, matching the Python original's blanket `except`.
    #[instrument(skip(self, raw_frame), fields(source = source_name))]
    pub async fn route_frame(&self, source_name: &str, raw_frame: Vec<u8>) {
        if let Err(err) = self.try_route_frame(source_name, &raw_frame).await {
            error!(source = source_name, error = %err, "failed to route packet");
        }
    }

    async fn try_route_frame(&self, source_name: &str, raw_frame: &[u8]) -> Result<(), RouterError> {
        let guard = self.endpoints.read().await;
        let source = guard.get(source_name).ok_or_else(|| RouterError::UnknownEndpoint(source_name.to_string()))?;

        let Some(dest_name) = source.link.clone() else {
            warn!(source = source_name, "frame received but there is no connection forward");
            return Ok(());
        };

        let decoded = match &source.formatter {
            Some(formatter) => formatter.decode(raw_frame),
            None => JsonFormatter.decode(raw_frame),
        };
        let Some(mut frame) = decoded else {
            return Ok(());
        };
        if !frame.contains_key("data") {
            return Ok(());
        }

        let destination = guard.get(&dest_name).ok_or_else(|| RouterError::UnknownEndpoint(dest_name.clone()))?;

        merge_metadata(&mut frame, source, destination);
        merge_tag(&mut frame, "source", source.meta.source.as_deref());
        merge_tag(&mut frame, "satellite", source.meta.satellite.as_deref());

        let encoded = match &destination.formatter {
            Some(formatter) => formatter.encode(&frame),
            None => JsonFormatter.encode(&frame),
        };

        destination.driver.send(&encoded).await?;
        Ok(())
    }
}

/// Merges metadata with the precedence frame > destination defaults >
/// source defaults (spec §4.J: "route-supplied winning over source-supplied
/// ... is disallowed; frame wins over endpoint defaults; endpoint defaults
/// win over nothing" — endpoint defaults here means the destination's own
/// configured metadata, applied after the source's so it can override it).
fn merge_metadata(frame: &mut Map<String, Value>, source: &EndpointEntry, destination: &EndpointEntry) {
    let mut metadata = source.meta.metadata.clone();
    for (k, v) in &destination.meta.metadata {
        metadata.insert(k.clone(), v.clone());
    }
    if let Some(Value::Object(frame_metadata)) = frame.get("metadata") {
        for (k, v) in frame_metadata.clone() {
            metadata.insert(k, v);
        }
    }
    frame.insert("metadata".to_string(), Value::Object(metadata));
}

fn merge_tag(frame: &mut Map<String, Value>, key: &str, default: Option<&str>) {
    let already_set = frame.get(key).map(|v| !v.is_null()).unwrap_or(false);
    if !already_set {
        if let Some(default) = default {
            frame.insert(key.to_string(), Value::String(default.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RecordingEndpoint {
        sent: Arc<StdMutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl RouterEndpoint for RecordingEndpoint {
        async fn connect(&self, _inbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), EndpointError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), EndpointError> {
            Ok(())
        }
        async fn send(&self, data: &[u8]) -> Result<(), EndpointError> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }
        fn type_identifier(&self) -> &'static str {
            "test"
        }
    }

    async fn router_with_two_endpoints() -> (Arc<PacketRouter>, Arc<StdMutex<Vec<Vec<u8>>>>) {
        let router = Arc::new(PacketRouter::new());
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let a = Arc::new(RecordingEndpoint { sent: Arc::new(StdMutex::new(Vec::new())) });
        let b = Arc::new(RecordingEndpoint { sent: Arc::clone(&sent) });
        PacketRouter::add_endpoint(&router, "a", a, None, EndpointMeta::default()).await.unwrap();
        PacketRouter::add_endpoint(&router, "b", b, None, EndpointMeta::default()).await.unwrap();
        (router, sent)
    }

    #[tokio::test]
    async fn self_loop_is_rejected() {
        let (router, _) = router_with_two_endpoints().await;
        let err = router.create_route("a", Some("a")).await.unwrap_err();
        assert!(matches!(err, RouterError::Loop(_)));
    }

    #[tokio::test]
    async fn connect_then_disconnect_restores_prior_state() {
        let (router, _) = router_with_two_endpoints().await;
        router.create_route("a", Some("b")).await.unwrap();
        let (_, routes) = router.list().await;
        assert_eq!(routes.len(), 1);

        router.create_route("a", None).await.unwrap();
        let (_, routes) = router.list().await;
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn routed_frame_reaches_destination_with_merged_metadata() {
        let (router, sent) = router_with_two_endpoints().await;
        router.create_route("a", Some("b")).await.unwrap();

        let frame = serde_json::json!({"data": "ab"});
        router.route_frame("a", serde_json::to_vec(&frame).unwrap()).await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let decoded: Value = serde_json::from_slice(&sent[0]).unwrap();
        assert_eq!(decoded["data"], "ab");
        assert!(decoded["metadata"].is_object());
    }

    #[tokio::test]
    async fn frame_with_no_destination_is_dropped_without_error() {
        let (router, sent) = router_with_two_endpoints().await;
        let frame = serde_json::json!({"data": "ab"});
        router.route_frame("a", serde_json::to_vec(&frame).unwrap()).await;
        assert!(sent.lock().unwrap().is_empty());
    }
}
