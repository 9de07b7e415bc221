//! Binds an [`OrbitTracker`] onto a [`ModuleRuntime`]: the 2 s tick loop
//! that drives its pass lifecycle and publishes events/pointings (spec
//! §4.H, §6).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::warn;

use crate::broker::{BrokerClient, PublishHeaders};
use crate::domain_types::{Prefix, RoutingKey};
use crate::module_runtime::{Describable, Description, DescriptionBuilder};

use super::{OrbitTracker, TrackerEvent, TICK_INTERVAL_SECS};

/// Runs one orbit tracker's tick loop. Exposes no RPC surface of its own
/// (targets are assigned out of band, per spec §4.H); its job is to tick
/// and publish.
pub struct TrackerWorker {
    tracker: Arc<RwLock<OrbitTracker>>,
    prefix: Prefix,
}

impl TrackerWorker {
    /// Wraps `tracker`, to be addressed under `prefix` (e.g. `tracker.helsinki`).
    pub fn new(tracker: Arc<RwLock<OrbitTracker>>, prefix: Prefix) -> Self {
        Self { tracker, prefix }
    }

    /// Shared handle, for wiring into the status API alongside the worker.
    pub fn tracker(&self) -> Arc<RwLock<OrbitTracker>> {
        Arc::clone(&self.tracker)
    }

    /// Spawns the tick loop: every `TICK_INTERVAL_SECS`, advance the state
    /// machine and publish any resulting events (exchange `event`) and
    /// pointing (exchange `tracking`, routing key `target.position`).
    pub fn spawn_tick_loop(&self, broker: Arc<BrokerClient>) {
        let tracker = Arc::clone(&self.tracker);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now();
                let result = { tracker.write().await.tick(now) };
                let (events, pointing) = match result {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(error = %err, "tracker tick failed");
                        continue;
                    }
                };

                for event in events {
                    let (key_suffix, body) = match &event {
                        TrackerEvent::Preaos(payload) => ("event.preaos", serde_json::to_vec(payload)),
                        TrackerEvent::Aos(payload) => ("event.aos", serde_json::to_vec(payload)),
                        TrackerEvent::Los(payload) => ("event.los", serde_json::to_vec(payload)),
                    };
                    let Ok(key) = RoutingKey::try_new(key_suffix.to_string()) else { continue };
                    if let Ok(body) = body {
                        if let Err(err) = broker.publish("event", &key, &body, PublishHeaders::default()).await {
                            warn!(error = %err, "tracker event publish failed");
                        }
                    }
                }

                if let Some(pointing) = pointing {
                    if let Ok(key) = RoutingKey::try_new("target.position".to_string()) {
                        if let Ok(body) = serde_json::to_vec(&pointing) {
                            if let Err(err) = broker.publish("tracking", &key, &body, PublishHeaders::default()).await {
                                warn!(error = %err, "tracker pointing publish failed");
                            }
                        }
                    }
                }
            }
        });
    }
}

impl Describable for TrackerWorker {
    fn prefix(&self) -> Prefix {
        self.prefix.clone()
    }

    fn describe(&self) -> Description {
        DescriptionBuilder::new().build()
    }
}

/// Registers `TrackerWorker` as `porthouse.gs.tracking.orbit.OrbitTracker`
/// (spec §9 "Dynamic class loading by string").
pub mod factory {
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::sync::RwLock;

    use crate::broker::BrokerClient;
    use crate::domain_types::Prefix;
    use crate::module_runtime::registry::ModuleFactory;
    use crate::module_runtime::ModuleRuntime;
    use crate::pass_prediction::target::GroundStation;
    use crate::tracker::OrbitTracker;

    use super::TrackerWorker;

    /// Fully-qualified class name this factory answers to.
    pub const CLASS_NAME: &str = "porthouse.gs.tracking.orbit.OrbitTracker";

    struct TrackerFactory {
        broker: Arc<BrokerClient>,
    }

    impl ModuleFactory for TrackerFactory {
        fn required_params(&self) -> &'static [&'static str] {
            &["groundstation_name"]
        }

        fn construct(&self, params: HashMap<String, Value>) -> Result<(), String> {
            let groundstation_name = params
                .get("groundstation_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let latitude_deg = params.get("latitude").and_then(Value::as_f64).unwrap_or(0.0);
            let longitude_deg = params.get("longitude").and_then(Value::as_f64).unwrap_or(0.0);
            let elevation_m = params.get("elevation").and_then(Value::as_f64).unwrap_or(0.0);
            let prefix_str = params.get("prefix").and_then(Value::as_str).unwrap_or_default().to_string();

            let gs = GroundStation { latitude_deg, longitude_deg, elevation_m };
            let tracker = Arc::new(RwLock::new(OrbitTracker::new(groundstation_name, gs)));
            let prefix = Prefix::new(prefix_str);
            let worker = Arc::new(TrackerWorker::new(tracker, prefix.clone()));
            let broker = Arc::clone(&self.broker);

            tokio::spawn(async move {
                let runtime = ModuleRuntime::new(Arc::clone(&broker), prefix);
                if let Err(err) = runtime.start(worker.clone()).await {
                    tracing::error!(error = %err, "tracker module failed to bind to broker");
                    return;
                }
                worker.spawn_tick_loop(broker);
            });
            Ok(())
        }
    }

    /// Registers the factory for `CLASS_NAME` against `broker`.
    pub async fn register(broker: Arc<BrokerClient>) {
        crate::module_runtime::registry::register(CLASS_NAME, Box::new(TrackerFactory { broker })).await;
    }
}
