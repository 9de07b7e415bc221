//! Binds a [`RotatorModule`] onto a [`ModuleRuntime`]: its `rpc.*` surface
//! (spec §4.I) and the 1.5 s control-loop cadence that queries/commands
//! hardware and publishes status.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::broker::{BrokerClient, PublishHeaders};
use crate::domain_types::{Prefix, RoutingKey};
use crate::module_runtime::{
    AsyncRpcHandler, Describable, Description, DescriptionBuilder, RpcHandlerError, RpcRegistration,
};

use super::{RotatorError, RotatorModule, TrackingMode};

const CONTROL_LOOP_INTERVAL: Duration = Duration::from_millis(1500);

impl From<RotatorError> for RpcHandlerError {
    fn from(err: RotatorError) -> Self {
        RpcHandlerError::RpcError(err.to_string())
    }
}

/// Runs one rotator's control loop and exposes its `rpc.*` surface over
/// the broker (spec §4.I). Wraps [`RotatorModule`] in a lock so RPC
/// handlers and the control loop tick share one instance safely.
pub struct RotatorWorker {
    module: Arc<Mutex<RotatorModule>>,
    prefix: Prefix,
}

impl RotatorWorker {
    /// Wraps `module`, to be addressed under `prefix` (e.g. `rotator.uhf`).
    pub fn new(module: RotatorModule, prefix: Prefix) -> Self {
        Self { module: Arc::new(Mutex::new(module)), prefix }
    }

    /// Spawns the control loop: every tick, refresh/command the rotator and
    /// publish its status on `<prefix>.status` (spec §4.I, §6).
    pub fn spawn_control_loop(&self, broker: Arc<BrokerClient>) {
        let module = Arc::clone(&self.module);
        let prefix = self.prefix.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CONTROL_LOOP_INTERVAL);
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now();
                let status = {
                    let mut guard = module.lock().await;
                    guard.tick(now).await
                };
                let status = match status {
                    Ok(status) => status,
                    Err(err) => {
                        warn!(error = %err, "rotator control loop tick failed");
                        continue;
                    }
                };
                let Ok(key) = RoutingKey::try_new(prefix.apply("status", true)) else { continue };
                if let Ok(body) = serde_json::to_vec(&status) {
                    if let Err(err) = broker.publish("rotator", &key, &body, PublishHeaders::default()).await {
                        warn!(error = %err, "rotator status publish failed");
                    }
                }
            }
        });
    }
}

fn handler<F, Fut>(f: F) -> AsyncRpcHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, RpcHandlerError>> + Send + 'static,
{
    Arc::new(move |value| Box::pin(f(value)) as BoxFuture<'static, Result<Value, RpcHandlerError>>)
}

#[derive(Deserialize)]
struct RotateParams {
    az: f64,
    el: f64,
    #[serde(default)]
    shortest: bool,
}

#[derive(Deserialize)]
struct TrackingParams {
    mode: String,
}

#[derive(Deserialize)]
struct ResetPositionParams {
    az: f64,
    el: f64,
}

#[derive(Deserialize, Default)]
struct SetPositionRangeParams {
    az_min: Option<f64>,
    az_max: Option<f64>,
    el_min: Option<f64>,
    el_max: Option<f64>,
}

#[derive(Deserialize, Default)]
struct SetDutycycleRangeParams {
    az_min: Option<u8>,
    az_max: Option<u8>,
    el_min: Option<u8>,
    el_max: Option<u8>,
}

fn bad_params(err: serde_json::Error) -> RpcHandlerError {
    RpcHandlerError::RpcError(format!("invalid parameters: {err}"))
}

impl Describable for RotatorWorker {
    fn prefix(&self) -> Prefix {
        self.prefix.clone()
    }

    fn describe(&self) -> Description {
        let mut builder = DescriptionBuilder::new();

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "status".to_string(),
            handler: handler(move |_req| {
                let m = Arc::clone(&m);
                async move {
                    let status = { m.lock().await.tick(chrono::Utc::now()).await? };
                    Ok(serde_json::to_value(status).unwrap_or_default())
                }
            }),
        });

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "rotate".to_string(),
            handler: handler(move |req| {
                let m = Arc::clone(&m);
                async move {
                    let params: RotateParams = serde_json::from_value(req).map_err(bad_params)?;
                    let (az, el) = m
                        .lock()
                        .await
                        .rotate(params.az, params.el, params.shortest, chrono::Utc::now())
                        .await?;
                    Ok(serde_json::json!({ "az": az, "el": el }))
                }
            }),
        });

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "stop".to_string(),
            handler: handler(move |_req| {
                let m = Arc::clone(&m);
                async move {
                    m.lock().await.stop().await?;
                    Ok(serde_json::json!({}))
                }
            }),
        });

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "tracking".to_string(),
            handler: handler(move |req| {
                let m = Arc::clone(&m);
                async move {
                    let params: TrackingParams = serde_json::from_value(req).map_err(bad_params)?;
                    let mode = match params.mode.as_str() {
                        "automatic" => TrackingMode::Tracking,
                        "manual" => TrackingMode::Manual,
                        other => return Err(RpcHandlerError::RpcError(format!("unknown tracking mode '{other}'"))),
                    };
                    m.lock().await.set_tracking_mode(mode);
                    Ok(serde_json::json!({}))
                }
            }),
        });

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "reset_position".to_string(),
            handler: handler(move |req| {
                let m = Arc::clone(&m);
                async move {
                    let params: ResetPositionParams = serde_json::from_value(req).map_err(bad_params)?;
                    m.lock().await.reset_position(params.az, params.el).await?;
                    Ok(serde_json::json!({}))
                }
            }),
        });

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "get_position_target".to_string(),
            handler: handler(move |_req| {
                let m = Arc::clone(&m);
                async move {
                    let target = m.lock().await.get_position_target();
                    Ok(match target {
                        Some((az, el)) => serde_json::json!({ "az": az, "el": el }),
                        None => serde_json::json!({ "az": null, "el": null }),
                    })
                }
            }),
        });

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "get_position_range".to_string(),
            handler: handler(move |_req| {
                let m = Arc::clone(&m);
                async move {
                    let limits = m.lock().await.get_position_range();
                    Ok(serde_json::to_value(limits).unwrap_or_default())
                }
            }),
        });

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "set_position_range".to_string(),
            handler: handler(move |req| {
                let m = Arc::clone(&m);
                async move {
                    let params: SetPositionRangeParams = serde_json::from_value(req).map_err(bad_params)?;
                    let mut guard = m.lock().await;
                    let mut limits = guard.get_position_range();
                    if let Some(v) = params.az_min {
                        limits.az_min = v;
                    }
                    if let Some(v) = params.az_max {
                        limits.az_max = v;
                    }
                    if let Some(v) = params.el_min {
                        limits.el_min = v;
                    }
                    if let Some(v) = params.el_max {
                        limits.el_max = v;
                    }
                    guard.set_position_range(limits);
                    Ok(serde_json::json!({}))
                }
            }),
        });

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "get_dutycycle_range".to_string(),
            handler: handler(move |_req| {
                let m = Arc::clone(&m);
                async move {
                    let (az_min, az_max, el_min, el_max) = m.lock().await.get_dutycycle_range().await?;
                    Ok(serde_json::json!({ "az_min": az_min, "az_max": az_max, "el_min": el_min, "el_max": el_max }))
                }
            }),
        });

        let m = Arc::clone(&self.module);
        builder = builder.rpc(RpcRegistration {
            exchange: "rotator".to_string(),
            verb: "set_dutycycle_range".to_string(),
            handler: handler(move |req| {
                let m = Arc::clone(&m);
                async move {
                    let params: SetDutycycleRangeParams = serde_json::from_value(req).map_err(bad_params)?;
                    m.lock()
                        .await
                        .set_dutycycle_range(params.az_min, params.az_max, params.el_min, params.el_max)
                        .await?;
                    Ok(serde_json::json!({}))
                }
            }),
        });

        builder.build()
    }
}

/// Registers `RotatorWorker` as `porthouse.gs.hardware.rotator.RotatorModule`
/// so the launcher can construct it from a launch spec (spec §4.E, §9
/// "Dynamic class loading by string").
pub mod factory {
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::Value;

    use crate::broker::BrokerClient;
    use crate::domain_types::Prefix;
    use crate::module_runtime::registry::ModuleFactory;
    use crate::module_runtime::ModuleRuntime;
    use crate::pass_prediction::target::GroundStation;
    use crate::rotator::{DummyRotator, RotatorConfig, RotatorLimits, RotatorModule};

    use super::RotatorWorker;

    /// Fully-qualified class name this factory answers to.
    pub const CLASS_NAME: &str = "porthouse.gs.hardware.rotator.RotatorModule";

    struct RotatorFactory {
        broker: Arc<BrokerClient>,
    }

    impl ModuleFactory for RotatorFactory {
        fn required_params(&self) -> &'static [&'static str] {
            &["address"]
        }

        fn construct(&self, params: HashMap<String, Value>) -> Result<(), String> {
            let address = params
                .get("address")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let prefix_str = params.get("prefix").and_then(Value::as_str).unwrap_or_default().to_string();
            let az_min = params.get("az_min").and_then(Value::as_f64).unwrap_or(-90.0);
            let az_max = params.get("az_max").and_then(Value::as_f64).unwrap_or(450.0);
            let el_min = params.get("el_min").and_then(Value::as_f64).unwrap_or(0.0);
            let el_max = params.get("el_max").and_then(Value::as_f64).unwrap_or(90.0);

            let config = RotatorConfig {
                address,
                limits: RotatorLimits { az_min, az_max, el_min, el_max },
                model: Default::default(),
                horizon_map: None,
                min_sun_angle: None,
            };
            let gs: Option<GroundStation> = None;
            let module = RotatorModule::new(config, gs, Box::new(DummyRotator::default()));
            let prefix = Prefix::new(prefix_str);
            let worker = Arc::new(RotatorWorker::new(module, prefix.clone()));
            let broker = Arc::clone(&self.broker);

            tokio::spawn(async move {
                let runtime = ModuleRuntime::new(Arc::clone(&broker), prefix);
                if let Err(err) = runtime.start(worker.clone()).await {
                    tracing::error!(error = %err, "rotator module failed to bind to broker");
                    return;
                }
                worker.spawn_control_loop(broker);
            });
            Ok(())
        }
    }

    /// Registers the factory for `CLASS_NAME` against `broker`.
    pub async fn register(broker: Arc<BrokerClient>) {
        crate::module_runtime::registry::register(CLASS_NAME, Box::new(RotatorFactory { broker })).await;
    }
}
