//! 4.E Launcher: parses a YAML launch spec, validates it, forks supervised
//! worker processes, and declares exchanges.
//!
//! Grounded on `launcher.py`'s `Launcher` class: `validate_launch_specification`/
//! `validate_module_specification`, the `GLOBAL:`/typed-cast parameter
//! resolution in `setup_modules`, and the `wait()` liveness poll. Each
//! worker here is a genuine child OS process (spec §4.E "Isolation"),
//! re-invoking the `porthouse` binary with a one-shot "run this module"
//! subcommand, rather than a forked Python interpreter.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::broker::{BrokerClient, BrokerError, ExchangeType};
use crate::config::{ConfigError, Globals};
use crate::domain_types::Prefix;

/// Errors raised while parsing, validating, or running a launch spec.
#[derive(Error, Debug)]
pub enum LauncherError {
    /// The launch spec file could not be read.
    #[error("failed to read launch spec {path}: {source}")]
    Read {
        /// Path to the offending file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The launch spec failed to parse as YAML.
    #[error("failed to parse launch spec {path}: {source}")]
    Parse {
        /// Path to the offending file.
        path: String,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// A module descriptor failed structural validation
    /// (`ModuleValidationError` in the original).
    #[error("module specification invalid: {0}")]
    Validation(String),

    /// Config resolution (globals load, `GLOBAL:` lookup) failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A broker operation (exchange declaration) failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A worker process could not be spawned.
    #[error("failed to spawn worker for module '{module}': {source}")]
    Spawn {
        /// Display name of the module that failed to start.
        module: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A worker process exited; the launcher tears down the rest.
    #[error("worker for module '{module}' exited (code {code:?})")]
    WorkerDied {
        /// Display name of the module that died.
        module: String,
        /// Process exit code, if any.
        code: Option<i32>,
    },
}

/// One `params:` entry in a module descriptor: a name, an optional typed
/// cast, and a value (string, number, or bool before cast resolution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name as seen by the module's constructor.
    pub name: String,
    /// Raw value, possibly a `GLOBAL:<name>` sentinel string.
    pub value: Value,
    /// Optional coercion applied after `GLOBAL:` resolution.
    #[serde(rename = "type", default)]
    pub cast: Option<ParamType>,
}

/// Typed cast applied to a resolved parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Coerce to a string.
    String,
    /// Coerce to an integer.
    Integer,
    /// Coerce to a float.
    Float,
    /// Coerce to a boolean (`"true"` case-insensitively).
    Boolean,
}

/// One `modules:` entry: the module's fully-qualified class name, display
/// name, and constructor parameters (spec §4.E schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Display name, defaults to `module` if absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Fully-qualified module class name, `package.Class` shaped.
    pub module: String,
    /// Constructor parameters.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl ModuleSpec {
    /// Display name, falling back to `module` (spec §4.E step 4).
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.module)
    }
}

/// Top-level launch specification (spec §4.E schema:
/// `{ name?, exchanges: {name: kind}, modules: [...] }`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Display name for this launcher instance's logs.
    #[serde(default)]
    pub name: Option<String>,
    /// Exchange name to kind mapping declared at start.
    #[serde(default)]
    pub exchanges: HashMap<String, String>,
    /// Modules to supervise.
    pub modules: Vec<ModuleSpec>,
}

/// Parses `contents` as a launch spec and structurally validates it,
/// raising on the first offender (spec §4.E step 1).
pub fn parse_launch_spec(path: &str, contents: &str) -> Result<LaunchSpec, LauncherError> {
    let spec: LaunchSpec = serde_yaml::from_str(contents).map_err(|source| LauncherError::Parse { path: path.to_string(), source })?;
    validate_launch_spec(&spec)?;
    Ok(spec)
}

fn validate_launch_spec(spec: &LaunchSpec) -> Result<(), LauncherError> {
    for exchange_kind in spec.exchanges.values() {
        parse_exchange_kind(exchange_kind)?;
    }
    for module in &spec.modules {
        validate_module_spec(module)?;
    }
    Ok(())
}

fn validate_module_spec(module: &ModuleSpec) -> Result<(), LauncherError> {
    if !module.module.contains('.') {
        return Err(LauncherError::Validation(format!("module name '{}' is not package-qualified", module.module)));
    }
    for param in &module.params {
        if param.name.is_empty() {
            return Err(LauncherError::Validation("a parameter definition is missing 'name'".to_string()));
        }
    }
    Ok(())
}

fn parse_exchange_kind(kind: &str) -> Result<ExchangeType, LauncherError> {
    match kind {
        "topic" => Ok(ExchangeType::Topic),
        "fanout" => Ok(ExchangeType::Fanout),
        "direct" => Ok(ExchangeType::Direct),
        other => Err(LauncherError::Validation(format!("unknown exchange kind '{other}'"))),
    }
}

/// Resolves a raw param value: follows the `GLOBAL:<name>` sentinel against
/// `globals`, then applies the parameter's typed cast, if any (spec §4.E
/// step 4b).
pub fn resolve_param(param: &ParamSpec, globals: &Globals) -> Result<Value, LauncherError> {
    let mut value = param.value.clone();
    if let Value::String(s) = &value {
        if let Some(name) = s.strip_prefix("GLOBAL:") {
            let yaml_value = globals.extra.get(name).ok_or_else(|| ConfigError::UnresolvedGlobal(name.to_string()))?;
            value = serde_json::to_value(yaml_value).unwrap_or(Value::Null);
        }
    }

    let value = match param.cast {
        Some(ParamType::String) => Value::String(value_as_string(&value)),
        Some(ParamType::Integer) => Value::Number(value_as_i64(&value).into()),
        Some(ParamType::Float) => serde_json::Number::from_f64(value_as_f64(&value)).map(Value::Number).unwrap_or(Value::Null),
        Some(ParamType::Boolean) => Value::Bool(value_as_bool(&value)),
        None => value,
    };
    Ok(value)
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_as_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn value_as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Whether `name` survives the include/exclude substring filters (spec
/// §4.E: "include acts as whitelist, exclude as subtractive").
pub fn passes_filters(name: &str, includes: Option<&[String]>, excludes: Option<&[String]>) -> bool {
    let mut ok = true;
    if let Some(includes) = includes {
        ok = includes.iter().any(|inc| name.contains(inc.as_str()));
    }
    if let Some(excludes) = excludes {
        ok = ok && excludes.iter().all(|exc| !name.contains(exc.as_str()));
    }
    ok
}

const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Drives exchange declaration and worker supervision for one launch spec
/// (spec §4.E algorithm steps 2-6).
pub struct Launcher {
    broker: std::sync::Arc<BrokerClient>,
    globals: Globals,
    launcher_prefix: Option<String>,
}

impl Launcher {
    /// Builds a launcher bound to an already-connected broker and the
    /// process-wide globals.
    pub fn new(broker: std::sync::Arc<BrokerClient>, globals: Globals, launcher_prefix: Option<String>) -> Self {
        Self { broker, globals, launcher_prefix }
    }

    /// `--declare_exchanges`: deletes and redeclares every exchange in the
    /// spec, durable, not auto-deleted (spec §4.E step 3).
    #[instrument(skip(self, spec))]
    pub async fn declare_exchanges(&self, spec: &LaunchSpec) -> Result<(), LauncherError> {
        info!(count = spec.exchanges.len(), "declaring exchanges");
        for (name, kind) in &spec.exchanges {
            let kind = parse_exchange_kind(kind)?;
            self.broker.declare_exchange(name, kind, true).await?;
        }
        Ok(())
    }

    /// Resolves one module's full parameter map: globals, per-param
    /// `GLOBAL:`/cast resolution, and prefix stacking (spec §4.E steps
    /// 4a-4c).
    pub fn resolve_module_params(&self, module: &ModuleSpec) -> Result<HashMap<String, Value>, LauncherError> {
        let mut params: HashMap<String, Value> = HashMap::new();
        params.insert("amqp_url".to_string(), Value::String(self.globals.amqp_url.clone()));
        params.insert("db_url".to_string(), Value::String(self.globals.db_url.clone()));

        for param in &module.params {
            let value = resolve_param(param, &self.globals)?;
            if !value.is_null() {
                params.insert(param.name.clone(), value);
            }
        }

        if let Some(launcher_prefix) = &self.launcher_prefix {
            let outer = Prefix::new(launcher_prefix.clone());
            let inner = match params.get("prefix") {
                Some(Value::String(existing)) => Prefix::new(existing.clone()),
                _ => Prefix::new(String::new()),
            };
            params.insert("prefix".to_string(), Value::String(inner.stack(&outer).into_inner()));
        }

        Ok(params)
    }

    /// Forks one supervised worker process per module surviving the
    /// include/exclude filters, then polls liveness every 0.5 s, tearing
    /// down the rest on the first death (spec §4.E steps 4d-6).
    #[instrument(skip(self, spec, exe_path))]
    pub async fn run_modules(
        &self,
        spec: &LaunchSpec,
        exe_path: &str,
        includes: Option<&[String]>,
        excludes: Option<&[String]>,
    ) -> Result<(), LauncherError> {
        let mut children: Vec<(String, Child)> = Vec::new();

        for module in &spec.modules {
            let name = module.display_name().to_string();
            if !passes_filters(&name, includes, excludes) {
                continue;
            }

            let params = self.resolve_module_params(module)?;
            let params_json = serde_json::to_string(&params).unwrap_or_default();

            info!(module = %name, class = %module.module, "starting worker");
            let child = Command::new(exe_path)
                .args(["run-module", "--module", &module.module, "--params", &params_json])
                .stdin(Stdio::null())
                .spawn()
                .map_err(|source| LauncherError::Spawn { module: name.clone(), source })?;
            children.push((name, child));
        }

        loop {
            sleep(LIVENESS_POLL_INTERVAL).await;
            for (name, child) in &mut children {
                if let Some(status) = child.try_wait().map_err(|source| LauncherError::Spawn { module: name.clone(), source })? {
                    warn!(module = %name, code = ?status.code(), "worker exited, tearing down remaining workers");
                    let died = LauncherError::WorkerDied { module: name.clone(), code: status.code() };
                    self.terminate_all(&mut children).await;
                    return Err(died);
                }
            }
        }
    }

    async fn terminate_all(&self, children: &mut [(String, Child)]) {
        for (name, child) in children {
            if let Err(err) = child.start_kill() {
                error!(module = %name, error = %err, "failed to terminate worker");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> &'static str {
        "name: test-launcher\n\
         exchanges:\n\
         \x20\x20rotator: topic\n\
         modules:\n\
         \x20\x20- module: porthouse.gs.hardware.rotator.RotatorModule\n\
         \x20\x20\x20\x20name: uhf-rotator\n\
         \x20\x20\x20\x20params:\n\
         \x20\x20\x20\x20\x20\x20- name: address\n\
         \x20\x20\x20\x20\x20\x20\x20\x20value: \"/dev/ttyUSB0\"\n"
    }

    #[test]
    fn parses_and_validates_a_well_formed_spec() {
        let spec = parse_launch_spec("test.yaml", sample_spec()).unwrap();
        assert_eq!(spec.modules.len(), 1);
        assert_eq!(spec.modules[0].display_name(), "uhf-rotator");
    }

    #[test]
    fn rejects_a_module_name_without_a_dot() {
        let yaml = "modules:\n  - module: RotatorModule\n";
        let err = parse_launch_spec("test.yaml", yaml).unwrap_err();
        assert!(matches!(err, LauncherError::Validation(_)));
    }

    #[test]
    fn rejects_an_unknown_exchange_kind() {
        let yaml = "exchanges:\n  weird: quantum\nmodules: []\n";
        let err = parse_launch_spec("test.yaml", yaml).unwrap_err();
        assert!(matches!(err, LauncherError::Validation(_)));
    }

    #[test]
    fn include_whitelists_by_substring() {
        assert!(passes_filters("uhf-rotator", Some(&["uhf".to_string()]), None));
        assert!(!passes_filters("sband-rotator", Some(&["uhf".to_string()]), None));
    }

    #[test]
    fn exclude_subtracts_from_whatever_include_allowed() {
        assert!(!passes_filters("uhf-rotator", None, Some(&["uhf".to_string()])));
        assert!(passes_filters("sband-rotator", None, Some(&["uhf".to_string()])));
    }

    #[test]
    fn global_sentinel_resolves_against_globals() {
        let mut extra = HashMap::new();
        extra.insert("amqp_url".to_string(), serde_yaml::Value::String("amqp://x".to_string()));
        let globals = Globals {
            amqp_url: "amqp://x".to_string(),
            db_url: "sqlite://x".to_string(),
            log_path: "/tmp".into(),
            hk_schema: None,
            extra,
        };
        let param = ParamSpec { name: "url".to_string(), value: Value::String("GLOBAL:amqp_url".to_string()), cast: None };
        let resolved = resolve_param(&param, &globals).unwrap();
        assert_eq!(resolved, Value::String("amqp://x".to_string()));
    }

    #[test]
    fn typed_cast_coerces_string_to_integer() {
        let globals = Globals { amqp_url: String::new(), db_url: String::new(), log_path: "/tmp".into(), hk_schema: None, extra: HashMap::new() };
        let param = ParamSpec { name: "n".to_string(), value: Value::String("42".to_string()), cast: Some(ParamType::Integer) };
        let resolved = resolve_param(&param, &globals).unwrap();
        assert_eq!(resolved, Value::Number(42.into()));
    }
}
