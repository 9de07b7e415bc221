//! Static module-type registry.
//!
//! The Python launcher instantiates module classes named in YAML via
//! `importlib`. Spec §9 ("Dynamic class loading by string") replaces this
//! with a registry populated at program start: each module type calls
//! `register("porthouse.x.Y", factory)` and the launcher looks the string
//! up here instead of reflecting over a dynamically imported class.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

/// Error raised when a launch spec names a module class that has no
/// registered factory.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No factory is registered under this fully-qualified name.
    #[error("module class '{0}' is not registered")]
    UnknownClass(String),

    /// A required constructor parameter was missing from the launch spec.
    #[error("module '{module}' ({class}) missing argument '{argument}'")]
    MissingArgument {
        /// Verbose module name from the launch spec.
        module: String,
        /// Fully-qualified class name.
        class: String,
        /// Name of the missing required parameter.
        argument: String,
    },
}

/// A module factory: given its resolved parameter map, constructs a
/// boxed, runnable module instance. Modules report their own required
/// parameter names so the launcher can validate before construction,
/// replacing the Python original's `inspect.getfullargspec` introspection.
pub trait ModuleFactory: Send + Sync {
    /// Parameter names this module's constructor requires.
    fn required_params(&self) -> &'static [&'static str];

    /// Builds and starts the module, consuming its resolved parameter map.
    fn construct(&self, params: HashMap<String, Value>) -> Result<(), String>;
}

type Registry = Mutex<HashMap<String, Box<dyn ModuleFactory>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers a factory under its fully-qualified class name
/// (`porthouse.gs.hardware.rotator.RotatorModule`, for example).
pub async fn register(fully_qualified_class: &str, factory: Box<dyn ModuleFactory>) {
    registry()
        .lock()
        .await
        .insert(fully_qualified_class.to_string(), factory);
}

/// Validates that `params` contains every parameter `class` requires,
/// then constructs it. Mirrors the launcher worker's argument check
/// (spec §4.E step 4d).
pub async fn construct(
    module_display_name: &str,
    fully_qualified_class: &str,
    params: HashMap<String, Value>,
) -> Result<(), RegistryError> {
    let guard = registry().lock().await;
    let factory = guard
        .get(fully_qualified_class)
        .ok_or_else(|| RegistryError::UnknownClass(fully_qualified_class.to_string()))?;

    for required in factory.required_params() {
        if !params.contains_key(*required) {
            return Err(RegistryError::MissingArgument {
                module: module_display_name.to_string(),
                class: fully_qualified_class.to_string(),
                argument: (*required).to_string(),
            });
        }
    }

    factory
        .construct(params)
        .map_err(|_| RegistryError::UnknownClass(fully_qualified_class.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubFactory;
    impl ModuleFactory for StubFactory {
        fn required_params(&self) -> &'static [&'static str] {
            &["address"]
        }
        fn construct(&self, _params: HashMap<String, Value>) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unregistered_class_errors() {
        let err = construct("x", "porthouse.nonexistent.Class", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownClass(_)));
    }

    #[tokio::test]
    async fn missing_required_argument_errors() {
        register("porthouse.test.Stub", Box::new(StubFactory)).await;
        let err = construct("my-module", "porthouse.test.Stub", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingArgument { .. }));
    }

    #[tokio::test]
    async fn satisfied_arguments_construct() {
        register("porthouse.test.Stub2", Box::new(StubFactory)).await;
        let mut params = HashMap::new();
        params.insert("address".to_string(), Value::String("COM1".to_string()));
        construct("my-module", "porthouse.test.Stub2", params)
            .await
            .unwrap();
    }
}
