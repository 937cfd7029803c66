use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::{CpuBackend, StubBackend};

type BackendFactory = Box<dyn Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Registry of detector factories keyed by detector identifier.
///
/// Every building gets its own backend instance, so the registry stores
/// constructors rather than shared backends.
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in `cpu` and `stub` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("cpu", || Ok(Box::new(CpuBackend::new())));
        registry.register("stub", || Ok(Box::new(StubBackend::new())));
        registry
    }

    /// Register a backend factory under a name. Later registrations replace earlier ones.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// List registered backend names.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Create a fresh backend for a detector identifier.
    ///
    /// Registered names win; otherwise an `.onnx` path loads a model backend
    /// when the `backend-tract` feature is enabled.
    pub fn create(&self, identifier: &str) -> Result<Box<dyn DetectorBackend>> {
        if let Some(factory) = self.factories.get(identifier) {
            return factory();
        }
        if is_onnx_path(identifier) {
            return load_onnx(identifier);
        }
        Err(anyhow!(
            "detector '{}' not registered (available: {})",
            identifier,
            self.list().join(", ")
        ))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn is_onnx_path(identifier: &str) -> bool {
    Path::new(identifier)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
}

#[cfg(feature = "backend-tract")]
fn load_onnx(path: &str) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(super::backends::TractBackend::new(path)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(path: &str) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector model {} requires the backend-tract feature",
        path
    ))
}
