//! Process-wide evaluator registry.
//!
//! Backends are registered by name and created on demand when the host
//! selects one via options. Initialization is explicit: `init()` must run
//! before the first lookup, so backend availability is decided at startup
//! rather than on some arbitrary first search.

use crate::network::{EvalError, Network};
use crate::stream::{StreamingNetwork, StreamingOptions};
use crate::uniform::UniformNetwork;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Builds a network from an optional weights file.
pub type NetworkFactory = fn(Option<&Path>) -> Result<Arc<dyn Network>, EvalError>;

static REGISTRY: OnceCell<Mutex<HashMap<&'static str, NetworkFactory>>> = OnceCell::new();

fn uniform_factory(_weights: Option<&Path>) -> Result<Arc<dyn Network>, EvalError> {
    Ok(Arc::new(UniformNetwork::new()))
}

fn streaming_factory(weights: Option<&Path>) -> Result<Arc<dyn Network>, EvalError> {
    let inner = uniform_factory(weights)?;
    Ok(Arc::new(StreamingNetwork::new(
        inner,
        StreamingOptions::default(),
    )))
}

/// Registers the built-in backends. Idempotent.
pub fn init() {
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, NetworkFactory> = HashMap::new();
        map.insert("uniform", uniform_factory);
        map.insert("streaming", streaming_factory);
        Mutex::new(map)
    });
}

/// Adds a backend. External crates linking real inference kernels register
/// themselves here after `init()`.
pub fn register(name: &'static str, factory: NetworkFactory) -> Result<(), EvalError> {
    let registry = REGISTRY.get().ok_or(EvalError::RegistryNotInitialized)?;
    if registry.lock().insert(name, factory).is_some() {
        warn!(backend = name, "evaluator backend re-registered");
    }
    Ok(())
}

pub fn create(name: &str, weights: Option<&Path>) -> Result<Arc<dyn Network>, EvalError> {
    let registry = REGISTRY.get().ok_or(EvalError::RegistryNotInitialized)?;
    let factory = registry
        .lock()
        .get(name)
        .copied()
        .ok_or_else(|| EvalError::UnknownBackend(name.to_string()))?;
    factory(weights)
}

/// Registered backend names, sorted for stable option listings.
pub fn backends() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY
        .get()
        .map(|r| r.lock().keys().copied().collect())
        .unwrap_or_default();
    names.sort_unstable();
    names
}
