//! Name-keyed capability registry with once-only registration.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::GatewayResult;
use crate::llm::ToolSpec;
use crate::metrics;
use crate::tools::{Capability, ToolContext};

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: DashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and insert the capability unless `name` is already taken.
    /// Returns whether this call registered it.
    ///
    /// The factory runs while the name's shard is locked, so concurrent first
    /// callers build at most one instance. It must not touch this registry.
    pub fn ensure_registered<F>(&self, name: &str, factory: F) -> GatewayResult<bool>
    where
        F: FnOnce() -> GatewayResult<Arc<dyn Capability>>,
    {
        match self.capabilities.entry(name.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let capability = factory()?;
                if capability.name() != name {
                    warn!("Capability '{}' registered under name '{}'", capability.name(), name);
                }
                slot.insert(capability);
                info!("Registered capability '{}'", name);
                Ok(true)
            }
        }
    }

    pub fn register(&self, capability: Arc<dyn Capability>) -> bool {
        let name = capability.name().to_string();
        matches!(self.ensure_registered(&name, || Ok(capability)), Ok(true))
    }

    pub fn has(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Advertised tool list, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.capabilities.iter().map(|c| c.value().spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn invoke(&self, name: &str, arguments: &str, context: &ToolContext) -> String {
        // clone the Arc so no shard lock is held across the await
        let capability = self.capabilities.get(name).map(|c| Arc::clone(c.value()));
        match capability {
            Some(capability) => {
                // capabilities label their own outcome
                debug!("Invoking capability '{}' with {}", name, arguments);
                capability.invoke(arguments, context).await
            }
            None => {
                warn!("Model requested unknown capability '{}'", name);
                metrics::inc_tool_invocation(name, "unknown");
                format!("_Unknown tool: {}_", name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo(&'static str);

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "echoes its arguments"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, arguments: &str, _: &ToolContext) -> String {
            format!("{}:{}", self.0, arguments)
        }
    }

    #[test]
    fn test_second_registration_is_noop() {
        let registry = CapabilityRegistry::new();
        assert!(registry.register(Arc::new(Echo("echo"))));
        assert!(!registry.register(Arc::new(Echo("echo"))));
        assert_eq!(registry.len(), 1);
        assert!(registry.has("echo"));
    }

    #[test]
    fn test_failed_factory_leaves_name_free() {
        let registry = CapabilityRegistry::new();
        let result = registry.ensure_registered("db", || Err(GatewayError::Configuration("missing".into())));
        assert!(result.is_err());
        assert!(!registry.has("db"));
        assert!(registry.ensure_registered("db", || Ok(Arc::new(Echo("db")) as Arc<dyn Capability>)).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_registration_builds_once() {
        let registry = Arc::new(CapabilityRegistry::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                registry.ensure_registered("internal_search", || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(Echo("internal_search")) as Arc<dyn Capability>)
                })
            }));
        }
        let mut registered = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                registered += 1;
            }
        }
        assert_eq!(registered, 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_dispatches_by_name() {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(Echo("b")));
        registry.register(Arc::new(Echo("a")));
        assert_eq!(registry.invoke("a", "x", &ToolContext::default()).await, "a:x");
        assert_eq!(registry.invoke("zzz", "x", &ToolContext::default()).await, "_Unknown tool: zzz_");
        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
