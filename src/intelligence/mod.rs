//! Intelligence provider trait and registry
//!
//! Providers are independent, pluggable sources of market intelligence.
//! The registry only maps names to providers; it never calls them.

use crate::error::{OrchestrationError, ProviderError};
use crate::models::{IntelligenceResult, IntelligenceType, ProviderCategory, Security};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub mod aggregator;
pub mod providers;

pub use aggregator::{composite_risk_adjustment, IntelligenceAggregator};

/// A single source of intelligence for a security
#[async_trait]
pub trait IntelligenceProvider: Send + Sync {
    /// Unique within a registry
    fn name(&self) -> &str;

    fn intelligence_type(&self) -> IntelligenceType;

    fn category(&self) -> ProviderCategory;

    fn description(&self) -> String {
        format!("{} intelligence provider", self.name())
    }

    /// Whether this provider can analyze the given security at all
    fn supports(&self, _security: &Security) -> bool {
        true
    }

    async fn analyze(
        &self,
        security: &Security,
        context: Option<&Value>,
    ) -> std::result::Result<IntelligenceResult, ProviderError>;
}

/// Name → provider mapping that preserves registration order
pub struct IntelligenceRegistry {
    providers: Vec<Arc<dyn IntelligenceProvider>>,
    index: HashMap<String, usize>,
}

/// Registry that can still accept providers while cycles are selecting from it
pub type SharedRegistry = Arc<RwLock<IntelligenceRegistry>>;

impl IntelligenceRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn IntelligenceProvider>) -> Result<()> {
        let name = provider.name().to_string();

        if self.index.contains_key(&name) {
            return Err(OrchestrationError::DuplicateProvider(name));
        }

        info!(
            provider = %name,
            intelligence_type = %provider.intelligence_type(),
            category = %provider.category(),
            "Registered provider"
        );

        self.index.insert(name, self.providers.len());
        self.providers.push(provider);
        Ok(())
    }

    /// Remove a provider; later providers keep their relative order
    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(position) = self.index.remove(name) else {
            return false;
        };

        self.providers.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }

        info!(provider = %name, "Unregistered provider");
        true
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn IntelligenceProvider>> {
        self.index
            .get(name)
            .map(|&i| self.providers[i].clone())
            .ok_or_else(|| OrchestrationError::UnknownProvider(name.to_string()))
    }

    /// All providers in registration order, or exactly the named ones in the
    /// order given. Any unknown name fails the whole call.
    pub fn select(&self, names: Option<&[String]>) -> Result<Vec<Arc<dyn IntelligenceProvider>>> {
        match names {
            None => Ok(self.providers.clone()),
            Some(names) => names.iter().map(|name| self.get(name)).collect(),
        }
    }

    /// Same validation as `select`, but always in registration order.
    ///
    /// This is the order aggregated results are reported in.
    pub fn select_registered(
        &self,
        names: Option<&[String]>,
    ) -> Result<Vec<Arc<dyn IntelligenceProvider>>> {
        let mut selected = self.select(names)?;
        selected.sort_by_key(|p| self.index.get(p.name()).copied().unwrap_or(usize::MAX));
        Ok(selected)
    }

    /// Presentation only; aggregation treats every category the same
    pub fn by_category(&self, category: ProviderCategory) -> Vec<Arc<dyn IntelligenceProvider>> {
        self.providers
            .iter()
            .filter(|p| p.category() == category)
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }
}

impl Default for IntelligenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;
    use crate::error::ProviderErrorKind;

    fn registry_abc() -> IntelligenceRegistry {
        let mut registry = IntelligenceRegistry::new();
        registry.register(ScriptedProvider::ok("a", 0.5, 0.1)).unwrap();
        registry.register(ScriptedProvider::ok("b", 0.5, 0.1)).unwrap();
        registry
            .register(ScriptedProvider::failing("c", ProviderErrorKind::Unknown))
            .unwrap();
        registry
    }

    fn names_of(providers: &[Arc<dyn IntelligenceProvider>]) -> Vec<String> {
        providers.iter().map(|p| p.name().to_string()).collect()
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut registry = registry_abc();
        let err = registry.register(ScriptedProvider::ok("a", 1.0, 0.0)).unwrap_err();
        assert!(matches!(err, OrchestrationError::DuplicateProvider(name) if name == "a"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_get_unknown_fails() {
        let registry = registry_abc();
        assert!(registry.get("b").is_ok());
        assert!(matches!(
            registry.get("zzz"),
            Err(OrchestrationError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_select_all_in_registration_order() {
        let registry = registry_abc();
        let selected = registry.select(None).unwrap();
        assert_eq!(names_of(&selected), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_select_named_in_given_order_and_idempotent() {
        let registry = registry_abc();
        let names = vec!["c".to_string(), "a".to_string()];

        let first = registry.select(Some(&names)).unwrap();
        let second = registry.select(Some(&names)).unwrap();

        assert_eq!(names_of(&first), vec!["c", "a"]);
        assert_eq!(names_of(&first), names_of(&second));
    }

    #[test]
    fn test_select_registered_ignores_requested_order() {
        let registry = registry_abc();
        let names = vec!["c".to_string(), "b".to_string(), "a".to_string()];

        let selected = registry.select_registered(Some(&names)).unwrap();
        assert_eq!(names_of(&selected), vec!["a", "b", "c"]);

        let missing = vec!["b".to_string(), "nope".to_string()];
        assert!(matches!(
            registry.select_registered(Some(&missing)),
            Err(OrchestrationError::UnknownProvider(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_select_fails_fast_on_unknown() {
        let registry = registry_abc();
        let names = vec!["a".to_string(), "missing".to_string()];
        assert!(matches!(
            registry.select(Some(&names)),
            Err(OrchestrationError::UnknownProvider(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_by_category() {
        let registry = registry_abc();
        assert_eq!(names_of(&registry.by_category(ProviderCategory::Data)), vec!["a", "b"]);
        assert_eq!(names_of(&registry.by_category(ProviderCategory::Inference)), vec!["c"]);
    }

    #[test]
    fn test_unregister_keeps_order() {
        let mut registry = registry_abc();
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.names(), vec!["b", "c"]);
        assert_eq!(registry.get("c").unwrap().name(), "c");
    }

    #[tokio::test]
    async fn test_shared_registry_serializes_registration() {
        let shared = registry_abc().into_shared();

        shared
            .write()
            .await
            .register(ScriptedProvider::ok("d", 0.2, 0.0))
            .unwrap();

        let selected = shared.read().await.select(None).unwrap();
        assert_eq!(names_of(&selected), vec!["a", "b", "c", "d"]);
    }
}
