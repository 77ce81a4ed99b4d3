//! Static, priority-ordered provider catalog.

use super::{OpenAiCompatibleProvider, ProviderClient, ResilientProvider, StaticSource};
use crate::config::{ProviderConfig, ProviderKind, ResilienceConfig};
use crate::models::{Provider, ProviderId};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A provider descriptor paired with the client that serves it.
#[derive(Clone)]
pub struct RegisteredProvider {
    /// Static description.
    pub descriptor: Provider,
    /// Client used to invoke the provider.
    pub client: Arc<dyn ProviderClient>,
}

impl RegisteredProvider {
    /// Pairs a descriptor with a client.
    #[must_use]
    pub fn new(descriptor: Provider, client: Arc<dyn ProviderClient>) -> Self {
        Self { descriptor, client }
    }

    /// Returns the provider id.
    #[must_use]
    pub const fn id(&self) -> &ProviderId {
        &self.descriptor.id
    }
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("descriptor", &self.descriptor)
            .field("client", &self.client.kind())
            .finish()
    }
}

/// Read-only catalog of providers sorted by ascending priority.
///
/// Ties are broken by id so ordering is deterministic.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the id is already registered.
    pub fn register(mut self, descriptor: Provider, client: Arc<dyn ProviderClient>) -> Result<Self> {
        if self.get(&descriptor.id).is_some() {
            return Err(Error::InvalidInput(format!(
                "duplicate provider id '{}'",
                descriptor.id
            )));
        }
        self.providers.push(RegisteredProvider::new(descriptor, client));
        self.providers.sort_by(|a, b| {
            a.descriptor
                .priority
                .cmp(&b.descriptor.priority)
                .then_with(|| a.descriptor.id.cmp(&b.descriptor.id))
        });
        Ok(self)
    }

    /// Builds a registry from provider configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on duplicate ids.
    pub fn from_config(configs: &[ProviderConfig], resilience: &ResilienceConfig) -> Result<Self> {
        configs.iter().try_fold(Self::new(), |registry, config| {
            let client = build_client(config, resilience);
            registry.register(config.descriptor(), client)
        })
    }

    /// Returns all providers in priority order.
    #[must_use]
    pub fn all(&self) -> &[RegisteredProvider] {
        &self.providers
    }

    /// Looks up a provider by id.
    #[must_use]
    pub fn get(&self, id: &ProviderId) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|p| &p.descriptor.id == id)
    }

    /// Returns providers declaring `capability`, in priority order.
    #[must_use]
    pub fn with_capability(&self, capability: &str) -> Vec<RegisteredProvider> {
        self.providers
            .iter()
            .filter(|p| p.descriptor.has_capability(capability))
            .cloned()
            .collect()
    }

    /// Groups the providers declaring `capability` into cascade slots.
    ///
    /// Each slot holds one primary and its fallbacks in priority order. Slots
    /// are ordered by the priority of their primary.
    #[must_use]
    pub fn slots_for(&self, capability: &str) -> Vec<Vec<RegisteredProvider>> {
        let mut slots: Vec<Vec<RegisteredProvider>> = Vec::new();
        for provider in self.with_capability(capability) {
            let key = provider.descriptor.slot_key().to_string();
            match slots
                .iter_mut()
                .find(|slot| slot.first().is_some_and(|p| p.descriptor.slot_key() == key))
            {
                Some(slot) => slot.push(provider),
                None => slots.push(vec![provider]),
            }
        }
        slots
    }

    /// Returns the base reliability of a provider, or 0 if unknown.
    #[must_use]
    pub fn base_reliability(&self, id: &ProviderId) -> f64 {
        self.get(id).map_or(0.0, |p| p.descriptor.base_reliability)
    }

    /// Returns the number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn build_client(config: &ProviderConfig, resilience: &ResilienceConfig) -> Arc<dyn ProviderClient> {
    match config.kind {
        ProviderKind::Static => {
            let mut source = StaticSource::new(config.id.clone());
            if let Some(template) = &config.template {
                source = source.with_template(template.clone());
            }
            if let Some(latency_ms) = config.latency_ms {
                source = source.with_latency(Duration::from_millis(latency_ms));
            }
            wrap(config, source, resilience)
        },
        ProviderKind::OpenAi => {
            let mut client = OpenAiCompatibleProvider::new();
            if let Some(endpoint) = &config.endpoint {
                client = client.with_endpoint(endpoint.clone());
            }
            if let Some(model) = &config.model {
                client = client.with_model(model.clone());
            }
            let key_var = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
            wrap(config, client.with_api_key_from_env(key_var), resilience)
        },
    }
}

fn wrap<P: ProviderClient + 'static>(
    config: &ProviderConfig,
    client: P,
    resilience: &ResilienceConfig,
) -> Arc<dyn ProviderClient> {
    if config.circuit_breaker {
        Arc::new(ResilientProvider::new(config.id.clone(), client, resilience))
    } else {
        Arc::new(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::capability;

    fn client(id: &str) -> Arc<dyn ProviderClient> {
        Arc::new(StaticSource::new(id))
    }

    #[test]
    fn test_sorted_by_priority_then_id() {
        let registry = ProviderRegistry::new()
            .register(Provider::new("c", 2, 0.5), client("c"))
            .and_then(|r| r.register(Provider::new("b", 1, 0.5), client("b")))
            .and_then(|r| r.register(Provider::new("a", 2, 0.5), client("a")))
            .unwrap();

        let ids: Vec<&str> = registry.all().iter().map(|p| p.id().as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = ProviderRegistry::new()
            .register(Provider::new("a", 1, 0.5), client("a"))
            .and_then(|r| r.register(Provider::new("a", 2, 0.5), client("a")));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_slots_group_fallbacks() {
        let registry = ProviderRegistry::from_config(
            &ProviderConfig::defaults(),
            &ResilienceConfig::default(),
        )
        .unwrap();

        let slots = registry.slots_for(capability::SURFACE);
        let shape: Vec<Vec<&str>> = slots
            .iter()
            .map(|slot| slot.iter().map(|p| p.id().as_str()).collect())
            .collect();
        assert_eq!(shape, vec![vec!["atlas", "atlas-mirror"], vec!["beacon"]]);

        assert!(registry.slots_for("nonexistent").is_empty());
    }

    #[test]
    fn test_base_reliability_lookup() {
        let registry = ProviderRegistry::new()
            .register(Provider::new("a", 1, 0.8), client("a"))
            .unwrap();
        assert!((registry.base_reliability(&ProviderId::from("a")) - 0.8).abs() < f64::EPSILON);
        assert!(registry.base_reliability(&ProviderId::from("zz")).abs() < f64::EPSILON);
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }
}
