use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};

/// An upstream RPC endpoint.
///
/// Lower `priority` values are tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Unique human-readable identifier (e.g. "alchemy"). Used as the metrics label.
    pub name: Arc<str>,
    /// HTTP(S) JSON-RPC endpoint URL.
    pub url: String,
    /// Failover order, ascending.
    pub priority: u32,
}

impl Provider {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, url: impl Into<String>, priority: u32) -> Self {
        Self { name: name.into(), url: url.into(), priority }
    }

    /// Public Ethereum mainnet endpoints used when no providers are configured.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("llamarpc", "https://eth.llamarpc.com", 1),
            Self::new("publicnode", "https://ethereum-rpc.publicnode.com", 2),
            Self::new("cloudflare", "https://cloudflare-eth.com", 3),
        ]
    }
}

/// Error returned when a provider list cannot form a registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no providers configured")]
    Empty,
    #[error("duplicate provider name: {0}")]
    DuplicateName(String),
}

/// The fixed, priority-ordered provider list.
///
/// Built once and immutable afterwards, so it can be read from any task without
/// synchronization. Position in this list is the provider's index everywhere else in the
/// pool (breakers, clients and metrics handles are stored in parallel slices).
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Arc<[Provider]>,
}

impl ProviderRegistry {
    /// Sorts `providers` ascending by priority. The sort is stable, so providers sharing a
    /// priority keep their configured order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Empty`] for an empty list and
    /// [`RegistryError::DuplicateName`] if two providers share a name.
    pub fn new(mut providers: Vec<Provider>) -> Result<Self, RegistryError> {
        if providers.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen = HashSet::with_capacity(providers.len());
        for provider in &providers {
            if !seen.insert(provider.name.clone()) {
                return Err(RegistryError::DuplicateName(provider.name.to_string()));
            }
        }

        providers.sort_by_key(|p| p.priority);
        Ok(Self { providers: providers.into() })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Provider> {
        self.providers.get(index)
    }

    /// Returns the priority-order index of the named provider.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.providers.iter().position(|p| p.name.as_ref() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Provider] {
        &self.providers
    }
}
