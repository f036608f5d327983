//! In-memory namespace enumerator.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::StoreError;
use crate::domain::ports::NamespaceSource;

/// A [`NamespaceSource`] over an explicit name set.
#[derive(Debug, Default)]
pub struct InMemoryNamespaceSource {
    names: RwLock<BTreeSet<String>>,
}

impl InMemoryNamespaceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, namespace: &str) {
        self.names.write().await.insert(namespace.to_string());
    }

    pub async fn remove(&self, namespace: &str) {
        self.names.write().await.remove(namespace);
    }
}

#[async_trait]
impl NamespaceSource for InMemoryNamespaceSource {
    async fn namespaces(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.names.read().await.iter().cloned().collect())
    }
}
