//! Dataset reference resolution.

use std::collections::BTreeSet;

use async_trait::async_trait;

use fleetrun_core::CoreError;

/// Looks up the opaque `data_ref` of a job spec in an artifact catalog.
#[async_trait]
pub trait DatasetResolver: Send + Sync {
    /// Fails with [`CoreError::InvalidSpec`] when the reference is unknown.
    async fn resolve(&self, data_ref: &str) -> Result<(), CoreError>;
}

/// Accepts any non-empty reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveResolver;

#[async_trait]
impl DatasetResolver for PermissiveResolver {
    async fn resolve(&self, data_ref: &str) -> Result<(), CoreError> {
        if data_ref.trim().is_empty() {
            return Err(CoreError::InvalidSpec("data_ref is empty".into()));
        }
        Ok(())
    }
}

/// Fixed set of known dataset references.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    datasets: BTreeSet<String>,
}

impl StaticCatalog {
    pub fn new<I, S>(datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            datasets: datasets.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl DatasetResolver for StaticCatalog {
    async fn resolve(&self, data_ref: &str) -> Result<(), CoreError> {
        if self.datasets.contains(data_ref) {
            Ok(())
        } else {
            Err(CoreError::InvalidSpec(format!("unknown dataset: {data_ref}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permissive_resolver() {
        assert!(PermissiveResolver.resolve("s3://bucket/iris").await.is_ok());
        assert!(PermissiveResolver.resolve("  ").await.is_err());
    }

    #[tokio::test]
    async fn test_static_catalog() {
        let catalog = StaticCatalog::new(["iris", "mnist"]);
        assert!(catalog.resolve("iris").await.is_ok());

        let err = catalog.resolve("cifar").await.unwrap_err();
        assert_eq!(err.kind(), "InvalidSpec");
    }
}
