/// Cloud provider collaborator: the only boundary that touches live infrastructure
pub mod http;
#[cfg(test)]
pub mod mock;

pub use http::HttpProvider;

use async_trait::async_trait;
use thiserror::Error;

use crate::graph::{AttributeMap, ResourceId};

/// Provider call failure, split into retryable and terminal kinds
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The resource does not exist on the provider side
    #[error("resource not found")]
    NotFound,

    /// Retrying may succeed (rate limit, timeout, conflict in flight)
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Retrying will not help (invalid attributes, unresolvable conflict)
    #[error("provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Abstract capability set of the cloud provider.
///
/// Implementations must be safe for concurrent calls on distinct
/// resources; the executor never issues concurrent calls for resources
/// related by a dependency edge.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a resource and return its provider-assigned identifier.
    /// The logical id travels along so the provider can tag the resource.
    async fn create(&self, id: &ResourceId, attrs: &AttributeMap) -> Result<String, ProviderError>;

    /// Overwrite the attributes of an existing resource in place
    async fn update(&self, provider_id: &str, attrs: &AttributeMap) -> Result<(), ProviderError>;

    /// Delete an existing resource
    async fn delete(&self, provider_id: &str) -> Result<(), ProviderError>;

    /// Read the live attributes of an existing resource
    async fn read(&self, provider_id: &str) -> Result<AttributeMap, ProviderError>;
}
