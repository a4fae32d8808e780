/// Scripted in-memory provider for exercising diff/apply/drift without a live API
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::graph::{AttributeMap, ResourceId};

use super::{Provider, ProviderError};

enum Failure {
    Permanent,
    /// Fail this many times, then succeed
    Transient(u32),
}

struct Remote {
    logical: ResourceId,
    attrs: AttributeMap,
}

#[derive(Default)]
struct Inner {
    resources: BTreeMap<String, Remote>,
    failures: BTreeMap<String, Failure>,
    calls: Vec<(&'static str, String)>,
    counter: u64,
}

/// Test double for the provider: records every call, serves attributes from
/// memory, and fails on command
#[derive(Default)]
pub struct MockProvider {
    inner: Mutex<Inner>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call targeting `name` fails permanently
    pub fn fail_permanently(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .insert(name.to_string(), Failure::Permanent);
    }

    /// The next `times` calls targeting `name` fail with a transient error
    pub fn fail_transiently(&self, name: &str, times: u32) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .insert(name.to_string(), Failure::Transient(times));
    }

    /// Calls made so far as (operation, logical name) pairs
    pub fn calls(&self) -> Vec<(&'static str, String)> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn provider_id_of(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .resources
            .iter()
            .find(|(_, r)| r.logical.name == name)
            .map(|(id, _)| id.clone())
    }

    pub fn live_attrs(&self, provider_id: &str) -> Option<AttributeMap> {
        self.inner
            .lock()
            .unwrap()
            .resources
            .get(provider_id)
            .map(|r| r.attrs.clone())
    }

    /// Simulate an out-of-band deletion
    pub fn remove_externally(&self, provider_id: &str) {
        self.inner.lock().unwrap().resources.remove(provider_id);
    }

    /// Simulate an out-of-band attribute change
    pub fn mutate_externally(&self, provider_id: &str, key: &str, value: serde_json::Value) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(remote) = inner.resources.get_mut(provider_id) {
            remote.attrs.insert(key.to_string(), value);
        }
    }

    fn scripted_failure(inner: &mut Inner, name: &str) -> Option<ProviderError> {
        match inner.failures.get_mut(name) {
            Some(Failure::Permanent) => Some(ProviderError::Permanent(format!(
                "scripted permanent failure for {}",
                name
            ))),
            Some(Failure::Transient(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(ProviderError::Transient(format!(
                    "scripted transient failure for {}",
                    name
                )))
            }
            _ => None,
        }
    }

    fn logical_name(inner: &Inner, provider_id: &str) -> Option<String> {
        inner
            .resources
            .get(provider_id)
            .map(|r| r.logical.name.clone())
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn create(&self, id: &ResourceId, attrs: &AttributeMap) -> Result<String, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(("create", id.name.clone()));

        if let Some(err) = Self::scripted_failure(&mut inner, &id.name) {
            return Err(err);
        }

        inner.counter += 1;
        let provider_id = format!("{}-{}", id.kind, inner.counter);
        inner.resources.insert(
            provider_id.clone(),
            Remote {
                logical: id.clone(),
                attrs: attrs.clone(),
            },
        );
        Ok(provider_id)
    }

    async fn update(&self, provider_id: &str, attrs: &AttributeMap) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        let name = match Self::logical_name(&inner, provider_id) {
            Some(name) => name,
            None => return Err(ProviderError::NotFound),
        };
        inner.calls.push(("update", name.clone()));

        if let Some(err) = Self::scripted_failure(&mut inner, &name) {
            return Err(err);
        }

        inner.resources.get_mut(provider_id).unwrap().attrs = attrs.clone();
        Ok(())
    }

    async fn delete(&self, provider_id: &str) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        let name = match Self::logical_name(&inner, provider_id) {
            Some(name) => name,
            None => return Err(ProviderError::NotFound),
        };
        inner.calls.push(("delete", name.clone()));

        if let Some(err) = Self::scripted_failure(&mut inner, &name) {
            return Err(err);
        }

        inner.resources.remove(provider_id);
        Ok(())
    }

    async fn read(&self, provider_id: &str) -> Result<AttributeMap, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        let name = Self::logical_name(&inner, provider_id);
        inner.calls.push((
            "read",
            name.clone().unwrap_or_else(|| provider_id.to_string()),
        ));

        match name {
            Some(name) => {
                if let Some(err) = Self::scripted_failure(&mut inner, &name) {
                    return Err(err);
                }
                Ok(inner.resources.get(provider_id).unwrap().attrs.clone())
            }
            None => Err(ProviderError::NotFound),
        }
    }
}
