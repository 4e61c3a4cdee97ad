//! Extension registry.
//!
//! Extensions are named async capabilities invoked with caller options and
//! the SDK handle they run against.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::app::Cloudbase;
use crate::error::{SdkError, SdkResult};

/// A named capability registered on the SDK.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Unique name used for lookup.
    fn name(&self) -> &str;

    async fn invoke(&self, options: Value, sdk: &Cloudbase) -> SdkResult<Value>;
}

/// Keyed registry of extensions. Registering a name again replaces the entry.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<HashMap<String, Arc<dyn Extension>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, extension: Arc<dyn Extension>) {
        let name = extension.name().to_string();
        tracing::debug!(extension = %name, "extension registered");
        self.extensions.write().insert(name, extension);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.extensions.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extensions.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.extensions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.read().is_empty()
    }

    /// Invoke a registered extension.
    pub async fn invoke(&self, name: &str, options: Value, sdk: &Cloudbase) -> SdkResult<Value> {
        let extension = self.get(name).ok_or_else(|| {
            SdkError::invalid_params(format!("extension:{name} must be registered before invoke"))
        })?;
        extension.invoke(options, sdk).await
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.extensions.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &names)
            .finish()
    }
}
