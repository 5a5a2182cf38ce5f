//! Kind-tag to builder dispatch.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use strata_abstraction::{Resource, ResourceBuilder, ResourceConfig, ResourceError};

/// Config key naming the builder kind for a resource.
pub const KIND_KEY: &str = "kind";

/// Registry of resource builders keyed by kind tag.
///
/// Populated once at startup and handed to the [`ModelManager`](crate::ModelManager).
#[derive(Clone, Default)]
pub struct BuilderRegistry {
    builders: HashMap<String, Arc<dyn ResourceBuilder>>,
}

impl BuilderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: impl Into<String>, builder: Arc<dyn ResourceBuilder>) {
        self.builders.insert(kind.into(), builder);
    }

    /// Chaining form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, kind: impl Into<String>, builder: Arc<dyn ResourceBuilder>) -> Self {
        self.register(kind, builder);
        self
    }

    /// Look up the builder for `kind`.
    #[must_use]
    pub fn resolve(&self, kind: &str) -> Option<Arc<dyn ResourceBuilder>> {
        self.builders.get(kind).cloned()
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.builders.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// The kind a `load(name, config)` call dispatches on.
    ///
    /// `config["kind"]` when it is a string, otherwise the name itself.
    #[must_use]
    pub fn kind_for(name: &str, config: &ResourceConfig) -> String {
        config
            .get(KIND_KEY)
            .and_then(serde_json::Value::as_str)
            .unwrap_or(name)
            .to_string()
    }
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderRegistry").field("kinds", &self.kinds()).finish()
    }
}

/// Adapts a synchronous construction function to [`ResourceBuilder`].
///
/// The function runs on tokio's blocking pool so file loads and other heavy
/// work never stall the executor.
pub struct BlockingBuilder<F> {
    build: Arc<F>,
}

impl<F> BlockingBuilder<F>
where
    F: Fn(&str, &ResourceConfig) -> Result<Arc<dyn Resource>, ResourceError> + Send + Sync + 'static,
{
    /// Wrap `build`.
    pub fn new(build: F) -> Self {
        Self { build: Arc::new(build) }
    }
}

#[async_trait]
impl<F> ResourceBuilder for BlockingBuilder<F>
where
    F: Fn(&str, &ResourceConfig) -> Result<Arc<dyn Resource>, ResourceError> + Send + Sync + 'static,
{
    async fn build(&self, name: &str, config: &ResourceConfig) -> Result<Arc<dyn Resource>, ResourceError> {
        let build = Arc::clone(&self.build);
        let name = name.to_string();
        let config = config.clone();
        tokio::task::spawn_blocking(move || build(&name, &config))
            .await
            .map_err(|e| ResourceError::BuildFailed(format!("builder task aborted: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::any::Any;

    struct Marker;

    impl Resource for Marker {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn marker_builder() -> Arc<dyn ResourceBuilder> {
        Arc::new(BlockingBuilder::new(|_: &str, _: &ResourceConfig| {
            Ok(Arc::new(Marker) as Arc<dyn Resource>)
        }))
    }

    #[test]
    fn test_kind_for() {
        let mut config = ResourceConfig::new();
        assert_eq!(BuilderRegistry::kind_for("ocr", &config), "ocr");

        config.insert(KIND_KEY.to_string(), json!("tesseract"));
        assert_eq!(BuilderRegistry::kind_for("ocr", &config), "tesseract");

        config.insert(KIND_KEY.to_string(), json!(7));
        assert_eq!(BuilderRegistry::kind_for("ocr", &config), "ocr");
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = BuilderRegistry::new()
            .with("ocr", marker_builder())
            .with("asr", marker_builder());

        assert!(registry.resolve("ocr").is_some());
        assert!(registry.resolve("vision").is_none());
        assert_eq!(registry.kinds(), vec!["asr".to_string(), "ocr".to_string()]);
    }

    #[tokio::test]
    async fn test_blocking_builder_runs_closure() {
        let builder = BlockingBuilder::new(|name: &str, config: &ResourceConfig| {
            if config.contains_key("fail") {
                return Err(ResourceError::BuildFailed(format!("{name} refused")));
            }
            Ok(Arc::new(Marker) as Arc<dyn Resource>)
        });

        let ok = builder.build("ocr", &ResourceConfig::new()).await.unwrap();
        assert!(strata_abstraction::downcast_ref::<Marker>(ok.as_ref()).is_some());

        let mut config = ResourceConfig::new();
        config.insert("fail".to_string(), json!(true));
        let err = builder.build("ocr", &config).await.err().unwrap();
        assert_eq!(err, ResourceError::BuildFailed("ocr refused".to_string()));
    }
}
