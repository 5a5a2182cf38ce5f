//! Process-wide owner of the cache and model managers.

use std::sync::Arc;
use strata_cache::CacheManager;
use strata_models::{BuilderRegistry, ModelManager};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StrataConfig;
use crate::error::Result;

/// Constructs both managers once and runs their background loops.
///
/// Consumers receive the managers through [`Engine::cache`] and
/// [`Engine::models`]; nothing is reachable through global state.
#[derive(Debug)]
pub struct Engine {
    config: StrataConfig,
    cache: Arc<CacheManager>,
    models: Arc<ModelManager>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build the managers from `config` and start the expiry sweeper and
    /// idle reclaimer.
    ///
    /// The remote cache tier is connected when enabled; if it is unreachable
    /// the engine starts without it.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub async fn start(config: StrataConfig, builders: BuilderRegistry) -> Result<Self> {
        config.validate()?;
        let cache = CacheManager::connect(config.cache.clone()).await?;
        let models = ModelManager::new(config.models.clone(), builders)?;
        Ok(Self::from_parts(config, cache, models))
    }

    /// Start the background loops over already-constructed managers.
    pub fn from_parts(config: StrataConfig, cache: CacheManager, models: ModelManager) -> Self {
        let cache = Arc::new(cache);
        let models = Arc::new(models);
        let shutdown = CancellationToken::new();

        let tasks = vec![
            cache.spawn_sweeper(shutdown.child_token()),
            models.spawn_reclaimer(shutdown.child_token()),
        ];

        info!(
            remote = cache.remote_enabled(),
            disk = cache.disk_enabled(),
            "Strata engine started"
        );

        Self { config, cache, models, shutdown, tasks }
    }

    /// The resolved configuration.
    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// Shared cache manager.
    pub fn cache(&self) -> Arc<CacheManager> {
        Arc::clone(&self.cache)
    }

    /// Shared model manager.
    pub fn models(&self) -> Arc<ModelManager> {
        Arc::clone(&self.models)
    }

    /// Stop the background loops and unload every resource.
    ///
    /// Returns the number of resources unloaded.
    pub async fn shutdown(self) -> usize {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let unloaded = self.models.unload_all().await;
        info!(unloaded, "Strata engine stopped");
        unloaded
    }
}
