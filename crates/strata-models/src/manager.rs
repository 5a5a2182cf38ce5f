//! ModelManager: de-duplicated construction and lifecycle of named resources.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use strata_abstraction::{Resource, ResourceConfig};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::BuilderRegistry;
use crate::config::{ModelConfigError, ModelManagerConfig};
use crate::error::{ModelManagerError, Result};
use crate::slot::{SlotRegistry, SlotStatus, StatusRecord};

/// Source of the current memory usage compared against the budget.
pub trait MemoryProbe: Send + Sync {
    /// Bytes currently in use.
    fn used_bytes(&self, slots: &SlotRegistry) -> u64;
}

/// Reports the summed footprint of loaded resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct FootprintProbe;

impl MemoryProbe for FootprintProbe {
    fn used_bytes(&self, slots: &SlotRegistry) -> u64 {
        slots.total_footprint()
    }
}

/// Summary returned by [`ModelManager::health`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// No slot is in `Error` and usage is within budget.
    pub healthy: bool,
    /// Number of loaded resources.
    pub loaded: usize,
    /// Names of slots in `Error`.
    pub errored: Vec<String>,
    /// Bytes reported by the memory probe.
    pub total_footprint_bytes: u64,
    /// Configured ceiling in bytes.
    pub memory_budget_bytes: u64,
}

/// Owns every heavyweight resource and guarantees at most one construction
/// per name at a time.
///
/// Loads for different names run fully in parallel. A loaded instance is
/// shared by `Arc` with every caller until it is unloaded, either explicitly
/// or by idle reclamation.
pub struct ModelManager {
    config: ModelManagerConfig,
    builders: BuilderRegistry,
    slots: Arc<SlotRegistry>,
    /// Per-name construction locks.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    probe: Arc<dyn MemoryProbe>,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("config", &self.config)
            .field("builders", &self.builders)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    /// Create a manager dispatching construction through `builders`.
    ///
    /// # Errors
    /// Returns `ModelConfigError` if the configuration is invalid.
    pub fn new(config: ModelManagerConfig, builders: BuilderRegistry) -> std::result::Result<Self, ModelConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            builders,
            slots: Arc::new(SlotRegistry::new()),
            locks: Mutex::new(HashMap::new()),
            probe: Arc::new(FootprintProbe),
        })
    }

    /// Replace the memory probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ModelManagerConfig {
        &self.config
    }

    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Drop the construction lock for `name` once nobody else holds it.
    fn release_lock(&self, name: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(name).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(name);
        }
    }

    /// Return the instance registered under `name`, constructing it if needed.
    ///
    /// A loaded instance is returned as-is. Otherwise the caller waits on the
    /// name's construction lock; if the construction it waited on failed, it
    /// receives that failure. A caller arriving after a failure retries.
    ///
    /// # Errors
    /// Returns `UnknownKind` if no builder matches the resource's kind, or
    /// `LoadFailed` carrying the builder's message.
    pub async fn load(&self, name: &str, config: ResourceConfig) -> Result<Arc<dyn Resource>> {
        if let Some(instance) = self.slots.acquire(name) {
            return Ok(instance);
        }

        let kind = BuilderRegistry::kind_for(name, &config);
        let builder = self
            .builders
            .resolve(&kind)
            .ok_or_else(|| ModelManagerError::UnknownKind { name: name.to_string(), kind: kind.clone() })?;

        // A construction already in flight counts as unseen.
        let seen = self.slots.observe(name).map_or(0, |obs| match obs.status {
            SlotStatus::Loading => obs.attempt.saturating_sub(1),
            _ => obs.attempt,
        });

        self.enforce_budget().await;

        let guard = self.lock_for(name).lock_owned().await;

        if let Some(instance) = self.slots.acquire(name) {
            return Ok(instance);
        }
        if let Some(message) = self.slots.failure_since(name, seen) {
            return Err(ModelManagerError::LoadFailed { name: name.to_string(), message });
        }

        let attempt = self.slots.begin_load(name, &kind, config.clone());
        debug!(name = %name, kind = %kind, attempt, "Constructing resource");

        // Construction runs to completion even if this caller goes away.
        let slots = Arc::clone(&self.slots);
        let task_name = name.to_string();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            // Builder panics surface here, while the name lock is still held.
            let build = {
                let name = task_name.clone();
                tokio::spawn(async move { builder.build(&name, &config).await })
            };
            let outcome = match build.await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(join_err) => Err(format!("construction panicked: {join_err}")),
            };
            match outcome {
                Ok(instance) => {
                    let elapsed = started.elapsed();
                    slots.complete_load(&task_name, Arc::clone(&instance), elapsed);
                    info!(
                        name = %task_name,
                        load_ms = elapsed.as_millis(),
                        size_bytes = instance.size_bytes_estimate(),
                        "Resource loaded"
                    );
                    Ok(instance)
                }
                Err(message) => {
                    slots.fail_load(&task_name, message.clone());
                    error!(name = %task_name, error = %message, "Resource construction failed");
                    Err(message)
                }
            }
        });

        match task.await {
            Ok(Ok(instance)) => Ok(instance),
            Ok(Err(message)) => {
                self.release_lock(name);
                Err(ModelManagerError::LoadFailed { name: name.to_string(), message })
            }
            Err(join_err) => Err(ModelManagerError::LoadFailed {
                name: name.to_string(),
                message: format!("construction task aborted: {join_err}"),
            }),
        }
    }

    /// Unload `name`, running its cleanup hook.
    ///
    /// Returns `Ok(false)` if `name` is not loaded.
    ///
    /// # Errors
    /// Returns `UnloadFailed` if the cleanup hook fails. The slot moves to
    /// `Error` and the manager's reference is dropped regardless.
    pub async fn unload(&self, name: &str) -> Result<bool> {
        let outcome = {
            let lock = self.lock_for(name);
            let _guard = lock.lock().await;
            self.unload_locked(name).await
        };
        self.release_lock(name);
        outcome
    }

    async fn unload_locked(&self, name: &str) -> Result<bool> {
        let Some(instance) = self.slots.begin_unload(name) else {
            return Ok(false);
        };

        let outcome = instance.cleanup().await;
        let outstanding = Arc::strong_count(&instance) - 1;
        drop(instance);
        if outstanding > 0 {
            debug!(name = %name, outstanding, "Unloaded resource still referenced by callers");
        }

        match outcome {
            Ok(()) => {
                self.slots.finish_unload(name);
                info!(name = %name, "Resource unloaded");
                Ok(true)
            }
            Err(e) => {
                let message = e.to_string();
                self.slots.fail_unload(name, message.clone());
                error!(name = %name, error = %message, "Resource cleanup failed");
                Err(ModelManagerError::UnloadFailed { name: name.to_string(), message })
            }
        }
    }

    /// Unload every loaded resource idle for longer than the idle TTL.
    ///
    /// Slots whose lock is held by an in-flight operation are skipped.
    /// Returns the number unloaded.
    pub async fn cleanup_idle(&self) -> usize {
        let idle_ttl = self.config.idle_ttl();
        let now = Instant::now();
        let mut unloaded = 0;

        for name in self.slots.idle_loaded(now, idle_ttl) {
            let lock = self.lock_for(&name);
            let Ok(guard) = lock.try_lock() else {
                debug!(name = %name, "Skipping busy resource during idle cleanup");
                continue;
            };
            if self.slots.is_idle(&name, now, idle_ttl) && matches!(self.unload_locked(&name).await, Ok(true)) {
                unloaded += 1;
            }
            drop(guard);
            drop(lock);
            self.release_lock(&name);
        }

        if unloaded > 0 {
            info!(unloaded, "Idle resources reclaimed");
        }
        unloaded
    }

    async fn enforce_budget(&self) {
        let budget = self.config.max_memory_bytes();
        let used = self.probe.used_bytes(&self.slots);
        if used <= budget {
            return;
        }

        warn!(used_bytes = used, budget_bytes = budget, "Memory over budget, reclaiming idle resources");
        self.cleanup_idle().await;

        let after = self.probe.used_bytes(&self.slots);
        if after > budget {
            warn!(used_bytes = after, budget_bytes = budget, "Still over budget, proceeding with load");
        }
    }

    /// Unload every loaded resource. Returns the number unloaded.
    pub async fn unload_all(&self) -> usize {
        let mut unloaded = 0;
        for name in self.slots.loaded_names() {
            if let Ok(true) = self.unload(&name).await {
                unloaded += 1;
            }
        }
        unloaded
    }

    /// Snapshot of one slot.
    pub fn status(&self, name: &str) -> Option<StatusRecord> {
        self.slots.status(name)
    }

    /// Snapshot of every slot, ordered by name.
    pub fn statuses(&self) -> BTreeMap<String, StatusRecord> {
        self.slots.statuses()
    }

    /// Summarize the manager's state.
    pub fn health(&self) -> HealthReport {
        let errored = self.slots.errored_names();
        let total_footprint_bytes = self.probe.used_bytes(&self.slots);
        let memory_budget_bytes = self.config.max_memory_bytes();
        HealthReport {
            healthy: errored.is_empty() && total_footprint_bytes <= memory_budget_bytes,
            loaded: self.slots.loaded_names().len(),
            errored,
            total_footprint_bytes,
            memory_budget_bytes,
        }
    }

    /// Spawn the idle reclamation loop.
    ///
    /// Runs [`cleanup_idle`](Self::cleanup_idle) every `cleanup_interval_secs`
    /// until `token` is cancelled.
    pub fn spawn_reclaimer(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = self.config.cleanup_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!("Idle reclaimer stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        manager.cleanup_idle().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BlockingBuilder;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use strata_abstraction::{ResourceBuilder, ResourceError};

    struct Weights {
        bytes: u64,
    }

    impl Resource for Weights {
        fn size_bytes_estimate(&self) -> u64 {
            self.bytes
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct CountingBuilder {
        calls: AtomicU64,
        bytes: u64,
    }

    #[async_trait]
    impl ResourceBuilder for CountingBuilder {
        async fn build(&self, _name: &str, _config: &ResourceConfig) -> std::result::Result<Arc<dyn Resource>, ResourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Weights { bytes: self.bytes }))
        }
    }

    fn manager_with(config: ModelManagerConfig, bytes: u64) -> (ModelManager, Arc<CountingBuilder>) {
        let builder = Arc::new(CountingBuilder { calls: AtomicU64::new(0), bytes });
        let registry = BuilderRegistry::new().with("weights", builder.clone());
        (ModelManager::new(config, registry).unwrap(), builder)
    }

    fn weights_config() -> ResourceConfig {
        let mut config = ResourceConfig::new();
        config.insert("kind".to_string(), serde_json::json!("weights"));
        config
    }

    #[tokio::test]
    async fn test_load_returns_cached_instance() {
        let (manager, builder) = manager_with(ModelManagerConfig::default(), 10);

        let first = manager.load("a", weights_config()).await.unwrap();
        let second = manager.load("a", weights_config()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status("a").unwrap().use_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_kind_creates_no_slot() {
        let (manager, _) = manager_with(ModelManagerConfig::default(), 10);

        let err = manager.load("vision", ResourceConfig::new()).await.err().unwrap();
        assert_eq!(
            err,
            ModelManagerError::UnknownKind { name: "vision".to_string(), kind: "vision".to_string() }
        );
        assert!(manager.status("vision").is_none());
    }

    #[tokio::test]
    async fn test_construction_locks_pruned_after_unload() {
        let (manager, _) = manager_with(ModelManagerConfig::default(), 10);

        for name in ["a", "b", "c"] {
            manager.load(name, weights_config()).await.unwrap();
        }
        assert_eq!(manager.locks.lock().unwrap().len(), 3);

        assert_eq!(manager.unload_all().await, 3);
        assert!(manager.locks.lock().unwrap().is_empty());

        // Unknown names and failed loads leave nothing behind either.
        assert_eq!(manager.unload("never-loaded").await, Ok(false));
        assert!(manager.locks.lock().unwrap().is_empty());

        let failing = BuilderRegistry::new().with(
            "broken",
            Arc::new(BlockingBuilder::new(|_: &str, _: &ResourceConfig| {
                Err(ResourceError::BuildFailed("no weights".to_string()))
            })),
        );
        let broken = ModelManager::new(ModelManagerConfig::default(), failing).unwrap();
        assert!(broken.load("broken", ResourceConfig::new()).await.is_err());
        assert!(broken.locks.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_cleanup_prunes_construction_locks() {
        let config = ModelManagerConfig { idle_ttl_secs: 30, ..ModelManagerConfig::default() };
        let (manager, _) = manager_with(config, 10);
        manager.load("a", weights_config()).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(manager.cleanup_idle().await, 1);
        assert!(manager.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unload_missing_is_noop() {
        let (manager, _) = manager_with(ModelManagerConfig::default(), 10);
        assert_eq!(manager.unload("nothing").await, Ok(false));
    }

    #[tokio::test]
    async fn test_unload_then_reload_constructs_again() {
        let (manager, builder) = manager_with(ModelManagerConfig::default(), 10);

        manager.load("a", weights_config()).await.unwrap();
        assert_eq!(manager.unload("a").await, Ok(true));
        assert_eq!(manager.status("a").unwrap().status, SlotStatus::Unloaded);

        manager.load("a", weights_config()).await.unwrap();
        assert_eq!(builder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_budget_load_reclaims_idle() {
        // 1 MiB budget, each resource reports 768 KiB.
        let config = ModelManagerConfig { max_memory_mb: 1, idle_ttl_secs: 60, ..ModelManagerConfig::default() };
        let (manager, _) = manager_with(config, 768 * 1024);

        manager.load("a", weights_config()).await.unwrap();
        manager.load("b", weights_config()).await.unwrap();
        assert!(!manager.health().healthy);

        tokio::time::advance(Duration::from_secs(61)).await;
        manager.load("c", weights_config()).await.unwrap();

        assert_eq!(manager.status("a").unwrap().status, SlotStatus::Unloaded);
        assert_eq!(manager.status("b").unwrap().status, SlotStatus::Unloaded);
        assert!(manager.status("c").unwrap().loaded);
        assert!(manager.health().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_budget_keeps_idle_loaded() {
        let config = ModelManagerConfig { idle_ttl_secs: 60, ..ModelManagerConfig::default() };
        let (manager, _) = manager_with(config, 1024);

        manager.load("a", weights_config()).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        manager.load("b", weights_config()).await.unwrap();

        assert!(manager.status("a").unwrap().loaded);
    }

    #[tokio::test]
    async fn test_unload_all_and_health() {
        let (manager, _) = manager_with(ModelManagerConfig::default(), 100);
        manager.load("a", weights_config()).await.unwrap();
        manager.load("b", weights_config()).await.unwrap();

        let health = manager.health();
        assert!(health.healthy);
        assert_eq!(health.loaded, 2);
        assert_eq!(health.total_footprint_bytes, 200);

        assert_eq!(manager.unload_all().await, 2);
        assert_eq!(manager.health().loaded, 0);
        assert_eq!(manager.statuses().len(), 2);
    }

    #[tokio::test]
    async fn test_blocking_builder_through_manager() {
        let registry = BuilderRegistry::new().with(
            "ocr",
            Arc::new(BlockingBuilder::new(|_: &str, config: &ResourceConfig| {
                let threshold = config.get("threshold").and_then(serde_json::Value::as_f64).unwrap_or(0.5);
                Ok(Arc::new(Weights { bytes: (threshold * 1000.0) as u64 }) as Arc<dyn Resource>)
            })),
        );
        let manager = ModelManager::new(ModelManagerConfig::default(), registry).unwrap();

        let mut config = ResourceConfig::new();
        config.insert("threshold".to_string(), serde_json::json!(0.8));
        let instance = manager.load("ocr", config).await.unwrap();
        assert_eq!(instance.size_bytes_estimate(), 800);
    }

    struct FixedProbe(u64);

    impl MemoryProbe for FixedProbe {
        fn used_bytes(&self, _slots: &SlotRegistry) -> u64 {
            self.0
        }
    }

    #[tokio::test]
    async fn test_custom_probe_drives_health() {
        let (manager, _) = manager_with(ModelManagerConfig { max_memory_mb: 1, ..ModelManagerConfig::default() }, 1);
        let manager = manager.with_probe(Arc::new(FixedProbe(2 * 1024 * 1024)));

        let health = manager.health();
        assert!(!health.healthy);
        assert_eq!(health.total_footprint_bytes, 2 * 1024 * 1024);
    }
}
