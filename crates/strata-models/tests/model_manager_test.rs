//! Integration tests for concurrent loads, failure propagation and reclamation.

use async_trait::async_trait;
use serde_json::json;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_abstraction::{downcast_ref, Resource, ResourceBuilder, ResourceConfig, ResourceError};
use strata_models::{
    BlockingBuilder, BuilderRegistry, ModelManager, ModelManagerConfig, ModelManagerError, SlotStatus,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Detector {
    threshold: f64,
}

impl Resource for Detector {
    fn size_bytes_estimate(&self) -> u64 {
        4096
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builder that sleeps, counts invocations, and fails while `failing` is set.
#[derive(Default)]
struct SlowBuilder {
    calls: AtomicU64,
    failing: AtomicBool,
    delay: Duration,
}

#[async_trait]
impl ResourceBuilder for SlowBuilder {
    async fn build(&self, name: &str, _config: &ResourceConfig) -> Result<Arc<dyn Resource>, ResourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(ResourceError::BuildFailed(format!("{name}: weights file not found")));
        }
        Ok(Arc::new(Detector { threshold: 0.5 }))
    }
}

fn manager_for(kind: &str, builder: Arc<dyn ResourceBuilder>) -> Arc<ModelManager> {
    let registry = BuilderRegistry::new().with(kind, builder);
    Arc::new(ModelManager::new(ModelManagerConfig::default(), registry).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_construct_once() {
    let builder = Arc::new(SlowBuilder { delay: Duration::from_millis(200), ..SlowBuilder::default() });
    let manager = manager_for("x", builder.clone());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.load("x", ResourceConfig::new()).await })
        })
        .collect();

    let instances: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
    assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    assert_eq!(manager.status("x").unwrap().use_count, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_reaches_every_waiter_then_retries() {
    let builder = Arc::new(SlowBuilder { delay: Duration::from_millis(200), ..SlowBuilder::default() });
    builder.failing.store(true, Ordering::SeqCst);
    let manager = manager_for("x", builder.clone());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.load("x", ResourceConfig::new()).await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Err(ModelManagerError::LoadFailed { name, message }) => {
                assert_eq!(name, "x");
                assert!(message.contains("weights file not found"));
            }
            other => panic!("expected LoadFailed, got {:?}", other.map(|_| ())),
        }
    }
    assert_eq!(builder.calls.load(Ordering::SeqCst), 1);

    let record = manager.status("x").unwrap();
    assert_eq!(record.status, SlotStatus::Error);
    assert!(record.error_message.unwrap().contains("weights file not found"));

    // A later load retries rather than replaying the stored error.
    builder.failing.store(false, Ordering::SeqCst);
    manager.load("x", ResourceConfig::new()).await.unwrap();
    assert_eq!(builder.calls.load(Ordering::SeqCst), 2);
    assert!(manager.status("x").unwrap().loaded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_builder_fails_every_waiter_once() {
    struct PanickingBuilder {
        calls: AtomicU64,
    }

    #[async_trait]
    impl ResourceBuilder for PanickingBuilder {
        async fn build(&self, _name: &str, _config: &ResourceConfig) -> Result<Arc<dyn Resource>, ResourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            panic!("corrupt weights header");
        }
    }

    let builder = Arc::new(PanickingBuilder { calls: AtomicU64::new(0) });
    let manager = manager_for("x", builder.clone());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.load("x", ResourceConfig::new()).await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Err(ModelManagerError::LoadFailed { name, message }) => {
                assert_eq!(name, "x");
                assert!(message.contains("panicked"));
            }
            other => panic!("expected LoadFailed, got {:?}", other.map(|_| ())),
        }
    }
    assert_eq!(builder.calls.load(Ordering::SeqCst), 1);

    let record = manager.status("x").unwrap();
    assert_eq!(record.status, SlotStatus::Error);
    assert!(!record.loaded);
}

#[tokio::test(start_paused = true)]
async fn test_different_names_load_in_parallel() {
    let builder = Arc::new(SlowBuilder { delay: Duration::from_secs(1), ..SlowBuilder::default() });
    let registry = BuilderRegistry::new().with("detector", builder.clone());
    let manager = ModelManager::new(ModelManagerConfig::default(), registry).unwrap();

    let mut config = ResourceConfig::new();
    config.insert("kind".to_string(), json!("detector"));

    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(manager.load("a", config.clone()), manager.load("b", config));
    a.unwrap();
    b.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(builder.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_resource_is_reclaimed() {
    let builder = Arc::new(SlowBuilder::default());
    let registry = BuilderRegistry::new().with("x", builder);
    let config = ModelManagerConfig { cleanup_interval_secs: 10, idle_ttl_secs: 30, ..ModelManagerConfig::default() };
    let manager = Arc::new(ModelManager::new(config, registry).unwrap());

    let weak = Arc::downgrade(&manager.load("x", ResourceConfig::new()).await.unwrap());
    assert!(weak.upgrade().is_some());

    let token = CancellationToken::new();
    let handle = manager.spawn_reclaimer(token.clone());

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(manager.status("x").unwrap().loaded);

    tokio::time::sleep(Duration::from_secs(16)).await;
    let record = manager.status("x").unwrap();
    assert_eq!(record.status, SlotStatus::Unloaded);
    assert!(!record.loaded);
    assert!(weak.upgrade().is_none());

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_ocr_loaded_once_and_counted() {
    let registry = BuilderRegistry::new().with(
        "ocr",
        Arc::new(BlockingBuilder::new(|_: &str, config: &ResourceConfig| {
            let threshold = config
                .get("threshold")
                .and_then(serde_json::Value::as_f64)
                .ok_or_else(|| ResourceError::InvalidConfig("threshold is required".to_string()))?;
            Ok(Arc::new(Detector { threshold }) as Arc<dyn Resource>)
        })),
    );
    let manager = ModelManager::new(ModelManagerConfig::default(), registry).unwrap();

    let mut config = ResourceConfig::new();
    config.insert("threshold".to_string(), json!(0.8));

    let first = manager.load("ocr", config.clone()).await.unwrap();
    let second = manager.load("ocr", config).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(downcast_ref::<Detector>(first.as_ref()).unwrap().threshold, 0.8);

    let record = manager.status("ocr").unwrap();
    assert!(record.loaded);
    assert_eq!(record.use_count, 2);
    assert_eq!(record.kind, "ocr");
    assert_eq!(record.size_bytes_estimate, 4096);
}

#[tokio::test]
async fn test_invalid_config_surfaces_builder_message() {
    let registry = BuilderRegistry::new().with(
        "ocr",
        Arc::new(BlockingBuilder::new(|_: &str, _: &ResourceConfig| {
            Err(ResourceError::InvalidConfig("threshold is required".to_string()))
        })),
    );
    let manager = ModelManager::new(ModelManagerConfig::default(), registry).unwrap();

    let err = manager.load("ocr", ResourceConfig::new()).await.err().unwrap();
    assert!(err.to_string().contains("threshold is required"));
    assert_eq!(manager.health().errored, vec!["ocr".to_string()]);
    assert!(!manager.health().healthy);
}

struct Leaky;

#[async_trait]
impl Resource for Leaky {
    async fn cleanup(&self) -> Result<(), ResourceError> {
        Err(ResourceError::CleanupFailed("device busy".to_string()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[tokio::test]
async fn test_cleanup_failure_moves_slot_to_error() {
    let registry = BuilderRegistry::new().with(
        "gpu",
        Arc::new(BlockingBuilder::new(|_: &str, _: &ResourceConfig| Ok(Arc::new(Leaky) as Arc<dyn Resource>))),
    );
    let manager = ModelManager::new(ModelManagerConfig::default(), registry).unwrap();

    let weak = Arc::downgrade(&manager.load("gpu", ResourceConfig::new()).await.unwrap());

    let err = manager.unload("gpu").await.err().unwrap();
    assert!(matches!(err, ModelManagerError::UnloadFailed { ref message, .. } if message.contains("device busy")));

    let record = manager.status("gpu").unwrap();
    assert_eq!(record.status, SlotStatus::Error);
    assert!(!record.loaded);
    // The reference is released even though cleanup failed.
    assert!(weak.upgrade().is_none());

    manager.load("gpu", ResourceConfig::new()).await.unwrap();
    assert!(manager.status("gpu").unwrap().loaded);
}

#[tokio::test]
async fn test_status_does_not_wait_for_inflight_load() {
    struct GatedBuilder {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ResourceBuilder for GatedBuilder {
        async fn build(&self, _name: &str, _config: &ResourceConfig) -> Result<Arc<dyn Resource>, ResourceError> {
            self.gate.notified().await;
            Ok(Arc::new(Detector { threshold: 0.1 }))
        }
    }

    let gate = Arc::new(Notify::new());
    let manager = manager_for("slow", Arc::new(GatedBuilder { gate: Arc::clone(&gate) }));

    let loader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.load("slow", ResourceConfig::new()).await })
    };

    while manager.status("slow").map(|r| r.status) != Some(SlotStatus::Loading) {
        tokio::task::yield_now().await;
    }
    assert_eq!(manager.statuses()["slow"].status, SlotStatus::Loading);
    assert!(!manager.status("slow").unwrap().loaded);

    gate.notify_one();
    loader.await.unwrap().unwrap();
    assert!(manager.status("slow").unwrap().loaded);
}
