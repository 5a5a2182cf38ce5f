//! Resource slot bookkeeping.
//!
//! One [`ResourceSlot`] exists per resource name. The slot owns the loaded
//! instance; `instance` is `Some` exactly when `status == Loaded`. The
//! [`SlotRegistry`] guards the slot table with a single lock that is only
//! held for in-memory bookkeeping, never across construction or cleanup.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use strata_abstraction::{Resource, ResourceConfig};
use tokio::time::Instant;

/// Lifecycle state of a slot.
///
/// `Unloaded -> Loading -> {Loaded, Error}`, `Loaded -> Unloading -> {Unloaded, Error}`.
/// A load from `Error` re-enters `Loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// No instance held.
    Unloaded,
    /// Construction in progress.
    Loading,
    /// Instance held and ready.
    Loaded,
    /// The last load or unload failed.
    Error,
    /// Cleanup in progress.
    Unloading,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Error => "error",
            Self::Unloading => "unloading",
        };
        f.write_str(s)
    }
}

/// Bookkeeping for one named resource.
pub struct ResourceSlot {
    /// Unique resource name.
    pub name: String,
    /// Kind tag used to pick the builder.
    pub kind: String,
    /// Construction parameters from the most recent load.
    pub config: ResourceConfig,
    /// Current lifecycle state.
    pub status: SlotStatus,
    instance: Option<Arc<dyn Resource>>,
    /// Time the last successful construction took.
    pub load_duration: Option<Duration>,
    /// Monotonic time of last use.
    pub last_used: Instant,
    /// Wall-clock time of last use, for reporting.
    pub last_used_at: DateTime<Utc>,
    /// Footprint reported by the instance at load time.
    pub size_bytes_estimate: u64,
    /// Message from the last failure, if the slot is in `Error`.
    pub error_message: Option<String>,
    /// Number of successful `load` calls served by this slot.
    pub use_count: u64,
    /// Incremented each time a construction starts.
    pub(crate) attempt: u64,
}

impl ResourceSlot {
    fn new(name: &str, kind: &str, config: ResourceConfig) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            config,
            status: SlotStatus::Unloaded,
            instance: None,
            load_duration: None,
            last_used: Instant::now(),
            last_used_at: Utc::now(),
            size_bytes_estimate: 0,
            error_message: None,
            use_count: 0,
            attempt: 0,
        }
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
        self.last_used_at = Utc::now();
        self.use_count += 1;
    }

    fn record(&self) -> StatusRecord {
        StatusRecord {
            name: self.name.clone(),
            kind: self.kind.clone(),
            status: self.status,
            loaded: self.status == SlotStatus::Loaded,
            load_duration_secs: self.load_duration.map(|d| d.as_secs_f64()),
            last_used_at: self.last_used_at,
            size_bytes_estimate: self.size_bytes_estimate,
            use_count: self.use_count,
            error_message: self.error_message.clone(),
        }
    }
}

impl fmt::Debug for ResourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSlot")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("has_instance", &self.instance.is_some())
            .field("use_count", &self.use_count)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Read-only snapshot of a slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub name: String,
    pub kind: String,
    pub status: SlotStatus,
    pub loaded: bool,
    pub load_duration_secs: Option<f64>,
    pub last_used_at: DateTime<Utc>,
    pub size_bytes_estimate: u64,
    pub use_count: u64,
    pub error_message: Option<String>,
}

/// Slot state observed before waiting on a name's construction lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Observation {
    pub status: SlotStatus,
    pub attempt: u64,
}

/// Thread-safe table of resource slots.
#[derive(Debug, Default)]
pub struct SlotRegistry {
    slots: RwLock<HashMap<String, ResourceSlot>>,
}

impl SlotRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ResourceSlot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ResourceSlot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn observe(&self, name: &str) -> Option<Observation> {
        self.read().get(name).map(|slot| Observation {
            status: slot.status,
            attempt: slot.attempt,
        })
    }

    /// Return the loaded instance for `name`, recording the use.
    pub fn acquire(&self, name: &str) -> Option<Arc<dyn Resource>> {
        let mut slots = self.write();
        let slot = slots.get_mut(name)?;
        if slot.status != SlotStatus::Loaded {
            return None;
        }
        slot.touch();
        slot.instance.clone()
    }

    /// Error message of a failed slot whose attempt is newer than `seen`.
    pub(crate) fn failure_since(&self, name: &str, seen: u64) -> Option<String> {
        let slots = self.read();
        let slot = slots.get(name)?;
        (slot.status == SlotStatus::Error && slot.attempt > seen)
            .then(|| slot.error_message.clone().unwrap_or_default())
    }

    /// Move `name` into `Loading`, creating the slot if needed.
    pub(crate) fn begin_load(&self, name: &str, kind: &str, config: ResourceConfig) -> u64 {
        let mut slots = self.write();
        let slot = slots
            .entry(name.to_string())
            .or_insert_with(|| ResourceSlot::new(name, kind, ResourceConfig::new()));
        slot.kind = kind.to_string();
        slot.config = config;
        slot.status = SlotStatus::Loading;
        slot.instance = None;
        slot.error_message = None;
        slot.attempt += 1;
        slot.attempt
    }

    pub(crate) fn complete_load(&self, name: &str, instance: Arc<dyn Resource>, duration: Duration) {
        let mut slots = self.write();
        if let Some(slot) = slots.get_mut(name) {
            slot.size_bytes_estimate = instance.size_bytes_estimate();
            slot.instance = Some(instance);
            slot.status = SlotStatus::Loaded;
            slot.load_duration = Some(duration);
            slot.touch();
        }
    }

    pub(crate) fn fail_load(&self, name: &str, message: String) {
        let mut slots = self.write();
        if let Some(slot) = slots.get_mut(name) {
            slot.status = SlotStatus::Error;
            slot.instance = None;
            slot.size_bytes_estimate = 0;
            slot.error_message = Some(message);
        }
    }

    /// Move a loaded slot into `Unloading`, handing its instance to the caller.
    pub(crate) fn begin_unload(&self, name: &str) -> Option<Arc<dyn Resource>> {
        let mut slots = self.write();
        let slot = slots.get_mut(name)?;
        if slot.status != SlotStatus::Loaded {
            return None;
        }
        slot.status = SlotStatus::Unloading;
        slot.instance.take()
    }

    pub(crate) fn finish_unload(&self, name: &str) {
        let mut slots = self.write();
        if let Some(slot) = slots.get_mut(name) {
            slot.status = SlotStatus::Unloaded;
            slot.size_bytes_estimate = 0;
        }
    }

    pub(crate) fn fail_unload(&self, name: &str, message: String) {
        let mut slots = self.write();
        if let Some(slot) = slots.get_mut(name) {
            slot.status = SlotStatus::Error;
            slot.size_bytes_estimate = 0;
            slot.error_message = Some(message);
        }
    }

    /// Names of loaded slots unused for longer than `idle_ttl` at `now`.
    pub fn idle_loaded(&self, now: Instant, idle_ttl: Duration) -> Vec<String> {
        self.read()
            .values()
            .filter(|slot| {
                slot.status == SlotStatus::Loaded
                    && now.saturating_duration_since(slot.last_used) > idle_ttl
            })
            .map(|slot| slot.name.clone())
            .collect()
    }

    /// Whether `name` is loaded and unused for longer than `idle_ttl` at `now`.
    pub(crate) fn is_idle(&self, name: &str, now: Instant, idle_ttl: Duration) -> bool {
        self.read().get(name).is_some_and(|slot| {
            slot.status == SlotStatus::Loaded && now.saturating_duration_since(slot.last_used) > idle_ttl
        })
    }

    /// Names of every loaded slot.
    pub fn loaded_names(&self) -> Vec<String> {
        self.read()
            .values()
            .filter(|slot| slot.status == SlotStatus::Loaded)
            .map(|slot| slot.name.clone())
            .collect()
    }

    /// Names of slots in `Error`.
    pub fn errored_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .values()
            .filter(|slot| slot.status == SlotStatus::Error)
            .map(|slot| slot.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Sum of the footprints of loaded slots.
    pub fn total_footprint(&self) -> u64 {
        self.read()
            .values()
            .filter(|slot| slot.status == SlotStatus::Loaded)
            .map(|slot| slot.size_bytes_estimate)
            .sum()
    }

    /// Snapshot of one slot.
    pub fn status(&self, name: &str) -> Option<StatusRecord> {
        self.read().get(name).map(ResourceSlot::record)
    }

    /// Snapshot of every slot, ordered by name.
    pub fn statuses(&self) -> BTreeMap<String, StatusRecord> {
        self.read()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.record()))
            .collect()
    }
}
