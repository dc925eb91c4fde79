//! Watcher registry.
//!
//! Owns every [`ThreadWatcher`] keyed by instance id. The monitor loop only
//! keeps [`WatcherHandle`]s and resolves them again on every use, so a
//! watcher removed by `unregister` simply stops resolving. Map shards are
//! locked only while an entry is looked up, inserted or removed; watchers are
//! cloned out before any work is done on them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::scheduler::TaskScheduler;
use super::types::{InstanceId, ThreadRole, WatchTarget};
use super::watcher::ThreadWatcher;
use crate::core::config::WatchdogConfig;

/// Key the monitor loop uses to find a watcher again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherHandle {
    pub target: WatchTarget,
    pub generation: u64,
}

/// Watchers of one instance
#[derive(Debug)]
pub(crate) struct InstanceEntry {
    ui: Arc<ThreadWatcher>,
    script: Option<Arc<ThreadWatcher>>,
}

impl InstanceEntry {
    fn watcher_for(&self, role: ThreadRole) -> Option<&Arc<ThreadWatcher>> {
        match role {
            ThreadRole::Ui => Some(&self.ui),
            ThreadRole::Script => self.script.as_ref(),
        }
    }

    fn all(&self) -> Vec<Arc<ThreadWatcher>> {
        let mut watchers = vec![Arc::clone(&self.ui)];
        if let Some(script) = &self.script {
            watchers.push(Arc::clone(script));
        }
        watchers
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: DashMap<InstanceId, InstanceEntry>,
    next_generation: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create watchers for `instance`. Returns `None` if it is already registered.
    pub fn insert(
        &self,
        instance: InstanceId,
        scheduler: Weak<dyn TaskScheduler>,
        shares_ui_and_script_thread: bool,
        config: &Arc<WatchdogConfig>,
    ) -> Option<Vec<WatcherHandle>> {
        match self.entries.entry(instance) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let make = |role| {
                    Arc::new(ThreadWatcher::new(
                        WatchTarget::new(instance, role),
                        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1,
                        Arc::clone(config),
                        scheduler.clone(),
                    ))
                };

                let ui = make(ThreadRole::Ui);
                let script = (!shares_ui_and_script_thread).then(|| make(ThreadRole::Script));
                let entry = InstanceEntry { ui, script };
                let handles = entry
                    .all()
                    .iter()
                    .map(|watcher| WatcherHandle {
                        target: watcher.target(),
                        generation: watcher.generation(),
                    })
                    .collect();

                slot.insert(entry);
                Some(handles)
            }
        }
    }

    /// Remove `instance`, returning whether it was present
    pub fn remove(&self, instance: InstanceId) -> bool {
        self.entries.remove(&instance).is_some()
    }

    pub fn contains(&self, instance: InstanceId) -> bool {
        self.entries.contains_key(&instance)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Find the watcher behind `handle`, if it is still the registered one
    pub fn resolve(&self, handle: WatcherHandle) -> Option<Arc<ThreadWatcher>> {
        let watcher = self
            .entries
            .get(&handle.target.instance)
            .and_then(|entry| entry.watcher_for(handle.target.role).cloned())?;

        (watcher.generation() == handle.generation).then_some(watcher)
    }

    pub fn watcher(&self, instance: InstanceId, role: ThreadRole) -> Option<Arc<ThreadWatcher>> {
        self.entries
            .get(&instance)
            .and_then(|entry| entry.watcher_for(role).cloned())
    }

    /// Handles of the watchers currently registered for `instance`
    pub fn handles(&self, instance: InstanceId) -> Vec<WatcherHandle> {
        self.watchers(instance)
            .iter()
            .map(|watcher| WatcherHandle {
                target: watcher.target(),
                generation: watcher.generation(),
            })
            .collect()
    }

    /// Every active watcher of `instance`
    pub fn watchers(&self, instance: InstanceId) -> Vec<Arc<ThreadWatcher>> {
        self.entries
            .get(&instance)
            .map(|entry| entry.all())
            .unwrap_or_default()
    }
}
