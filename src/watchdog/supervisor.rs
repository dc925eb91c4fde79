//! Watchdog Supervisor Module
//!
//! [`WatchDog`] is the handle the host application talks to. It owns the
//! watcher registry and the dedicated monitor thread. There is no global
//! instance: the composition root creates one and passes it to whatever
//! creates containers, and several watchdogs can run side by side.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::diagnostics::{DiagnosticsSink, NoStackInspector, StackInspector, TracingSink};
use super::gc::{platform_gc_trigger, GarbageCollector, GcTrigger};
use super::monitor::{self, Command, CommandSender, Dispatcher};
use super::registry::Registry;
use super::scheduler::TaskScheduler;
use super::stats::{StatsCollector, WatchdogStats};
use super::types::{InstanceId, ThreadRole};
use super::watcher::WatcherSnapshot;
use crate::core::config::WatchdogConfig;
use crate::core::error::{Result, WatchdogError};

/// Builder for [`WatchDog`]
pub struct WatchDogBuilder {
    config: WatchdogConfig,
    sink: Arc<dyn DiagnosticsSink>,
    inspector: Arc<dyn StackInspector>,
    gc_trigger: Option<Arc<dyn GcTrigger>>,
    collector: Option<Arc<dyn GarbageCollector>>,
}

impl WatchDogBuilder {
    fn new() -> Self {
        Self {
            config: WatchdogConfig::default(),
            sink: Arc::new(TracingSink),
            inspector: Arc::new(NoStackInspector),
            gc_trigger: None,
            collector: None,
        }
    }

    pub fn with_config(mut self, config: WatchdogConfig) -> Self {
        self.config = config;
        self
    }

    /// Where warnings, freezes, recoveries and ANRs go (default: log lines)
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Source of engine stack traces for reports
    pub fn with_stack_inspector(mut self, inspector: Arc<dyn StackInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Callback run when a GC request arrives
    pub fn with_garbage_collector(mut self, collector: Arc<dyn GarbageCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Override the GC request source chosen from `gc_signal`
    pub fn with_gc_trigger(mut self, trigger: Arc<dyn GcTrigger>) -> Self {
        self.gc_trigger = Some(trigger);
        self
    }

    /// Validate the configuration and spawn the monitor thread
    pub fn start(self) -> Result<WatchDog> {
        self.config.validate()?;

        let config = Arc::new(self.config);
        let registry = Arc::new(Registry::new());
        let stats = Arc::new(StatsCollector::new());
        let (commands, receiver) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            self.sink,
            self.inspector,
            Arc::clone(&stats),
            commands.clone(),
        );

        let gc = self.collector.map(|collector| {
            let trigger = self
                .gc_trigger
                .unwrap_or_else(|| platform_gc_trigger(config.gc_signal));
            (trigger, collector)
        });

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .enable_io()
            .build()?;

        let handle = thread::Builder::new()
            .name(config.monitor_thread_name.clone())
            .spawn(move || {
                runtime.block_on(monitor::run(dispatcher, receiver, gc));
            })
            .map_err(|e| WatchdogError::MonitorSpawn(e.to_string()))?;

        tracing::info!(
            thread = %config.monitor_thread_name,
            normal_ms = config.normal_check_period_ms,
            warning_ms = config.warning_check_period_ms,
            freeze_ms = config.freeze_check_period_ms,
            anr_ms = config.anr_input_freeze_time_ms,
            "Watchdog started"
        );

        Ok(WatchDog {
            config,
            registry,
            stats,
            commands,
            monitor: Mutex::new(Some(handle)),
        })
    }
}

/// Thread-liveness watchdog
pub struct WatchDog {
    config: Arc<WatchdogConfig>,
    registry: Arc<Registry>,
    stats: Arc<StatsCollector>,
    commands: CommandSender,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl WatchDog {
    pub fn builder() -> WatchDogBuilder {
        WatchDogBuilder::new()
    }

    /// Start a watchdog that logs its findings
    pub fn start(config: WatchdogConfig) -> Result<Self> {
        Self::builder().with_config(config).start()
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Begin watching the threads of `instance`.
    ///
    /// When the UI and script roles share one thread only the UI watcher is
    /// created. A duplicate id is logged and ignored. The watchdog keeps only
    /// a weak reference to `scheduler`.
    pub fn register(
        &self,
        instance: InstanceId,
        scheduler: &Arc<dyn TaskScheduler>,
        shares_ui_and_script_thread: bool,
    ) {
        let Some(handles) = self.registry.insert(
            instance,
            Arc::downgrade(scheduler),
            shares_ui_and_script_thread,
            &self.config,
        ) else {
            tracing::warn!(instance, "Instance {} is already being watched", instance);
            return;
        };

        for handle in handles {
            // The first check only establishes the heartbeat baseline
            if self
                .send(Command::Schedule {
                    handle,
                    delay: std::time::Duration::ZERO,
                })
                .is_err()
            {
                tracing::warn!(instance, "Monitor stopped, not watching instance {}", instance);
                self.registry.remove(instance);
                return;
            }
        }

        tracing::info!(
            instance,
            shared_thread = shares_ui_and_script_thread,
            "Watching instance {}",
            instance
        );
    }

    /// Stop watching `instance`. Checks already scheduled for it are dropped.
    pub fn unregister(&self, instance: InstanceId) {
        if self.registry.remove(instance) {
            tracing::info!(instance, "Stopped watching instance {}", instance);
        } else {
            tracing::debug!(instance, "Unregister of unknown instance {}", instance);
        }
    }

    /// An input event was dispatched to `instance` at `timestamp`.
    ///
    /// The event belongs to the registration current at the time of the
    /// call; a later re-registration of the same id never sees it.
    pub fn buried_bomb(&self, instance: InstanceId, timestamp: Instant) {
        let handles = self.registry.handles(instance);
        if handles.is_empty() {
            tracing::trace!(instance, "Input for unwatched instance {}", instance);
            return;
        }
        let _ = self.send(Command::Bury { handles, timestamp });
    }

    /// `instance` finished handling its oldest pending input event
    pub fn defusing_bomb(&self, instance: InstanceId) {
        let handles = self.registry.handles(instance);
        if handles.is_empty() {
            return;
        }
        let _ = self.send(Command::Defuse { handles });
    }

    /// Suspend or resume escalation for every watcher of `instance`
    pub fn set_suspended(&self, instance: InstanceId, suspended: bool) {
        for watcher in self.registry.watchers(instance) {
            watcher.set_suspended(suspended);
        }
        tracing::debug!(instance, suspended, "Watch suspension changed");
    }

    pub fn is_registered(&self, instance: InstanceId) -> bool {
        self.registry.contains(instance)
    }

    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Current state of one watcher
    pub fn snapshot(&self, instance: InstanceId, role: ThreadRole) -> Option<WatcherSnapshot> {
        self.registry
            .watcher(instance, role)
            .map(|watcher| watcher.snapshot())
    }

    pub fn stats(&self) -> WatchdogStats {
        self.stats.snapshot()
    }

    /// Whether the monitor thread is still running
    pub fn is_running(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the monitor thread and wait for it. Later calls are no-ops.
    pub fn shutdown(&self) {
        let Some(handle) = self.monitor.lock().take() else {
            return;
        };

        let _ = self.commands.send(Command::Shutdown);

        if thread::current().id() == handle.thread().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("Watchdog monitor thread panicked");
        } else {
            tracing::info!("Watchdog stopped");
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| {
            tracing::debug!("Monitor thread is not running");
            WatchdogError::MonitorStopped
        })
    }
}

impl Drop for WatchDog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WatchDog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchDog")
            .field("registered", &self.registry.len())
            .field("running", &self.is_running())
            .finish()
    }
}
