//! Monitor Loop Module
//!
//! Everything the watchdog does to watcher state happens on one dedicated
//! thread. Other threads talk to it with [`Command`]s over a channel; a
//! single loop matches on them and keeps a timer queue of pending checks.
//! Checks reschedule themselves with a severity-dependent delay.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::diagnostics::{AnrReport, DiagnosticsSink, StackInspector};
use super::gc::{GarbageCollector, GcTrigger};
use super::registry::{Registry, WatcherHandle};
use super::scheduler::{Task, TaskScheduler};
use super::stats::StatsCollector;
use super::types::{InstanceId, WatchTarget};
use crate::core::error::SchedulerError;
use super::watcher::{CheckAction, ThreadWatcher};

/// Message sent to the monitor thread
#[derive(Debug)]
pub(crate) enum Command {
    /// Start checking a newly registered watcher after `delay`
    Schedule { handle: WatcherHandle, delay: Duration },
    /// The monitored thread ran a heartbeat task
    Heartbeat { handle: WatcherHandle, ticket: u64 },
    /// Input dispatched to the watchers registered when it was sent
    Bury {
        handles: Vec<WatcherHandle>,
        timestamp: Instant,
    },
    /// Input handled by the watchers registered when it was sent
    Defuse { handles: Vec<WatcherHandle> },
    /// Stop the loop
    Shutdown,
}

pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;
pub(crate) type CommandReceiver = mpsc::UnboundedReceiver<Command>;

/// Deadline-ordered queue of scheduled checks
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, WatcherHandle)>>,
    sequence: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, deadline: Instant, handle: WatcherHandle) {
        self.sequence += 1;
        self.heap.push(Reverse((deadline, self.sequence, handle)));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Remove and return every handle due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<WatcherHandle> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, _, _))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            if let Some(Reverse((_, _, handle))) = self.heap.pop() {
                due.push(handle);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Executes commands and checks against the registry
pub(crate) struct Dispatcher {
    registry: Arc<Registry>,
    sink: Arc<dyn DiagnosticsSink>,
    inspector: Arc<dyn StackInspector>,
    stats: Arc<StatsCollector>,
    commands: CommandSender,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        sink: Arc<dyn DiagnosticsSink>,
        inspector: Arc<dyn StackInspector>,
        stats: Arc<StatsCollector>,
        commands: CommandSender,
    ) -> Self {
        Self {
            registry,
            sink,
            inspector,
            stats,
            commands,
        }
    }

    /// Handle a non-timer command
    pub fn handle(&self, command: Command, timers: &mut TimerQueue) {
        match command {
            Command::Schedule { handle, delay } => {
                timers.push(Instant::now() + delay, handle);
            }
            Command::Heartbeat { handle, ticket } => {
                if let Some(watcher) = self.registry.resolve(handle) {
                    watcher.acknowledge(ticket);
                }
            }
            Command::Bury { handles, timestamp } => {
                for watcher in handles.into_iter().filter_map(|h| self.registry.resolve(h)) {
                    watcher.bury(timestamp);
                }
            }
            Command::Defuse { handles } => {
                for watcher in handles.into_iter().filter_map(|h| self.registry.resolve(h)) {
                    watcher.defuse();
                }
            }
            Command::Shutdown => {}
        }
    }

    /// Run one check for `handle`. Returns the delay until the next check,
    /// or `None` once the watcher is gone.
    pub fn run_check(&self, handle: WatcherHandle, now: Instant) -> Option<Duration> {
        let Some(watcher) = self.registry.resolve(handle) else {
            tracing::trace!("{} no longer registered, dropping its check", handle.target);
            return None;
        };

        let Some(scheduler) = watcher.scheduler() else {
            tracing::debug!("Skipping check of {}: {}", handle.target, SchedulerError::Gone);
            self.stats.record_skipped_check();
            return Some(watcher.current_period());
        };

        self.stats.record_check();
        let outcome = watcher.evaluate(now);

        if let Some(ticket) = outcome.ticket {
            let commands = self.commands.clone();
            let task: Task = Box::new(move || {
                let _ = commands.send(Command::Heartbeat { handle, ticket });
            });

            if let Err(e) = scheduler.post_task(task, handle.target.role) {
                tracing::debug!("Cannot post heartbeat to {}: {}", handle.target, e);
                watcher.withdraw(ticket);
                self.stats.record_skipped_check();
            }
        }

        // Release the host's scheduler before calling out to the sink and
        // inspector, which may run for a while or drop their own references.
        let thread_id = scheduler
            .thread_id(handle.target.role)
            .map(|id| format!("{:?}", id));
        drop(scheduler);

        self.apply(&watcher, thread_id, &outcome.actions);
        Some(outcome.next_check)
    }

    fn apply(&self, watcher: &ThreadWatcher, thread_id: Option<String>, actions: &[CheckAction]) {
        let target = watcher.target();

        for action in actions {
            match action {
                CheckAction::Warning => {
                    self.stats.record_warning();
                    self.sink.report_warning(target);
                }
                CheckAction::Freeze { repeat } => {
                    self.stats.record_freeze();
                    let message = self.freeze_message(target, *repeat);
                    self.sink.report_freeze(target, &message);
                }
                CheckAction::Recovered { from } => {
                    tracing::debug!("{} recovered from {}", target, from);
                    self.stats.record_recovery();
                    self.sink.report_recovered(target);
                }
                CheckAction::Anr {
                    pending_for,
                    pending_events,
                    show_dialog,
                } => {
                    self.stats.record_anr();
                    let report = AnrReport::new(
                        target,
                        thread_id.clone(),
                        *pending_for,
                        *pending_events,
                        self.stack_trace(target.instance),
                        *show_dialog,
                    );
                    self.sink.report_anr(&report);

                    if *show_dialog {
                        self.stats.record_dialog();
                        self.sink.show_anr_dialog(target);
                    }
                }
            }
        }
    }

    fn freeze_message(&self, target: WatchTarget, repeat: u32) -> String {
        let mut message = if repeat == 0 {
            format!("{} stopped processing tasks", target)
        } else {
            format!("{} still blocked after {} more checks", target, repeat)
        };

        let trace = self.stack_trace(target.instance);
        if !trace.is_empty() {
            message.push('\n');
            message.push_str(&trace);
        }
        message
    }

    /// Engine stack trace, empty when unavailable
    fn stack_trace(&self, instance: InstanceId) -> String {
        self.inspector.stack_trace(instance).unwrap_or_else(|e| {
            tracing::debug!("No stack trace for instance {}: {}", instance, e);
            String::new()
        })
    }
}

/// Body of the monitor thread
pub(crate) async fn run(
    dispatcher: Dispatcher,
    mut commands: CommandReceiver,
    gc: Option<(Arc<dyn GcTrigger>, Arc<dyn GarbageCollector>)>,
) {
    let gc_task = gc.map(|(trigger, collector)| {
        tokio::spawn(async move {
            if let Err(e) = trigger.listen(collector).await {
                tracing::warn!("GC trigger stopped: {}", e);
            }
        })
    });

    let mut timers = TimerQueue::new();
    tracing::debug!("Monitor loop started");

    loop {
        let next = timers.next_deadline();
        let sleep = async move {
            match next {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Shutdown) => break,
                Some(command) => dispatcher.handle(command, &mut timers),
            },
            _ = sleep => {
                let now = Instant::now();
                for handle in timers.pop_due(now) {
                    if let Some(delay) = dispatcher.run_check(handle, now) {
                        timers.push(now + delay, handle);
                    }
                }
            }
        }
    }

    if let Some(task) = gc_task {
        task.abort();
    }
    tracing::debug!("Monitor loop stopped with {} checks pending", timers.len());
}
