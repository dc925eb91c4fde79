//! Tests for the watchdog module
//!
//! The dispatcher tests drive the monitor's command handling and check
//! cycles by hand against a scheduler that only runs tasks when told to, so
//! a "stalled" thread is simply one whose tasks are withheld. The live tests
//! at the end run the real monitor thread with short periods.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::sync::mpsc;

use super::diagnostics::{ChannelSink, DiagnosticEvent, StackInspector};
use super::monitor::{Command, CommandReceiver, CommandSender, Dispatcher, TimerQueue};
use super::registry::{Registry, WatcherHandle};
use super::scheduler::{Task, TaskScheduler, ThreadScheduler};
use super::stats::StatsCollector;
use super::supervisor::WatchDog;
use super::types::{InstanceId, Severity, ThreadRole, WatchTarget};
use crate::core::config::WatchdogConfig;
use crate::core::error::{SchedulerError, WatchdogError};

/// Scheduler that queues tasks until the test runs them
#[derive(Default)]
struct ManualScheduler {
    queues: Mutex<Vec<(ThreadRole, Task)>>,
    closed: Mutex<Vec<ThreadRole>>,
}

impl ManualScheduler {
    /// Run every queued task for `role`
    fn run(&self, role: ThreadRole) -> usize {
        let tasks: Vec<Task> = {
            let mut queues = self.queues.lock();
            let (run, keep): (Vec<_>, Vec<_>) = queues.drain(..).partition(|(r, _)| *r == role);
            *queues = keep;
            run.into_iter().map(|(_, task)| task).collect()
        };
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    fn run_all(&self) {
        for role in ThreadRole::ALL {
            self.run(role);
        }
    }

    fn close(&self, role: ThreadRole) {
        self.closed.lock().push(role);
    }
}

impl TaskScheduler for ManualScheduler {
    fn post_task(&self, task: Task, role: ThreadRole) -> Result<(), SchedulerError> {
        if self.closed.lock().contains(&role) {
            return Err(SchedulerError::ThreadStopped {
                role: role.to_string(),
            });
        }
        self.queues.lock().push((role, task));
        Ok(())
    }

    fn post_sync_task(&self, task: Task, _role: ThreadRole) -> Result<(), SchedulerError> {
        task();
        Ok(())
    }

    fn thread_id(&self, _role: ThreadRole) -> Option<ThreadId> {
        Some(thread::current().id())
    }
}

struct FixedInspector(Result<String, String>);

impl StackInspector for FixedInspector {
    fn stack_trace(&self, _instance: InstanceId) -> crate::core::error::Result<String> {
        self.0.clone().map_err(WatchdogError::StackTrace)
    }
}

/// Dispatcher wired to a manual scheduler and a channel sink
struct Harness {
    config: Arc<WatchdogConfig>,
    registry: Arc<Registry>,
    stats: Arc<StatsCollector>,
    dispatcher: Dispatcher,
    sender: CommandSender,
    commands: CommandReceiver,
    timers: TimerQueue,
    events: mpsc::UnboundedReceiver<DiagnosticEvent>,
    manual: Arc<ManualScheduler>,
    scheduler: Arc<dyn TaskScheduler>,
}

impl Harness {
    fn new() -> Self {
        Self::with(WatchdogConfig::default(), Ok(String::new()))
    }

    fn with(config: WatchdogConfig, stack: Result<String, String>) -> Self {
        let registry = Arc::new(Registry::new());
        let stats = Arc::new(StatsCollector::new());
        let (sink, events) = ChannelSink::new();
        let (sender, commands) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(sink),
            Arc::new(FixedInspector(stack)),
            Arc::clone(&stats),
            sender.clone(),
        );
        let manual = Arc::new(ManualScheduler::default());
        let scheduler: Arc<dyn TaskScheduler> = manual.clone();

        Self {
            config: Arc::new(config),
            registry,
            stats,
            dispatcher,
            sender,
            commands,
            timers: TimerQueue::new(),
            events,
            manual,
            scheduler,
        }
    }

    fn register(&self, instance: InstanceId, shared: bool) -> Vec<WatcherHandle> {
        self.registry
            .insert(instance, Arc::downgrade(&self.scheduler), shared, &self.config)
            .expect("instance registered twice")
    }

    fn send(&mut self, command: Command) {
        self.dispatcher.handle(command, &mut self.timers);
    }

    /// Queue a command the way `WatchDog` does, without handling it yet
    fn queue(&self, command: Command) {
        self.sender.send(command).expect("monitor channel closed");
    }

    fn bury_command(&self, instance: InstanceId, timestamp: Instant) -> Command {
        Command::Bury {
            handles: self.registry.handles(instance),
            timestamp,
        }
    }

    fn bury(&mut self, instance: InstanceId, timestamp: Instant) {
        let command = self.bury_command(instance, timestamp);
        self.send(command);
    }

    fn defuse(&mut self, instance: InstanceId) {
        let handles = self.registry.handles(instance);
        self.send(Command::Defuse { handles });
    }

    /// Deliver every queued command
    fn pump(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.dispatcher.handle(command, &mut self.timers);
        }
    }

    fn check(&mut self, handle: WatcherHandle, now: Instant) -> Option<Duration> {
        self.pump();
        self.dispatcher.run_check(handle, now)
    }

    fn severity(&self, handle: WatcherHandle) -> Severity {
        self.registry
            .resolve(handle)
            .map(|watcher| watcher.severity())
            .expect("watcher missing")
    }

    fn drain_events(&mut self) -> Vec<DiagnosticEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn ui(handles: &[WatcherHandle]) -> WatcherHandle {
    handles
        .iter()
        .copied()
        .find(|handle| handle.target.role == ThreadRole::Ui)
        .expect("no ui watcher")
}

fn script(handles: &[WatcherHandle]) -> WatcherHandle {
    handles
        .iter()
        .copied()
        .find(|handle| handle.target.role == ThreadRole::Script)
        .expect("no script watcher")
}

mod dispatcher_tests {
    use super::*;

    #[test]
    fn stall_and_resume_scenario() {
        let mut harness = Harness::new();
        let handles = harness.register(1, false);
        assert_eq!(handles.len(), 2);
        let ui = ui(&handles);
        let script = script(&handles);
        let now = Instant::now();

        let mut observed = Vec::new();
        let mut periods = Vec::new();
        for _ in 0..3 {
            // The script thread keeps running, the UI thread is stuck
            harness.manual.run(ThreadRole::Script);
            periods.push(harness.check(ui, now).unwrap());
            harness.check(script, now).unwrap();
            observed.push(harness.severity(ui));
            assert_eq!(harness.severity(script), Severity::Normal);
        }
        assert_eq!(
            observed,
            vec![Severity::Normal, Severity::Warning, Severity::Freeze]
        );
        assert_eq!(
            periods,
            vec![
                Duration::from_secs(3),
                Duration::from_secs(2),
                Duration::from_secs(1)
            ]
        );

        let events = harness.drain_events();
        assert!(matches!(events[0], DiagnosticEvent::Warning { target, .. } if target == ui.target));
        assert!(matches!(events[1], DiagnosticEvent::Freeze { target, .. } if target == ui.target));
        assert_eq!(events.len(), 2);

        // UI thread resumes and drains its queue
        assert_eq!(harness.manual.run(ThreadRole::Ui), 3);
        harness.check(ui, now).unwrap();
        assert_eq!(harness.severity(ui), Severity::Normal);
        harness.manual.run_all();
        harness.check(ui, now).unwrap();

        let recovered: Vec<_> = harness
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, DiagnosticEvent::Recovered { .. }))
            .collect();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].target(), ui.target);

        let stats = harness.stats.snapshot();
        assert_eq!(stats.warnings, 1);
        assert_eq!(stats.freezes, 1);
        assert_eq!(stats.recoveries, 1);
    }

    #[test]
    fn freeze_report_includes_stack_trace() {
        let mut harness = Harness::with(
            WatchdogConfig::default(),
            Ok("at render (main.js:10)".to_string()),
        );
        let handle = ui(&harness.register(4, true));
        let now = Instant::now();
        for _ in 0..3 {
            harness.check(handle, now);
        }

        let freeze = harness
            .drain_events()
            .into_iter()
            .find_map(|event| match event {
                DiagnosticEvent::Freeze { message, .. } => Some(message),
                _ => None,
            })
            .expect("no freeze event");
        assert!(freeze.contains("stopped processing tasks"));
        assert!(freeze.contains("at render (main.js:10)"));
    }

    #[test]
    fn stack_trace_failure_degrades_to_empty() {
        let mut harness = Harness::with(WatchdogConfig::default(), Err("engine busy".to_string()));
        let handle = ui(&harness.register(4, true));
        let t0 = Instant::now();
        harness.bury(4, t0);

        harness.check(handle, t0);
        harness.check(handle, t0);
        harness.check(handle, t0);
        harness.check(handle, t0 + Duration::from_secs(6));

        let events = harness.drain_events();
        let report = events
            .iter()
            .find_map(|event| match event {
                DiagnosticEvent::Anr(report) => Some(report.clone()),
                _ => None,
            })
            .expect("no anr report");
        assert_eq!(report.stack_trace, "");
        assert!(report.thread_id.is_some());
        assert_eq!(report.pending_events, 1);
        assert!(report.dialog_shown);
        assert!(events
            .iter()
            .any(|event| matches!(event, DiagnosticEvent::Dialog { .. })));
    }

    #[test]
    fn bombs_reach_every_watcher_of_the_instance() {
        let mut harness = Harness::new();
        let handles = harness.register(2, false);
        let t0 = Instant::now();

        harness.bury(2, t0);
        harness.bury(2, t0 + Duration::from_millis(5));
        harness.defuse(2);

        for handle in &handles {
            let watcher = harness.registry.resolve(*handle).unwrap();
            assert_eq!(watcher.snapshot().pending_inputs, 1);
            assert_eq!(watcher.defuse(), Some(t0 + Duration::from_millis(5)));
        }
    }

    #[test]
    fn bombs_for_unknown_instance_are_ignored() {
        let mut harness = Harness::new();
        harness.bury(99, Instant::now());
        harness.defuse(99);
        assert!(harness.drain_events().is_empty());
    }

    #[test]
    fn bomb_queued_before_reregistration_stays_with_old_watchers() {
        let mut harness = Harness::new();
        harness.register(1, false);
        let t0 = Instant::now();

        // Input arrives, then the instance is torn down and recreated before
        // the monitor gets to the queued command
        let bury = harness.bury_command(1, t0);
        harness.queue(bury);
        assert!(harness.registry.remove(1));
        let handles = harness.register(1, false);
        harness.pump();

        for handle in &handles {
            let watcher = harness.registry.resolve(*handle).unwrap();
            assert_eq!(watcher.snapshot().pending_inputs, 0);
        }

        // Freezing the new registration much later raises no ANR
        let handle = ui(&handles);
        let late = t0 + Duration::from_secs(60);
        for _ in 0..4 {
            harness.check(handle, late);
        }
        assert_eq!(harness.severity(handle), Severity::Freeze);
        assert!(!harness
            .drain_events()
            .iter()
            .any(|event| matches!(event, DiagnosticEvent::Anr(_))));
    }

    #[test]
    fn anr_dialog_once_per_cooldown_and_queue_drained() {
        let config = WatchdogConfig::default().with_dialog_suppress_cycles(4);
        let mut harness = Harness::with(config, Ok(String::new()));
        let handle = ui(&harness.register(3, true));
        let t0 = Instant::now();
        let late = t0 + Duration::from_secs(30);

        for _ in 0..3 {
            harness.check(handle, t0);
        }
        for _ in 0..8 {
            harness.bury(3, t0);
            harness.check(handle, late);
        }

        let events = harness.drain_events();
        let anrs = events
            .iter()
            .filter(|event| matches!(event, DiagnosticEvent::Anr(_)))
            .count();
        let dialogs = events
            .iter()
            .filter(|event| matches!(event, DiagnosticEvent::Dialog { .. }))
            .count();
        assert_eq!(anrs, 8);
        assert_eq!(dialogs, 2);

        let watcher = harness.registry.resolve(handle).unwrap();
        assert_eq!(watcher.snapshot().pending_inputs, 0);
        assert_eq!(watcher.defuse(), None);
    }

    #[test]
    fn check_after_unregister_is_dropped() {
        let mut harness = Harness::new();
        let handles = harness.register(8, false);
        let now = Instant::now();
        assert!(harness.check(ui(&handles), now).is_some());

        assert!(harness.registry.remove(8));
        for handle in handles {
            assert_eq!(harness.check(handle, now), None);
        }

        // Heartbeats still in flight resolve to nothing
        harness.manual.run_all();
        harness.pump();
        assert!(harness.drain_events().is_empty());
    }

    #[test]
    fn heartbeat_for_previous_registration_is_ignored() {
        let mut harness = Harness::new();
        let old = ui(&harness.register(6, true));
        let now = Instant::now();
        harness.check(old, now);

        harness.registry.remove(6);
        let new = ui(&harness.register(6, true));
        harness.manual.run_all();
        harness.pump();

        let watcher = harness.registry.resolve(new).unwrap();
        assert_eq!(watcher.snapshot().observed_heartbeats, 0);
        assert_eq!(harness.check(old, now), None);
    }

    #[test]
    fn missing_scheduler_skips_cycle() {
        let mut harness = Harness::new();
        let handle = ui(&harness.register(5, true));
        let now = Instant::now();

        // Drop the last strong references to the registered scheduler
        harness.manual = Arc::new(ManualScheduler::default());
        harness.scheduler = harness.manual.clone();

        for _ in 0..5 {
            assert_eq!(harness.check(handle, now), Some(Duration::from_secs(3)));
        }
        assert_eq!(harness.severity(handle), Severity::Normal);
        let stats = harness.stats.snapshot();
        assert_eq!(stats.skipped_checks, 5);
        assert_eq!(stats.checks, 0);
    }

    #[test]
    fn post_failure_does_not_escalate() {
        let mut harness = Harness::new();
        let handle = ui(&harness.register(7, true));
        harness.manual.close(ThreadRole::Ui);
        let now = Instant::now();

        for _ in 0..5 {
            harness.check(handle, now);
        }
        assert_eq!(harness.severity(handle), Severity::Normal);
        assert!(harness.drain_events().is_empty());
        assert_eq!(harness.stats.snapshot().skipped_checks, 5);
    }

    #[test]
    fn schedule_command_queues_timer() {
        let mut harness = Harness::new();
        let handle = ui(&harness.register(1, true));
        harness.send(Command::Schedule {
            handle,
            delay: Duration::ZERO,
        });
        assert_eq!(harness.timers.len(), 1);
        let due = harness.timers.pop_due(Instant::now() + Duration::from_millis(1));
        assert_eq!(due, vec![handle]);
    }
}

mod property_tests {
    use super::*;
    use crate::watchdog::pending::PendingEventQueue;
    use crate::watchdog::scheduler::ThreadScheduler;
    use crate::watchdog::watcher::{CheckAction, ThreadWatcher};
    use std::sync::Weak;

    fn watcher(config: WatchdogConfig) -> ThreadWatcher {
        let scheduler: Weak<dyn TaskScheduler> = Weak::<ThreadScheduler>::new();
        ThreadWatcher::new(
            WatchTarget::new(1, ThreadRole::Ui),
            1,
            Arc::new(config),
            scheduler,
        )
    }

    #[derive(Debug, Clone)]
    enum QueueOp {
        Bury(u64),
        Defuse,
    }

    fn queue_op() -> impl Strategy<Value = QueueOp> {
        prop_oneof![
            (0u64..10_000).prop_map(QueueOp::Bury),
            Just(QueueOp::Defuse),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Defusing always removes the oldest buried timestamp; an empty
        /// queue stays empty.
        #[test]
        fn bombs_are_fifo(ops in prop::collection::vec(queue_op(), 0..64)) {
            let base = Instant::now();
            let mut queue = PendingEventQueue::new();
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    QueueOp::Bury(offset) => {
                        let ts = base + Duration::from_millis(offset);
                        queue.bury(ts);
                        model.push_back(ts);
                    }
                    QueueOp::Defuse => {
                        prop_assert_eq!(queue.defuse(), model.pop_front());
                    }
                }
                prop_assert_eq!(queue.len(), model.len());
                prop_assert_eq!(queue.oldest(), model.front().copied());
            }
        }

        /// A thread that answers every heartbeat never leaves Normal.
        #[test]
        fn live_thread_stays_normal(cycles in 1usize..200) {
            let watcher = watcher(WatchdogConfig::default());
            let now = Instant::now();
            for _ in 0..cycles {
                let outcome = watcher.evaluate(now);
                prop_assert_eq!(outcome.severity, Severity::Normal);
                prop_assert!(outcome.actions.is_empty());
                watcher.acknowledge(outcome.ticket.unwrap());
            }
        }

        /// After the last answered heartbeat, severity climbs to Freeze
        /// within two further checks and never drops while stuck.
        #[test]
        fn escalation_is_monotone(live in 0usize..20, stuck in 1usize..40) {
            let watcher = watcher(WatchdogConfig::default());
            let now = Instant::now();
            for _ in 0..live {
                let ticket = watcher.evaluate(now).ticket.unwrap();
                watcher.acknowledge(ticket);
            }

            let mut previous = Severity::Normal;
            for n in 0..stuck {
                let severity = watcher.evaluate(now).severity;
                prop_assert!(severity >= previous);
                let expected = match n {
                    0 => Severity::Normal,
                    1 => Severity::Warning,
                    _ => Severity::Freeze,
                };
                prop_assert_eq!(severity, expected);
                previous = severity;
            }
        }

        /// The first check that sees the heartbeat caught up returns to
        /// Normal, reporting recovery only if the thread had escalated.
        #[test]
        fn recovery_on_first_live_check(stuck in 1usize..30) {
            let watcher = watcher(WatchdogConfig::default());
            let now = Instant::now();
            let mut last = Severity::Normal;
            for _ in 0..stuck {
                last = watcher.evaluate(now).severity;
            }

            watcher.acknowledge(watcher.snapshot().expected_heartbeats);
            let outcome = watcher.evaluate(now);
            prop_assert_eq!(outcome.severity, Severity::Normal);
            prop_assert_eq!(watcher.snapshot().consecutive_freeze_cycles, 0);

            let recovered = outcome
                .actions
                .iter()
                .filter(|action| matches!(action, CheckAction::Recovered { .. }))
                .count();
            prop_assert_eq!(recovered, usize::from(last != Severity::Normal));
        }

        /// With an overdue input every frozen cycle, the dialog fires once
        /// per cool-down window.
        #[test]
        fn dialog_rate_limited(cycles in 1u32..60, cooldown in 1u32..25) {
            let config = WatchdogConfig::default().with_dialog_suppress_cycles(cooldown);
            let watcher = watcher(config);
            let t0 = Instant::now();
            let late = t0 + Duration::from_secs(10);
            for _ in 0..3 {
                watcher.evaluate(t0);
            }

            let mut dialogs = 0u32;
            for _ in 0..cycles {
                watcher.bury(t0);
                let outcome = watcher.evaluate(late);
                for action in outcome.actions {
                    if let CheckAction::Anr { show_dialog: true, .. } = action {
                        dialogs += 1;
                    }
                }
                prop_assert_eq!(watcher.snapshot().pending_inputs, 0);
            }
            prop_assert_eq!(dialogs, (cycles + cooldown - 1) / cooldown);
        }
    }
}

mod live_tests {
    use super::*;
    use crate::watchdog::diagnostics::{AnrReport, DiagnosticsSink};
    use crate::watchdog::stats::WatchdogStats;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn fast_config() -> WatchdogConfig {
        WatchdogConfig::default()
            .with_periods(
                Duration::from_millis(20),
                Duration::from_millis(10),
                Duration::from_millis(5),
            )
            .with_anr_input_freeze_time(Duration::from_millis(40))
            .with_monitor_thread_name("watchdog-test")
    }

    /// Poll the channel until `done` accepts the collected events
    fn wait_for(
        events: &mut mpsc::UnboundedReceiver<DiagnosticEvent>,
        seen: &mut Vec<DiagnosticEvent>,
        done: impl Fn(&[DiagnosticEvent]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            while let Ok(event) = events.try_recv() {
                seen.push(event);
            }
            if done(seen) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn detects_stall_anr_and_recovery() {
        let (sink, mut events) = ChannelSink::new();
        let watchdog = WatchDog::builder()
            .with_config(fast_config())
            .with_sink(Arc::new(sink))
            .start()
            .unwrap();

        let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadScheduler::new("live-stall").unwrap());
        watchdog.register(10, &scheduler, false);
        assert!(watchdog.is_registered(10));

        // Block the UI thread until released
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        scheduler
            .post_task(
                Box::new(move || {
                    let _ = release_rx.recv();
                }),
                ThreadRole::Ui,
            )
            .unwrap();
        watchdog.buried_bomb(10, Instant::now());

        let mut seen = Vec::new();
        let ui_target = WatchTarget::new(10, ThreadRole::Ui);
        assert!(wait_for(&mut events, &mut seen, |seen| {
            seen.iter()
                .any(|e| matches!(e, DiagnosticEvent::Dialog { target, .. } if *target == ui_target))
        }));

        let ui_events: Vec<_> = seen.iter().filter(|e| e.target() == ui_target).collect();
        assert!(matches!(ui_events[0], DiagnosticEvent::Warning { .. }));
        assert!(matches!(ui_events[1], DiagnosticEvent::Freeze { .. }));
        assert!(ui_events.iter().any(|e| matches!(e, DiagnosticEvent::Anr(_))));
        assert_eq!(
            watchdog.snapshot(10, ThreadRole::Ui).unwrap().severity,
            Severity::Freeze
        );

        release_tx.send(()).unwrap();
        assert!(wait_for(&mut events, &mut seen, |seen| {
            seen.iter()
                .any(|e| matches!(e, DiagnosticEvent::Recovered { target, .. } if *target == ui_target))
        }));
        let recovered = seen
            .iter()
            .filter(|e| matches!(e, DiagnosticEvent::Recovered { target, .. } if *target == ui_target))
            .count();
        assert_eq!(recovered, 1);

        let stats = watchdog.stats();
        assert!(stats.checks > 0);
        assert!(stats.anrs >= 1);
        assert!(stats.dialogs >= 1);

        watchdog.unregister(10);
        watchdog.shutdown();
        assert!(!watchdog.is_running());
    }

    #[test]
    fn responsive_threads_raise_nothing() {
        let (sink, mut events) = ChannelSink::new();
        let config = WatchdogConfig::default().with_periods(
            Duration::from_millis(50),
            Duration::from_millis(25),
            Duration::from_millis(10),
        );
        let watchdog = WatchDog::builder()
            .with_config(config)
            .with_sink(Arc::new(sink))
            .start()
            .unwrap();

        let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadScheduler::shared("live-ok").unwrap());
        watchdog.register(20, &scheduler, true);
        assert!(watchdog.snapshot(20, ThreadRole::Script).is_none());

        thread::sleep(Duration::from_millis(300));
        let snapshot = watchdog.snapshot(20, ThreadRole::Ui).unwrap();
        assert_eq!(snapshot.severity, Severity::Normal);
        assert!(snapshot.expected_heartbeats > 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn duplicate_register_keeps_first_entry() {
        let watchdog = WatchDog::start(fast_config()).unwrap();
        let first: Arc<dyn TaskScheduler> = Arc::new(ThreadScheduler::new("live-dup-a").unwrap());
        let second: Arc<dyn TaskScheduler> = Arc::new(ThreadScheduler::shared("live-dup-b").unwrap());

        watchdog.register(30, &first, false);
        watchdog.register(30, &second, true);

        assert_eq!(watchdog.registered_count(), 1);
        assert!(watchdog.snapshot(30, ThreadRole::Script).is_some());
    }

    #[test]
    fn concurrent_unregister_is_safe() {
        let watchdog = Arc::new(WatchDog::start(fast_config()).unwrap());
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadScheduler::new("live-churn").unwrap());

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let watchdog = Arc::clone(&watchdog);
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    for round in 0..50 {
                        let instance = (worker * 1000 + round % 5) as InstanceId;
                        watchdog.register(instance, &scheduler, round % 2 == 0);
                        watchdog.buried_bomb(instance, Instant::now());
                        thread::sleep(Duration::from_millis(1));
                        watchdog.defusing_bomb(instance);
                        watchdog.unregister(instance);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(watchdog.registered_count(), 0);
        assert!(watchdog.is_running());
    }

    #[test]
    fn dropped_scheduler_only_skips_checks() {
        let watchdog = WatchDog::start(fast_config()).unwrap();
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadScheduler::new("live-gone").unwrap());
        watchdog.register(40, &scheduler, false);
        drop(scheduler);

        thread::sleep(Duration::from_millis(100));
        let stats = watchdog.stats();
        assert!(stats.skipped_checks > 0);
        assert_eq!(
            watchdog.snapshot(40, ThreadRole::Ui).unwrap().severity,
            Severity::Normal
        );
    }

    #[test]
    fn suspended_instance_does_not_escalate() {
        let (sink, mut events) = ChannelSink::new();
        let watchdog = WatchDog::builder()
            .with_config(fast_config())
            .with_sink(Arc::new(sink))
            .start()
            .unwrap();
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadScheduler::shared("live-suspend").unwrap());
        watchdog.register(50, &scheduler, true);
        watchdog.set_suspended(50, true);

        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        scheduler
            .post_task(
                Box::new(move || {
                    let _ = release_rx.recv();
                }),
                ThreadRole::Ui,
            )
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        assert!(events.try_recv().is_err());
        assert!(watchdog.snapshot(50, ThreadRole::Ui).unwrap().suspended);

        release_tx.send(()).unwrap();
        scheduler.post_sync_task(Box::new(|| {}), ThreadRole::Ui).unwrap();
    }

    /// Sink that lets go of the host's scheduler on the first warning
    struct ReleasingSink {
        host: Mutex<Option<Arc<dyn TaskScheduler>>>,
        warned: AtomicBool,
    }

    impl DiagnosticsSink for ReleasingSink {
        fn report_warning(&self, _target: WatchTarget) {
            self.host.lock().take();
            self.warned.store(true, Ordering::SeqCst);
        }

        fn report_freeze(&self, _target: WatchTarget, _message: &str) {}

        fn report_recovered(&self, _target: WatchTarget) {}

        fn report_anr(&self, _report: &AnrReport) {}

        fn show_anr_dialog(&self, _target: WatchTarget) {}
    }

    #[test]
    fn scheduler_released_while_its_thread_is_stuck() {
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadScheduler::new("live-release").unwrap());
        let sink = Arc::new(ReleasingSink {
            host: Mutex::new(Some(Arc::clone(&scheduler))),
            warned: AtomicBool::new(false),
        });
        let watchdog = WatchDog::builder()
            .with_config(fast_config())
            .with_sink(sink.clone())
            .start()
            .unwrap();

        watchdog.register(70, &scheduler, true);
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        scheduler
            .post_task(
                Box::new(move || {
                    let _ = release_rx.recv();
                }),
                ThreadRole::Ui,
            )
            .unwrap();
        // From here on the sink holds the only strong reference
        drop(scheduler);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !sink.warned.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(sink.warned.load(Ordering::SeqCst));

        // The monitor keeps cycling with the scheduler gone
        let cycles = |stats: WatchdogStats| stats.checks + stats.skipped_checks;
        let before = cycles(watchdog.stats());
        thread::sleep(Duration::from_millis(200));
        assert!(cycles(watchdog.stats()) > before);
        assert!(watchdog.is_running());

        let (done_tx, done_rx) = std_mpsc::channel();
        thread::spawn(move || {
            watchdog.shutdown();
            let _ = done_tx.send(());
        });
        let finished = done_rx.recv_timeout(Duration::from_secs(3));
        release_tx.send(()).unwrap();
        assert!(finished.is_ok());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let watchdog = WatchDog::start(fast_config()).unwrap();
        assert!(watchdog.is_running());
        watchdog.shutdown();
        watchdog.shutdown();
        assert!(!watchdog.is_running());

        // Operations after shutdown are absorbed
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadScheduler::shared("live-after").unwrap());
        watchdog.register(60, &scheduler, true);
        assert!(!watchdog.is_registered(60));
        assert_eq!(watchdog.registered_count(), 0);
        watchdog.buried_bomb(60, Instant::now());
        watchdog.defusing_bomb(60);
        watchdog.unregister(60);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = WatchdogConfig::default().with_freeze_report_interval(0);
        assert!(matches!(
            WatchDog::start(config),
            Err(WatchdogError::Config(_))
        ));
    }
}
