//! Task posting onto named threads.
//!
//! The watchdog never runs work on the threads it monitors itself; it posts
//! heartbeat tasks through a [`TaskScheduler`] supplied by the host.
//! [`ThreadScheduler`] is a small bundled implementation with one OS thread
//! per role.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::types::ThreadRole;
use crate::core::error::SchedulerError;

/// Unit of work posted to a thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Host abstraction that runs tasks on the UI and script threads
pub trait TaskScheduler: Send + Sync {
    /// Queue `task` on the thread for `role` without waiting
    fn post_task(&self, task: Task, role: ThreadRole) -> Result<(), SchedulerError>;

    /// Run `task` on the thread for `role` and wait for it to finish
    fn post_sync_task(&self, task: Task, role: ThreadRole) -> Result<(), SchedulerError>;

    /// Platform id of the thread for `role`, used in diagnostics
    fn thread_id(&self, role: ThreadRole) -> Option<ThreadId>;
}

/// One worker thread draining a task channel
struct Worker {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn spawn(name: String) -> Result<Self, SchedulerError> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(task) = receiver.blocking_recv() {
                    task();
                }
                tracing::debug!("Scheduler thread {:?} exiting", thread::current().name());
            })
            .map_err(|e| SchedulerError::SpawnFailed {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn post(&self, task: Task, role: ThreadRole) -> Result<(), SchedulerError> {
        let stopped = || SchedulerError::ThreadStopped {
            role: role.to_string(),
        };
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or_else(stopped)?;
        sender.send(task).map_err(|_| stopped())
    }

    fn post_sync(&self, task: Task, role: ThreadRole) -> Result<(), SchedulerError> {
        // Waiting on ourselves would never finish
        if thread::current().id() == self.thread_id {
            task();
            return Ok(());
        }

        let (done_tx, done_rx) = std::sync::mpsc::sync_channel::<()>(1);
        self.post(
            Box::new(move || {
                task();
                let _ = done_tx.send(());
            }),
            role,
        )?;
        done_rx.recv().map_err(|_| SchedulerError::SyncTaskLost)
    }

    /// Refuse new tasks. The thread exits once its queue is drained.
    fn close(&self) {
        self.sender.lock().take();
    }

    /// Close and wait for the thread to finish its queue
    fn join(&self) {
        self.close();
        if thread::current().id() == self.thread_id {
            return;
        }
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            tracing::warn!("Scheduler thread {} panicked", self.name);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Never wait here: the last reference may be released on the monitor
        // thread while this worker is the one that is stuck.
        self.close();
        if self.handle.get_mut().take().is_some() {
            tracing::trace!("Detached scheduler thread {}", self.name);
        }
    }
}

/// Thread-per-role task scheduler
pub struct ThreadScheduler {
    ui: Arc<Worker>,
    script: Arc<Worker>,
}

impl ThreadScheduler {
    /// Spawn separate UI and script threads named `<prefix>-ui` and `<prefix>-script`
    pub fn new(prefix: &str) -> Result<Self, SchedulerError> {
        let ui = Arc::new(Worker::spawn(format!("{}-ui", prefix))?);
        let script = Arc::new(Worker::spawn(format!("{}-script", prefix))?);
        Ok(Self { ui, script })
    }

    /// Spawn one thread that serves both roles
    pub fn shared(name: &str) -> Result<Self, SchedulerError> {
        let worker = Arc::new(Worker::spawn(name.to_string())?);
        Ok(Self {
            ui: Arc::clone(&worker),
            script: worker,
        })
    }

    /// Whether the UI and script roles run on the same thread
    pub fn shares_ui_and_script_thread(&self) -> bool {
        Arc::ptr_eq(&self.ui, &self.script)
    }

    /// Stop accepting tasks and wait for both threads to drain their queues.
    ///
    /// Dropping the scheduler only closes the queues and leaves the threads
    /// to finish on their own; call this when the caller must know they are
    /// gone. Later calls return immediately.
    pub fn shutdown(&self) {
        self.ui.join();
        self.script.join();
    }

    fn worker(&self, role: ThreadRole) -> &Worker {
        match role {
            ThreadRole::Ui => &self.ui,
            ThreadRole::Script => &self.script,
        }
    }
}

impl TaskScheduler for ThreadScheduler {
    fn post_task(&self, task: Task, role: ThreadRole) -> Result<(), SchedulerError> {
        self.worker(role).post(task, role)
    }

    fn post_sync_task(&self, task: Task, role: ThreadRole) -> Result<(), SchedulerError> {
        self.worker(role).post_sync(task, role)
    }

    fn thread_id(&self, role: ThreadRole) -> Option<ThreadId> {
        Some(self.worker(role).thread_id)
    }
}
