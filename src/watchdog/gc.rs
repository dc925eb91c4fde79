//! Signal-driven garbage collection trigger.
//!
//! One OS signal can be reserved to mean "collect garbage in every
//! container now". The listener runs on the monitor thread's runtime and is
//! best effort: it is unrelated to liveness detection and a failure to
//! install it only produces a warning.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::error::Result;

/// Callback that collects garbage across all containers
pub trait GarbageCollector: Send + Sync {
    fn collect_all(&self);
}

impl<F> GarbageCollector for F
where
    F: Fn() + Send + Sync,
{
    fn collect_all(&self) {
        self()
    }
}

/// Source of GC requests
#[async_trait]
pub trait GcTrigger: Send + Sync {
    /// Invoke `collector` for every request until the source closes
    async fn listen(&self, collector: Arc<dyn GarbageCollector>) -> Result<()>;
}

/// Trigger for platforms without signal support
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGcTrigger;

#[async_trait]
impl GcTrigger for NoopGcTrigger {
    async fn listen(&self, _collector: Arc<dyn GarbageCollector>) -> Result<()> {
        Ok(())
    }
}

/// Collects garbage whenever the process receives `signal`
#[cfg(all(unix, feature = "gc-signal"))]
#[derive(Debug, Clone, Copy)]
pub struct SignalGcTrigger {
    signal: i32,
}

#[cfg(all(unix, feature = "gc-signal"))]
impl SignalGcTrigger {
    pub fn new(signal: i32) -> Self {
        Self { signal }
    }

    pub fn signal(&self) -> i32 {
        self.signal
    }
}

#[cfg(all(unix, feature = "gc-signal"))]
#[async_trait]
impl GcTrigger for SignalGcTrigger {
    async fn listen(&self, collector: Arc<dyn GarbageCollector>) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut stream = signal(SignalKind::from_raw(self.signal)).map_err(|e| {
            crate::core::error::WatchdogError::Signal(format!(
                "cannot listen for signal {}: {}",
                self.signal, e
            ))
        })?;

        tracing::debug!("Listening for GC signal {}", self.signal);
        while stream.recv().await.is_some() {
            tracing::info!("GC signal {} received, collecting garbage", self.signal);
            collector.collect_all();
        }
        Ok(())
    }
}

/// Pick the trigger for this platform and configuration
pub fn platform_gc_trigger(signal: Option<i32>) -> Arc<dyn GcTrigger> {
    match signal {
        #[cfg(all(unix, feature = "gc-signal"))]
        Some(signal) => Arc::new(SignalGcTrigger::new(signal)),
        #[cfg(not(all(unix, feature = "gc-signal")))]
        Some(signal) => {
            tracing::debug!("GC signal {} not supported on this platform", signal);
            Arc::new(NoopGcTrigger)
        }
        None => Arc::new(NoopGcTrigger),
    }
}
