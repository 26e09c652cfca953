// ── Periodic task scheduler ──
//
// One background task per schedule. Ticks of the same schedule never
// overlap: the next delay starts only after the previous tick returns.
// A failing tick is logged and the schedule keeps going.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A named fixed-interval job that can be started once and stopped once.
pub struct Periodic {
    name: String,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for Periodic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Periodic")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Periodic {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Spawn the schedule. `work` first runs after `initial_delay`, then
    /// once per interval measured from the end of the previous run.
    pub async fn start<F, Fut, E>(&self, initial_delay: Duration, mut work: F) -> Result<(), CoreError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CoreError::TaskAlreadyRunning {
                name: self.name.clone(),
            });
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = self.name.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                if let Err(e) = work().await {
                    warn!(task = %name, error = %e, "periodic task failed");
                }
                delay = interval;
            }
            debug!(task = %name, "periodic task exited");
        });

        debug!(task = %self.name, interval_secs = interval.as_secs(), "periodic task started");
        *running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Cancel the schedule and wait for an in-flight tick to finish.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let Some(Running { cancel, handle }) = self.running.lock().await.take() else {
            return Err(CoreError::TaskNotRunning {
                name: self.name.clone(),
            });
        };
        cancel.cancel();
        handle.await.map_err(|e| {
            if e.is_panic() {
                CoreError::TaskPanicked {
                    name: self.name.clone(),
                }
            } else {
                CoreError::TaskNotRunning {
                    name: self.name.clone(),
                }
            }
        })
    }
}
