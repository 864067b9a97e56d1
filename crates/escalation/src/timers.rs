//! Monitoring timers
//!
//! A scheduled, cancellable delayed action per subject. Scheduling a new
//! timer for a subject aborts the previous one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use telemetry::SubjectId;
use tokio::task::JoinHandle;
use tracing::debug;

/// Pending delayed actions keyed by subject
#[derive(Debug, Default)]
pub struct MonitorTimers {
    handles: Mutex<HashMap<SubjectId, JoinHandle<()>>>,
}

impl MonitorTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay` unless cancelled first
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, subject_id: SubjectId, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });

        let mut handles = match self.handles.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        handles.retain(|_, h| !h.is_finished());
        debug!(subject = %subject_id, delay_ms = delay.as_millis() as u64, "Monitoring timer scheduled");
        if let Some(previous) = handles.insert(subject_id, handle) {
            previous.abort();
        }
    }

    /// Cancel a subject's pending timer; returns whether one was pending
    pub fn cancel(&self, subject_id: &SubjectId) -> bool {
        let mut handles = match self.handles.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        match handles.remove(subject_id) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                if pending {
                    debug!(subject = %subject_id, "Monitoring timer cancelled");
                }
                pending
            }
            None => false,
        }
    }

    /// Number of timers still waiting to fire
    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .map(|h| h.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }
}

impl Drop for MonitorTimers {
    fn drop(&mut self) {
        if let Ok(handles) = self.handles.get_mut() {
            for (_, handle) in handles.drain() {
                handle.abort();
            }
        }
    }
}
