//! Progress reporting and cooperative cancellation.
//!
//! An [`ExecutionMonitor`] is handed to long running operations. They call
//! [`ExecutionMonitor::check_canceled`] at their polling points and report
//! fractional progress. A monitor can be split into sub-monitors, each
//! covering a fraction of its parent's range, so phases can report their
//! own progress from 0 to 1.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rowsort_types::error::{Result, SortError};

pub type ProgressListener = Arc<dyn Fn(f64, &str) + Send + Sync>;

/// Requests cancellation of the operation observing the monitor it was
/// taken from. Cheap to clone and usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One level of the progress tree. A change of a node's value moves its
/// parent by the change times the node's fraction.
struct ProgressNode {
    value: Mutex<f64>,
    parent: Option<(Arc<ProgressNode>, f64)>,
}

impl ProgressNode {
    fn root() -> Self {
        ProgressNode {
            value: Mutex::new(0.0),
            parent: None,
        }
    }

    /// Set the value (clamped to 0..=1) and propagate. Returns the value of
    /// the root node afterwards.
    fn set(&self, value: f64) -> f64 {
        let applied = {
            let mut current = lock(&self.value);
            let old = *current;
            *current = value.clamp(0.0, 1.0);
            *current - old
        };
        self.propagate(applied)
    }

    fn add(&self, delta: f64) -> f64 {
        let applied = {
            let mut current = lock(&self.value);
            let old = *current;
            *current = (old + delta).clamp(0.0, 1.0);
            *current - old
        };
        self.propagate(applied)
    }

    fn propagate(&self, applied: f64) -> f64 {
        match &self.parent {
            Some((parent, fraction)) => parent.add(applied * fraction),
            None => *lock(&self.value),
        }
    }
}

#[derive(Default)]
struct Status {
    message: String,
    listener: Option<ProgressListener>,
}

pub struct ExecutionMonitor {
    cancel: CancelHandle,
    node: Arc<ProgressNode>,
    root: Arc<ProgressNode>,
    status: Arc<Mutex<Status>>,
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        let root = Arc::new(ProgressNode::root());
        ExecutionMonitor {
            cancel: CancelHandle::default(),
            node: Arc::clone(&root),
            root,
            status: Arc::new(Mutex::new(Status::default())),
        }
    }

    /// Monitor calling `listener` with the overall progress and the current
    /// message whenever either changes.
    pub fn with_listener(listener: impl Fn(f64, &str) + Send + Sync + 'static) -> Self {
        let monitor = Self::new();
        lock(&monitor.status).listener = Some(Arc::new(listener));
        monitor
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// `Err(SortError::Canceled)` once cancellation was requested.
    pub fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_canceled() {
            Err(SortError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Sub-monitor covering `fraction` of this monitor's range. It shares
    /// the cancellation flag, message and listener.
    pub fn create_sub_progress(&self, fraction: f64) -> ExecutionMonitor {
        let node = ProgressNode {
            value: Mutex::new(0.0),
            parent: Some((Arc::clone(&self.node), fraction.clamp(0.0, 1.0))),
        };
        ExecutionMonitor {
            cancel: self.cancel.clone(),
            node: Arc::new(node),
            root: Arc::clone(&self.root),
            status: Arc::clone(&self.status),
        }
    }

    /// Report progress in this monitor's own range, clamped to 0..=1.
    pub fn set_progress(&self, progress: f64) {
        let progress = if progress.is_nan() { 0.0 } else { progress };
        let overall = self.node.set(progress);
        self.notify(overall);
    }

    pub fn set_message(&self, message: impl Into<String>) {
        lock(&self.status).message = message.into();
        self.notify(self.progress());
    }

    fn notify(&self, overall: f64) {
        let pending = {
            let status = lock(&self.status);
            status
                .listener
                .clone()
                .map(|listener| (listener, status.message.clone()))
        };
        if let Some((listener, message)) = pending {
            listener(overall, &message);
        }
    }

    /// Overall progress of the monitor tree, 0..=1.
    pub fn progress(&self) -> f64 {
        *lock(&self.root.value)
    }

    pub fn message(&self) -> String {
        lock(&self.status).message.clone()
    }
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionMonitor")
            .field("progress", &self.progress())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
