//! Progress reporting plumbing shared by the download engine and the job
//! manager.

/// A `(completed, total)` pair plus an optional human-readable message.
/// Callers should treat this as an opaque snapshot in completion order, not
/// canvas index order.
#[derive(Clone, Debug)]
pub struct ProgressUpdate {
    pub current: usize,
    pub total: usize,
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            message: None,
        }
    }

    pub fn with_message(current: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: Some(message.into()),
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f64 / self.total as f64
        }
    }
}

/// Callback injected into the download engine by the job manager. Must be
/// `Send + Sync` since it is invoked from worker threads in completion
/// order.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Callback the engine polls once per completed canvas.
pub type CancelCheck = Box<dyn Fn() -> bool + Send + Sync>;

pub fn no_op_progress() -> ProgressCallback {
    Box::new(|_| {})
}

pub fn never_cancel() -> CancelCheck {
    Box::new(|| false)
}
