//! Collaborator seams. The chat platform and the plotting subsystem live
//! outside this core; only the calls the engine needs are modeled here.

use std::fmt;

use contracts::ChartHandle;

#[derive(Debug, Clone)]
pub struct NotifyError {
    pub message: String,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notify failed: {}", self.message)
    }
}

impl std::error::Error for NotifyError {}

/// Fire-and-forget message delivery. The engine logs failures and never
/// retries.
pub trait Notify: Send + Sync {
    fn notify(&self, recipient_id: &str, text: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct RenderError {
    pub message: String,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chart rendering failed: {}", self.message)
    }
}

impl std::error::Error for RenderError {}

/// Black-box chart rendering over the elapsed slice of a day's values.
/// `xlim` spans the full day so partial paths draw against a fixed axis.
pub trait RenderChart: Send + Sync {
    fn render_chart(&self, values: &[i64], xlim: (usize, usize))
        -> Result<ChartHandle, RenderError>;
}
