//! Progress reporting for batch fetches.
//!
//! The orchestrator only knows about [`ProgressCallback`]; rendering is
//! chosen by the binary.

/// Receives per-dataset progress from a batch operation.
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of datasets in the batch.
    fn set_total(&self, total: u64);

    /// Advances by `delta` datasets.
    fn inc(&self, delta: u64);

    /// Shows which dataset is in flight.
    fn set_message(&self, msg: String);

    /// Marks the batch as done.
    fn finish(&self, msg: String);
}
