//! The opaque data-batch abstraction shared between kernel and engine.

use std::any::Any;

/// A batch of rows whose concrete representation only its producer knows.
///
/// Scan planning yields kernel-produced batches (one row per candidate data
/// file); an engine may also implement this for its own formats. Consumers that
/// know the producer downcast via [`EngineData::as_any`], the way the bundled
/// scan-file visitor does with [`crate::scan::log_replay::ScanDataBatch`].
pub trait EngineData: Send + Sync {
    /// Number of rows in this batch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}
