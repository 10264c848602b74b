use serde::Serialize;

use crate::core::db::image::ImageRecord;

/// Per-annotator progress counters for the administrator dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatorProgress {
    pub annotator: String,
    pub completed: u64,
    pub skipped: u64,
    pub flagged: u64,
    pub total: u64,
}

/// The annotator -> image queue relation. Queues are FIFO in assignment
/// order, which is the order the administrator intended the work to happen
/// in, not upload order.
pub trait AssignmentRepository {
    /// Append images not already in the annotator's queue. Idempotent:
    /// re-assigning is a no-op, never a duplicate. Returns how many entries
    /// were newly added.
    fn assign(
        &self,
        annotator: &str,
        image_ids: &[i64],
    ) -> impl Future<Output = anyhow::Result<usize>>;

    /// First image in queue order whose status for this annotator is still
    /// Pending; None when the queue is exhausted.
    fn next_pending(
        &self,
        annotator: &str,
    ) -> impl Future<Output = anyhow::Result<Option<ImageRecord>>>;

    /// Remove every queue entry that is still Pending, returning the count.
    /// Completed/Skipped/Flagged work is never revoked.
    fn revoke_pending(&self, annotator: &str) -> impl Future<Output = anyhow::Result<usize>>;

    /// Project images present in no annotator's queue.
    fn unassigned_images(&self) -> impl Future<Output = anyhow::Result<Vec<ImageRecord>>>;

    /// Every annotator with at least one assignment.
    fn annotators(&self) -> impl Future<Output = anyhow::Result<Vec<String>>>;

    fn progress(
        &self,
        annotator: &str,
    ) -> impl Future<Output = anyhow::Result<AnnotatorProgress>>;
}
