use crate::core::db::AnnotationStatus;

/// Failure taxonomy of the annotation core. Fallible operations return
/// `anyhow::Result`; callers that need to branch on the cause can
/// `downcast_ref::<CoreError>()`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("class index {class_index} out of range (project has {class_count} classes)")]
    InvalidClass {
        class_index: i64,
        class_count: usize,
    },

    #[error("box {seq} has non-positive size after clamping")]
    DegenerateBox { seq: usize },

    #[error("image has no usable pixel dimensions")]
    MissingDimensions,

    #[error("illegal status transition {from:?} -> {to:?}: {reason}")]
    IllegalTransition {
        from: AnnotationStatus,
        to: AnnotationStatus,
        reason: &'static str,
    },

    #[error("class list is locked: {box_count} stored boxes reference it")]
    ClassListLocked { box_count: u64 },
}
