use serde::Serialize;

use crate::error::CoreError;

/// Lifecycle of an (image, annotator) pair. `Pending` is the implicit initial
/// state: an absent annotation record means pending, no row required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    #[default]
    Pending,
    Completed,
    Skipped,
    Flagged,
}

impl AnnotationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AnnotationStatus::Pending)
    }
}

/// Check a status transition for one (image, annotator) key.
///
/// Forward transitions only: Pending may move to any state, a terminal state
/// may only be re-saved as itself (last-write-wins content replace). There is
/// no reopen operation; unstarted work is withdrawn through `revoke_pending`
/// instead.
///
/// `box_count` is the number of boxes surviving validation; Completed with
/// zero boxes is rejected here so an empty completion never reaches the
/// database.
pub fn check_transition(
    from: AnnotationStatus,
    to: AnnotationStatus,
    box_count: usize,
) -> Result<(), CoreError> {
    if from.is_terminal() && from != to {
        return Err(CoreError::IllegalTransition {
            from,
            to,
            reason: "terminal states cannot be changed",
        });
    }
    if to == AnnotationStatus::Completed && box_count == 0 {
        return Err(CoreError::IllegalTransition {
            from,
            to,
            reason: "completion requires at least one valid box",
        });
    }
    Ok(())
}

impl TryFrom<i64> for AnnotationStatus {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AnnotationStatus::Pending),
            1 => Ok(AnnotationStatus::Completed),
            2 => Ok(AnnotationStatus::Skipped),
            3 => Ok(AnnotationStatus::Flagged),
            _ => Err(anyhow::anyhow!("Invalid AnnotationStatus value: {}", value)),
        }
    }
}

impl From<AnnotationStatus> for i64 {
    fn from(status: AnnotationStatus) -> Self {
        match status {
            AnnotationStatus::Pending => 0,
            AnnotationStatus::Completed => 1,
            AnnotationStatus::Skipped => 2,
            AnnotationStatus::Flagged => 3,
        }
    }
}
