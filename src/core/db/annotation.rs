use std::collections::HashMap;

use time::OffsetDateTime;

use crate::core::db::image::ImageRecord;
use crate::core::db::status::AnnotationStatus;
use crate::geometry::BoxGeometry;

/// One class-labeled normalized box, always in the stored image's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledBox {
    pub class_index: i64,
    pub geometry: BoxGeometry,
}

/// The stored annotation state for one (image, annotator) key. Exactly one
/// record exists per key; saves replace it wholesale.
#[derive(Debug, Clone)]
pub struct AnnotationRecord {
    pub image_id: i64,
    pub annotator: String,
    pub status: AnnotationStatus,
    pub boxes: Vec<LabeledBox>,
    pub comment: Option<String>,
    pub updated_at: OffsetDateTime,
    pub(super) _guard: (),
}

/// Payload for a save: the intended status plus the boxes as drawn. Boxes are
/// validated and clamped on the way in; degenerate ones are dropped with a
/// warning rather than failing the write.
#[derive(Debug, Clone, Default)]
pub struct NewAnnotation {
    pub status: AnnotationStatus,
    pub boxes: Vec<LabeledBox>,
    pub comment: Option<String>,
}

pub trait AnnotationRepository {
    /// Validate, clamp, and atomically replace the record for
    /// (image, annotator). Last write wins; a reader never observes a
    /// half-written box list.
    fn save_annotation(
        &self,
        image: &ImageRecord,
        annotator: &str,
        annotation: NewAnnotation,
    ) -> impl Future<Output = anyhow::Result<AnnotationRecord>>;

    /// None means the key was never written, which reads as Pending.
    fn get_annotation(
        &self,
        image: &ImageRecord,
        annotator: &str,
    ) -> impl Future<Output = anyhow::Result<Option<AnnotationRecord>>>;

    /// All records for one image keyed by annotator, for export aggregation.
    fn annotations_for_image(
        &self,
        image: &ImageRecord,
    ) -> impl Future<Output = anyhow::Result<HashMap<String, AnnotationRecord>>>;
}
