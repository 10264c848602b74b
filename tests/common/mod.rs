mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from labelcrew for tests
pub use labelcrew::core::db::{
    AnnotationRepository, AnnotationStatus, AssignmentRepository, ImageRecord, ImageRepository,
    LabeledBox, NewAnnotation, NewImage, ProjectDb, ProjectRepository,
};
pub use labelcrew::error::CoreError;
pub use labelcrew::geometry::BoxGeometry;
