use image::{ImageBuffer, Rgb};
use labelcrew::core::db::{
    AnnotationStatus, ImageRecord, ImageRepository, LabeledBox, NewAnnotation, NewImage, ProjectDb,
    ProjectRepository,
};
use labelcrew::geometry::BoxGeometry;
use tempfile::NamedTempFile;

/// Test class vocabulary, positional: "Coke" = 0, "Pepsi" = 1.
pub const TEST_CLASSES: [&str; 2] = ["Coke", "Pepsi"];

/// Creates a red PNG with the given dimensions and returns the temp file.
/// The file will be automatically cleaned up when dropped.
pub fn create_test_image_file(width: u32, height: u32) -> NamedTempFile {
    let img = ImageBuffer::from_fn(width, height, |_, _| Rgb([255u8, 0u8, 0u8]));
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp image file");
    img.save_with_format(file.path(), image::ImageFormat::Png)
        .expect("Failed to save test image");
    file
}

/// Creates a ProjectDb with a temporary project file and the test class
/// vocabulary already set. Returns both the project and the temp directory
/// (which must be kept alive).
pub async fn create_test_project() -> (ProjectDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join("test.labelcrew");
    let project = ProjectDb::new(&path)
        .await
        .expect("Failed to create test project");
    let classes: Vec<String> = TEST_CLASSES.iter().map(|s| s.to_string()).collect();
    project
        .set_classes(&classes)
        .await
        .expect("Failed to set test classes");
    (project, dir)
}

/// Registers a 100x100 test image with the project.
pub async fn add_test_image(project: &ProjectDb) -> ImageRecord {
    add_test_image_with_dims(project, 100, 100).await
}

pub async fn add_test_image_with_dims(
    project: &ProjectDb,
    width: u32,
    height: u32,
) -> ImageRecord {
    let file = create_test_image_file(width, height);
    project
        .add_image(NewImage {
            source_path: file.path().to_path_buf(),
        })
        .await
        .expect("Failed to register test image")
}

pub fn make_box(class_index: i64, cx: f64, cy: f64, w: f64, h: f64) -> LabeledBox {
    LabeledBox {
        class_index,
        geometry: BoxGeometry {
            center_x: cx,
            center_y: cy,
            width: w,
            height: h,
        },
    }
}

pub fn completed(boxes: Vec<LabeledBox>) -> NewAnnotation {
    NewAnnotation {
        status: AnnotationStatus::Completed,
        boxes,
        comment: None,
    }
}

pub fn skipped(comment: Option<&str>) -> NewAnnotation {
    NewAnnotation {
        status: AnnotationStatus::Skipped,
        boxes: Vec::new(),
        comment: comment.map(str::to_string),
    }
}

pub fn flagged(comment: Option<&str>) -> NewAnnotation {
    NewAnnotation {
        status: AnnotationStatus::Flagged,
        boxes: Vec::new(),
        comment: comment.map(str::to_string),
    }
}
