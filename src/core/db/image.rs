use std::path::PathBuf;

/// An image registered with the project. Pixel dimensions are recorded at
/// registration time by decoding the bytes; normalization is impossible
/// without them.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: i64,
    pub file_name: String,
    pub width_px: u32,
    pub height_px: u32,
    pub(super) _guard: (),
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub source_path: PathBuf,
}

pub trait ImageRepository {
    /// Decode the file to record its dimensions, copy it into the project's
    /// image store under a fresh name, and insert the row.
    fn add_image(&self, image: NewImage) -> impl Future<Output = anyhow::Result<ImageRecord>>;
    fn get_images(&self) -> impl Future<Output = anyhow::Result<Vec<ImageRecord>>>;
    fn get_image_by_id(&self, id: i64)
    -> impl Future<Output = anyhow::Result<Option<ImageRecord>>>;
    /// Raw stored bytes, for presentation and export.
    fn read_image_bytes(
        &self,
        image: &ImageRecord,
    ) -> impl Future<Output = anyhow::Result<Vec<u8>>>;
}
