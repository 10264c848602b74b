pub mod core;
pub mod error;
pub mod export;
pub mod geometry;

pub use error::CoreError;
pub use export::{ExportOptions, ExportSummary, export_dataset};
pub use geometry::{BoxGeometry, CanvasSize, PixelRect, Rotation};
