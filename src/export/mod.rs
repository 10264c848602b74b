//! YOLO dataset export: walks the project's images, aggregates completed
//! annotations across annotators, splits into train/validation, and writes
//! the `images/` + `labels/` layout with a `data.yaml` manifest.
//!
//! Export is read-only with respect to annotation state, so re-running it
//! after a failure is always safe.

use std::fs::{self, File};
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tar::Builder;
use tracing::{info, warn};
use zstd::stream::write::Encoder as ZstdEncoder;

use crate::core::db::{
    AnnotationRepository, ImageRecord, ImageRepository, LabeledBox, ProjectDb, ProjectRepository,
};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Fraction of included images that go to the train split.
    pub train_ratio: f64,
    /// Shuffle seed; None picks a fresh one per run.
    pub seed: Option<u64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            train_ratio: 0.8,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub images_exported: usize,
    pub boxes_exported: usize,
    pub train_count: usize,
    pub val_count: usize,
    /// Images with completed annotations whose stored bytes could not be
    /// read, reported per image instead of aborting the export.
    pub skipped_images: Vec<SkippedImage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedImage {
    pub image_id: i64,
    pub reason: String,
}

struct IncludedImage {
    record: ImageRecord,
    boxes: Vec<LabeledBox>,
}

/// Export the project as a YOLO training corpus.
///
/// `out` is either a directory (layout written in place) or a path ending in
/// `.tar.zst` (layout packed into an archive, same format as the project
/// file).
pub async fn export_dataset(
    project: &ProjectDb,
    out: &Path,
    options: &ExportOptions,
) -> anyhow::Result<ExportSummary> {
    anyhow::ensure!(
        options.train_ratio > 0.0 && options.train_ratio < 1.0,
        "train ratio must be strictly between 0 and 1, got {}",
        options.train_ratio
    );

    let classes = project.get_classes().await?;
    anyhow::ensure!(!classes.is_empty(), "project has no class vocabulary");

    // Only images with at least one completed record are included; boxes of
    // every completed annotator are concatenated in annotator order. No
    // label file is written for images nobody completed.
    let mut included = Vec::new();
    let mut skipped_images = Vec::new();
    for record in project.get_images().await? {
        let annotations = project.annotations_for_image(&record).await?;
        let mut completed: Vec<_> = annotations
            .into_values()
            .filter(|ann| ann.status == crate::core::db::AnnotationStatus::Completed)
            .collect();
        if completed.is_empty() {
            continue;
        }
        completed.sort_by(|a, b| a.annotator.cmp(&b.annotator));
        let boxes: Vec<LabeledBox> = completed.into_iter().flat_map(|ann| ann.boxes).collect();
        included.push(IncludedImage { record, boxes });
    }

    let (train, val) = split_train_val(included, options);

    let staging;
    let layout_dir: &Path = if is_archive_path(out) {
        staging = tempdir::TempDir::new("labelcrew_export")?;
        staging.path()
    } else {
        fs::create_dir_all(out)
            .with_context(|| format!("Failed to create export directory {:?}", out))?;
        out
    };

    let mut summary = ExportSummary {
        images_exported: 0,
        boxes_exported: 0,
        train_count: 0,
        val_count: 0,
        skipped_images: Vec::new(),
    };

    for (split, images) in [("train", &train), ("val", &val)] {
        let image_dir = layout_dir.join("images").join(split);
        let label_dir = layout_dir.join("labels").join(split);
        fs::create_dir_all(&image_dir)?;
        fs::create_dir_all(&label_dir)?;

        for image in images {
            let bytes = match project.read_image_bytes(&image.record).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(image_id = image.record.id, "skipping image: {:#}", e);
                    skipped_images.push(SkippedImage {
                        image_id: image.record.id,
                        reason: format!("{:#}", e),
                    });
                    continue;
                }
            };
            let stem = file_stem(&image.record.file_name);
            fs::write(image_dir.join(&image.record.file_name), bytes)?;
            fs::write(
                label_dir.join(format!("{stem}.txt")),
                label_file_contents(&image.boxes),
            )?;
            summary.images_exported += 1;
            summary.boxes_exported += image.boxes.len();
            match split {
                "train" => summary.train_count += 1,
                _ => summary.val_count += 1,
            }
        }
    }
    summary.skipped_images = skipped_images;

    fs::write(layout_dir.join("data.yaml"), manifest_contents(&classes))?;

    if is_archive_path(out) {
        pack_archive(layout_dir, out)?;
    }

    info!(
        images = summary.images_exported,
        boxes = summary.boxes_exported,
        train = summary.train_count,
        val = summary.val_count,
        skipped = summary.skipped_images.len(),
        "export finished"
    );
    Ok(summary)
}

/// Seeded shuffle, then partition. With one image everything is train; with
/// two or more, both partitions are guaranteed non-empty even when the ratio
/// would round one of them to zero.
fn split_train_val<T>(mut included: Vec<T>, options: &ExportOptions) -> (Vec<T>, Vec<T>) {
    let mut rng = match options.seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };
    rng.shuffle(&mut included);

    let n = included.len();
    let split = match n {
        0 | 1 => n,
        _ => ((n as f64 * options.train_ratio).round() as usize).clamp(1, n - 1),
    };
    let val = included.split_off(split);
    (included, val)
}

fn label_file_contents(boxes: &[LabeledBox]) -> String {
    let mut lines: Vec<String> = boxes
        .iter()
        .map(|b| {
            format!(
                "{} {:.6} {:.6} {:.6} {:.6}",
                b.class_index,
                b.geometry.center_x,
                b.geometry.center_y,
                b.geometry.width,
                b.geometry.height
            )
        })
        .collect();
    lines.push(String::new());
    lines.join("\n")
}

fn manifest_contents(classes: &[String]) -> String {
    let names = classes
        .iter()
        .map(|name| format!("\"{}\"", name.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "train: images/train\nval: images/val\nnc: {}\nnames: [{}]\n",
        classes.len(),
        names
    )
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}

fn is_archive_path(out: &Path) -> bool {
    out.to_str().is_some_and(|s| s.ends_with(".tar.zst"))
}

fn pack_archive(layout_dir: &Path, out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    let file =
        File::create(out).with_context(|| format!("Failed to create export archive {:?}", out))?;
    let encoder = ZstdEncoder::new(file, 3)
        .with_context(|| format!("Failed to create zstd encoder for {:?}", out))?;
    let mut tar = Builder::new(encoder);
    tar.append_dir_all(".", layout_dir)
        .with_context(|| format!("Failed to add {:?} to tar", layout_dir))?;
    let encoder = tar
        .into_inner()
        .with_context(|| format!("Failed to finalize tar for {:?}", out))?;
    encoder
        .finish()
        .with_context(|| format!("Failed to finalize zstd stream for {:?}", out))?;
    Ok(())
}
