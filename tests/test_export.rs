//! Integration tests for the dataset exporter.
//!
//! Tests cover:
//! - The exact YOLO label line format
//! - Exclusion of images nobody completed
//! - Concatenation of boxes across annotators
//! - The train/validation split degeneracy guards
//! - The data.yaml manifest

mod common;

use std::fs;
use std::path::Path;

use common::*;
use labelcrew::export::{ExportOptions, export_dataset};

fn read_only_label(dir: &Path, split: &str) -> String {
    let label_dir = dir.join("labels").join(split);
    let mut entries: Vec<_> = fs::read_dir(&label_dir)
        .unwrap_or_else(|e| panic!("missing {label_dir:?}: {e}"))
        .map(|e| e.expect("dir entry").path())
        .collect();
    assert_eq!(entries.len(), 1, "expected exactly one label file");
    fs::read_to_string(entries.pop().expect("one entry")).expect("readable label file")
}

fn count_files(dir: &Path) -> usize {
    match fs::read_dir(dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_label_line_format() -> anyhow::Result<()> {
    // Class "Pepsi" is index 1; one completed box dead center.
    let (project, _temp_dir) = create_test_project().await;
    let image = add_test_image_with_dims(&project, 100, 200).await;
    project
        .save_annotation(
            &image,
            "alice",
            completed(vec![make_box(1, 0.5, 0.5, 0.2, 0.1)]),
        )
        .await?;

    let out = tempfile::TempDir::new()?;
    let summary = export_dataset(&project, out.path(), &ExportOptions::default()).await?;
    assert_eq!(summary.images_exported, 1);
    assert_eq!(summary.train_count, 1);
    assert_eq!(summary.val_count, 0);

    let label = read_only_label(out.path(), "train");
    assert_eq!(label, "1 0.500000 0.500000 0.200000 0.100000\n");

    project.save_project().await?;
    Ok(())
}

#[tokio::test]
async fn test_non_completed_images_are_excluded() -> anyhow::Result<()> {
    let (project, _temp_dir) = create_test_project().await;
    let done = add_test_image(&project).await;
    let skipped_img = add_test_image(&project).await;
    let flagged_img = add_test_image(&project).await;
    let _pending_img = add_test_image(&project).await;

    project
        .save_annotation(
            &done,
            "alice",
            completed(vec![make_box(0, 0.5, 0.5, 0.2, 0.2)]),
        )
        .await?;
    project
        .save_annotation(&skipped_img, "alice", skipped(None))
        .await?;
    project
        .save_annotation(&flagged_img, "alice", flagged(Some("unsure")))
        .await?;

    let out = tempfile::TempDir::new()?;
    let summary = export_dataset(&project, out.path(), &ExportOptions::default()).await?;

    // Only the completed image is in the corpus; no empty label files exist
    // for the others.
    assert_eq!(summary.images_exported, 1);
    let total_labels = count_files(&out.path().join("labels").join("train"))
        + count_files(&out.path().join("labels").join("val"));
    assert_eq!(total_labels, 1);

    project.save_project().await?;
    Ok(())
}

#[tokio::test]
async fn test_boxes_concatenate_across_annotators() -> anyhow::Result<()> {
    let (project, _temp_dir) = create_test_project().await;
    let image = add_test_image(&project).await;

    // Redundant assignment: both annotators completed the same image, so the
    // corpus carries both box sets, alice's first (annotator order).
    project
        .save_annotation(
            &image,
            "bob",
            completed(vec![make_box(1, 0.75, 0.75, 0.1, 0.1)]),
        )
        .await?;
    project
        .save_annotation(
            &image,
            "alice",
            completed(vec![make_box(0, 0.25, 0.25, 0.1, 0.1)]),
        )
        .await?;
    // A skipped record from a third annotator contributes nothing.
    project
        .save_annotation(&image, "carol", skipped(None))
        .await?;

    let out = tempfile::TempDir::new()?;
    let summary = export_dataset(&project, out.path(), &ExportOptions::default()).await?;
    assert_eq!(summary.boxes_exported, 2);

    let label = read_only_label(out.path(), "train");
    assert_eq!(
        label,
        "0 0.250000 0.250000 0.100000 0.100000\n1 0.750000 0.750000 0.100000 0.100000\n"
    );

    project.save_project().await?;
    Ok(())
}

#[tokio::test]
async fn test_two_images_split_one_and_one() -> anyhow::Result<()> {
    let (project, _temp_dir) = create_test_project().await;
    for _ in 0..2 {
        let image = add_test_image(&project).await;
        project
            .save_annotation(
                &image,
                "alice",
                completed(vec![make_box(0, 0.5, 0.5, 0.2, 0.2)]),
            )
            .await?;
    }

    let out = tempfile::TempDir::new()?;
    let summary = export_dataset(
        &project,
        out.path(),
        &ExportOptions {
            train_ratio: 0.8,
            seed: Some(1),
        },
    )
    .await?;

    // An 80/20 split of two images must never yield 2/0.
    assert_eq!(summary.train_count, 1);
    assert_eq!(summary.val_count, 1);
    assert_eq!(count_files(&out.path().join("images").join("train")), 1);
    assert_eq!(count_files(&out.path().join("images").join("val")), 1);

    project.save_project().await?;
    Ok(())
}

#[tokio::test]
async fn test_manifest_content() -> anyhow::Result<()> {
    let (project, _temp_dir) = create_test_project().await;
    let image = add_test_image(&project).await;
    project
        .save_annotation(
            &image,
            "alice",
            completed(vec![make_box(0, 0.5, 0.5, 0.2, 0.2)]),
        )
        .await?;

    let out = tempfile::TempDir::new()?;
    export_dataset(&project, out.path(), &ExportOptions::default()).await?;

    let manifest = fs::read_to_string(out.path().join("data.yaml"))?;
    assert_eq!(
        manifest,
        "train: images/train\nval: images/val\nnc: 2\nnames: [\"Coke\", \"Pepsi\"]\n"
    );

    project.save_project().await?;
    Ok(())
}

#[tokio::test]
async fn test_export_is_repeatable_and_read_only() -> anyhow::Result<()> {
    let (project, _temp_dir) = create_test_project().await;
    let image = add_test_image(&project).await;
    project.assign("alice", &[image.id]).await?;
    project
        .save_annotation(
            &image,
            "alice",
            completed(vec![make_box(0, 0.5, 0.5, 0.2, 0.2)]),
        )
        .await?;

    let out_a = tempfile::TempDir::new()?;
    let out_b = tempfile::TempDir::new()?;
    let first = export_dataset(&project, out_a.path(), &ExportOptions::default()).await?;
    let second = export_dataset(&project, out_b.path(), &ExportOptions::default()).await?;
    assert_eq!(first.images_exported, second.images_exported);

    // Annotation and assignment state are untouched by exporting.
    let progress = project.progress("alice").await?;
    assert_eq!(progress.completed, 1);
    let record = project
        .get_annotation(&image, "alice")
        .await?
        .expect("record should exist");
    assert_eq!(record.status, AnnotationStatus::Completed);

    project.save_project().await?;
    Ok(())
}

#[tokio::test]
async fn test_export_to_archive() -> anyhow::Result<()> {
    let (project, _temp_dir) = create_test_project().await;
    let image = add_test_image(&project).await;
    project
        .save_annotation(
            &image,
            "alice",
            completed(vec![make_box(0, 0.5, 0.5, 0.2, 0.2)]),
        )
        .await?;

    let out_dir = tempfile::TempDir::new()?;
    let archive = out_dir.path().join("dataset.tar.zst");
    let summary = export_dataset(&project, &archive, &ExportOptions::default()).await?;
    assert_eq!(summary.images_exported, 1);
    assert!(archive.is_file());
    assert!(fs::metadata(&archive)?.len() > 0);

    project.save_project().await?;
    Ok(())
}
