use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use labelcrew::core::db::{
    AnnotatorProgress, AssignmentRepository, ImageRepository, NewImage, ProjectDb,
    ProjectRepository, UpdateProjectSettings, parse_class_list,
};
use labelcrew::export::{ExportOptions, export_dataset};

#[derive(Parser)]
#[command(name = "labelcrew")]
#[command(about = "Multi-annotator bounding-box labeling with YOLO dataset export")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new project file with a class vocabulary
    Create {
        project_file: PathBuf,
        /// Project name
        #[arg(long)]
        name: String,
        /// Comma-separated class names, e.g. "Coke, Pepsi"
        #[arg(long)]
        classes: String,
    },
    /// Register image files with the project
    AddImages {
        project_file: PathBuf,
        #[arg(value_name = "IMAGE", required = true)]
        images: Vec<PathBuf>,
    },
    /// Put images into an annotator's work queue
    Assign {
        project_file: PathBuf,
        #[arg(long)]
        annotator: String,
        /// Comma-separated image ids; omit to assign every unassigned image
        #[arg(long)]
        images: Option<String>,
    },
    /// Remove an annotator's unstarted work from their queue
    RevokePending {
        project_file: PathBuf,
        #[arg(long)]
        annotator: String,
    },
    /// Per-annotator progress counters
    Status {
        project_file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Export the completed annotations as a YOLO dataset
    Export {
        project_file: PathBuf,
        /// Output directory, or an archive when the path ends in .tar.zst
        #[arg(long)]
        out: PathBuf,
        /// Train split ratio
        #[arg(long, default_value_t = 0.8)]
        ratio: f64,
        /// Shuffle seed for a reproducible split
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Serialize)]
struct StatusReport {
    project: String,
    annotators: Vec<AnnotatorProgress>,
    unassigned_images: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Cli::parse();
    match args.command {
        Command::Create {
            project_file,
            name,
            classes,
        } => {
            let classes = parse_class_list(&classes);
            anyhow::ensure!(!classes.is_empty(), "class list must not be empty");
            let project = ProjectDb::new(&project_file).await?;
            project
                .set_project_settings(UpdateProjectSettings {
                    name: Some(name),
                    created_at: Some(time::OffsetDateTime::now_utc()),
                })
                .await?;
            project.set_classes(&classes).await?;
            project.save_project().await?;
            println!("Created {:?} with {} classes", project_file, classes.len());
        }
        Command::AddImages {
            project_file,
            images,
        } => {
            let project = ProjectDb::new(&project_file).await?;
            for path in images {
                let record = project
                    .add_image(NewImage {
                        source_path: path.clone(),
                    })
                    .await?;
                println!(
                    "Added image {} ({}x{}) from {:?}",
                    record.id, record.width_px, record.height_px, path
                );
            }
            project.save_project().await?;
        }
        Command::Assign {
            project_file,
            annotator,
            images,
        } => {
            let project = ProjectDb::new(&project_file).await?;
            let image_ids: Vec<i64> = match images {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse::<i64>().map_err(Into::into))
                    .collect::<anyhow::Result<_>>()?,
                None => project
                    .unassigned_images()
                    .await?
                    .into_iter()
                    .map(|img| img.id)
                    .collect(),
            };
            let added = project.assign(&annotator, &image_ids).await?;
            project.save_project().await?;
            println!("Assigned {} new images to {}", added, annotator);
        }
        Command::RevokePending {
            project_file,
            annotator,
        } => {
            let project = ProjectDb::new(&project_file).await?;
            let removed = project.revoke_pending(&annotator).await?;
            project.save_project().await?;
            println!("Revoked {} pending images from {}", removed, annotator);
        }
        Command::Status { project_file, json } => {
            let project = ProjectDb::new(&project_file).await?;
            let mut annotators = Vec::new();
            for annotator in project.annotators().await? {
                annotators.push(project.progress(&annotator).await?);
            }
            let report = StatusReport {
                project: project.get_project_name().await?,
                annotators,
                unassigned_images: project.unassigned_images().await?.len(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Project: {}", report.project);
                for p in &report.annotators {
                    println!(
                        "  {}: {}/{} completed, {} skipped, {} flagged",
                        p.annotator, p.completed, p.total, p.skipped, p.flagged
                    );
                }
                println!("  unassigned images: {}", report.unassigned_images);
            }
            // Read-only; saving is still cheap and keeps the archive fresh.
            project.save_project().await?;
        }
        Command::Export {
            project_file,
            out,
            ratio,
            seed,
        } => {
            let project = ProjectDb::new(&project_file).await?;
            let summary = export_dataset(
                &project,
                &out,
                &ExportOptions {
                    train_ratio: ratio,
                    seed,
                },
            )
            .await?;
            project.save_project().await?;
            println!(
                "Exported {} images ({} train / {} val, {} boxes) to {:?}",
                summary.images_exported,
                summary.train_count,
                summary.val_count,
                summary.boxes_exported,
                out
            );
            for skipped in &summary.skipped_images {
                eprintln!("  skipped image {}: {}", skipped.image_id, skipped.reason);
            }
        }
    }
    Ok(())
}
