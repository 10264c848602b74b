mod annotation;
mod assignment;
mod image;
mod project;
mod state;
mod status;

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::Context;
use sqlx::{Connection, Row};
use state::ProjectState;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use crate::error::CoreError;

pub use annotation::{AnnotationRecord, AnnotationRepository, LabeledBox, NewAnnotation};
pub use assignment::{AnnotatorProgress, AssignmentRepository};
pub use image::{ImageRecord, ImageRepository, NewImage};
pub use project::{ProjectRepository, UpdateProjectSettings, parse_class_list};
pub use status::{AnnotationStatus, check_transition};

/// An open project file. All repositories of the crate are implemented on
/// this handle; cloning the inner state is cheap and connection-pooled.
#[derive(Debug)]
pub struct ProjectDb {
    state: Arc<ProjectState>,
}

impl ProjectDb {
    pub async fn new<P: AsRef<Path>>(project_file: P) -> anyhow::Result<Self> {
        Ok(Self {
            state: Arc::new(ProjectState::new(project_file).await?),
        })
    }

    /// Explicitly save the project to disk.
    /// This is required when dropping in an async context (e.g., tests with #[tokio::test]).
    pub async fn save_project(&self) -> anyhow::Result<()> {
        self.state.save_project().await
    }
}

fn image_record_from_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        width_px: row
            .try_get::<i64, _>("width_px")?
            .try_into()
            .expect("width bounded by database constraint"),
        height_px: row
            .try_get::<i64, _>("height_px")?
            .try_into()
            .expect("height bounded by database constraint"),
        _guard: (),
    })
}

fn labeled_box_from_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<LabeledBox> {
    Ok(LabeledBox {
        class_index: row.try_get("class_idx")?,
        geometry: crate::geometry::BoxGeometry {
            center_x: row.try_get("cx")?,
            center_y: row.try_get("cy")?,
            width: row.try_get("w")?,
            height: row.try_get("h")?,
        },
    })
}

impl ProjectRepository for ProjectDb {
    async fn get_project_name(&self) -> anyhow::Result<String> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query(r#"SELECT value FROM project_metadata WHERE key = 'name'"#)
            .fetch_one(&mut **conn)
            .await?;
        Ok(row.try_get("value")?)
    }

    async fn get_project_created_at(&self) -> anyhow::Result<OffsetDateTime> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query(r#"SELECT value FROM project_metadata WHERE key = 'created_at'"#)
            .fetch_one(&mut **conn)
            .await?;
        let created_at = OffsetDateTime::parse(row.try_get("value")?, &Rfc3339)?;
        Ok(created_at)
    }

    async fn set_project_settings(&self, settings: UpdateProjectSettings) -> anyhow::Result<()> {
        let mut conn = self.state.conn().await?;
        let mut items = vec![];
        if let Some(name) = settings.name {
            items.push(("name", name));
        }
        if let Some(created_at) = settings.created_at {
            items.push(("created_at", created_at.format(&Rfc3339)?));
        }
        for (key, value) in items {
            sqlx::query(
                r#"INSERT INTO project_metadata (key, value) VALUES ($1, $2)
                ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value"#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut **conn)
            .await?;
        }
        Ok(())
    }

    async fn get_classes(&self) -> anyhow::Result<Vec<String>> {
        let mut conn = self.state.conn().await?;
        let rows = sqlx::query(r#"SELECT name FROM label_class ORDER BY idx ASC"#)
            .fetch_all(&mut **conn)
            .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("name")?))
            .collect()
    }

    async fn set_classes(&self, classes: &[String]) -> anyhow::Result<()> {
        let mut unique = std::collections::HashSet::new();
        for class in classes {
            if !unique.insert(class.as_str()) {
                anyhow::bail!("Duplicate class name: {}", class);
            }
        }

        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin().await?;
        // The positional index is the exported class id; once any stored box
        // references it, replacing the vocabulary would silently relabel
        // every annotation.
        let box_count: i64 = sqlx::query(r#"SELECT COUNT(*) AS n FROM labeled_box"#)
            .fetch_one(&mut *tx)
            .await?
            .try_get("n")?;
        if box_count > 0 {
            return Err(CoreError::ClassListLocked {
                box_count: box_count as u64,
            }
            .into());
        }
        sqlx::query(r#"DELETE FROM label_class"#)
            .execute(&mut *tx)
            .await?;
        for (idx, name) in classes.iter().enumerate() {
            sqlx::query(r#"INSERT INTO label_class (idx, name) VALUES ($1, $2)"#)
                .bind(idx as i64)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

impl ImageRepository for ProjectDb {
    async fn add_image(&self, image: NewImage) -> anyhow::Result<ImageRecord> {
        let (width_px, height_px) = ::image::image_dimensions(&image.source_path)
            .with_context(|| format!("Failed to decode image {:?}", image.source_path))?;
        if width_px == 0 || height_px == 0 {
            return Err(CoreError::MissingDimensions.into());
        }
        let file_name = self.state.store_image(&image.source_path).await?;
        let created_at = OffsetDateTime::now_utc().format(&Rfc3339)?;

        let mut conn = self.state.conn().await?;
        let row = sqlx::query(
            r#"INSERT INTO image (file_name, width_px, height_px, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, file_name, width_px, height_px"#,
        )
        .bind(&file_name)
        .bind(width_px as i64)
        .bind(height_px as i64)
        .bind(created_at)
        .fetch_one(&mut **conn)
        .await?;
        image_record_from_row(&row)
    }

    async fn get_images(&self) -> anyhow::Result<Vec<ImageRecord>> {
        let mut conn = self.state.conn().await?;
        let rows = sqlx::query(
            r#"SELECT id, file_name, width_px, height_px FROM image ORDER BY id ASC"#,
        )
        .fetch_all(&mut **conn)
        .await?;
        rows.iter().map(image_record_from_row).collect()
    }

    async fn get_image_by_id(&self, id: i64) -> anyhow::Result<Option<ImageRecord>> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query(
            r#"SELECT id, file_name, width_px, height_px FROM image WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut **conn)
        .await?;
        row.as_ref().map(image_record_from_row).transpose()
    }

    async fn read_image_bytes(&self, image: &ImageRecord) -> anyhow::Result<Vec<u8>> {
        self.state.read_image_bytes(&image.file_name).await
    }
}

impl AnnotationRepository for ProjectDb {
    async fn save_annotation(
        &self,
        image: &ImageRecord,
        annotator: &str,
        annotation: NewAnnotation,
    ) -> anyhow::Result<AnnotationRecord> {
        let class_count = self.get_classes().await?.len();

        // Any out-of-range class index rejects the write wholesale, before
        // anything touches the database.
        for labeled in &annotation.boxes {
            if labeled.class_index < 0 || labeled.class_index as usize >= class_count {
                return Err(CoreError::InvalidClass {
                    class_index: labeled.class_index,
                    class_count,
                }
                .into());
            }
        }

        // Clamp into the unit square; boxes with no remaining area are
        // dropped individually so one slip of the mouse does not discard the
        // rest of the batch.
        let mut kept = Vec::with_capacity(annotation.boxes.len());
        for (seq, labeled) in annotation.boxes.iter().enumerate() {
            let geometry = labeled.geometry.clamped();
            if geometry.is_degenerate() {
                warn!(
                    image_id = image.id,
                    annotator,
                    "dropping box: {}",
                    CoreError::DegenerateBox { seq }
                );
                continue;
            }
            kept.push(LabeledBox {
                class_index: labeled.class_index,
                geometry,
            });
        }

        let mut conn = self.state.conn().await?;
        let current = sqlx::query(
            r#"SELECT status FROM annotation WHERE image_id = $1 AND annotator = $2"#,
        )
        .bind(image.id)
        .bind(annotator)
        .fetch_optional(&mut **conn)
        .await?
        .map(|row| row.try_get::<i64, _>("status"))
        .transpose()?
        .map(AnnotationStatus::try_from)
        .transpose()?
        .unwrap_or_default();
        check_transition(current, annotation.status, kept.len())?;

        let updated_at = OffsetDateTime::now_utc();
        let status_int = i64::from(annotation.status);

        // Whole-record replace inside one transaction: a reader never sees a
        // half-written box list.
        let mut tx = conn.begin().await?;
        sqlx::query(
            r#"INSERT INTO annotation (image_id, annotator, status, comment, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (image_id, annotator) DO UPDATE SET
                status = EXCLUDED.status,
                comment = EXCLUDED.comment,
                updated_at = EXCLUDED.updated_at"#,
        )
        .bind(image.id)
        .bind(annotator)
        .bind(status_int)
        .bind(&annotation.comment)
        .bind(updated_at.format(&Rfc3339)?)
        .execute(&mut *tx)
        .await?;
        sqlx::query(r#"DELETE FROM labeled_box WHERE image_id = $1 AND annotator = $2"#)
            .bind(image.id)
            .bind(annotator)
            .execute(&mut *tx)
            .await?;
        for (seq, labeled) in kept.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO labeled_box (image_id, annotator, seq, class_idx, cx, cy, w, h)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
            )
            .bind(image.id)
            .bind(annotator)
            .bind(seq as i64)
            .bind(labeled.class_index)
            .bind(labeled.geometry.center_x)
            .bind(labeled.geometry.center_y)
            .bind(labeled.geometry.width)
            .bind(labeled.geometry.height)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(AnnotationRecord {
            image_id: image.id,
            annotator: annotator.to_string(),
            status: annotation.status,
            boxes: kept,
            comment: annotation.comment,
            updated_at,
            _guard: (),
        })
    }

    async fn get_annotation(
        &self,
        image: &ImageRecord,
        annotator: &str,
    ) -> anyhow::Result<Option<AnnotationRecord>> {
        let mut conn = self.state.conn().await?;
        let Some(row) = sqlx::query(
            r#"SELECT status, comment, updated_at FROM annotation
            WHERE image_id = $1 AND annotator = $2"#,
        )
        .bind(image.id)
        .bind(annotator)
        .fetch_optional(&mut **conn)
        .await?
        else {
            return Ok(None);
        };

        let box_rows = sqlx::query(
            r#"SELECT class_idx, cx, cy, w, h FROM labeled_box
            WHERE image_id = $1 AND annotator = $2
            ORDER BY seq ASC"#,
        )
        .bind(image.id)
        .bind(annotator)
        .fetch_all(&mut **conn)
        .await?;
        let boxes = box_rows
            .iter()
            .map(labeled_box_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Some(AnnotationRecord {
            image_id: image.id,
            annotator: annotator.to_string(),
            status: AnnotationStatus::try_from(row.try_get::<i64, _>("status")?)?,
            boxes,
            comment: row.try_get("comment")?,
            updated_at: OffsetDateTime::parse(row.try_get("updated_at")?, &Rfc3339)?,
            _guard: (),
        }))
    }

    async fn annotations_for_image(
        &self,
        image: &ImageRecord,
    ) -> anyhow::Result<HashMap<String, AnnotationRecord>> {
        let mut conn = self.state.conn().await?;
        let record_rows = sqlx::query(
            r#"SELECT annotator, status, comment, updated_at FROM annotation
            WHERE image_id = $1"#,
        )
        .bind(image.id)
        .fetch_all(&mut **conn)
        .await?;
        let box_rows = sqlx::query(
            r#"SELECT annotator, class_idx, cx, cy, w, h FROM labeled_box
            WHERE image_id = $1
            ORDER BY annotator ASC, seq ASC"#,
        )
        .bind(image.id)
        .fetch_all(&mut **conn)
        .await?;

        let mut boxes_by_annotator: HashMap<String, Vec<LabeledBox>> = HashMap::new();
        for row in &box_rows {
            let annotator: String = row.try_get("annotator")?;
            boxes_by_annotator
                .entry(annotator)
                .or_default()
                .push(labeled_box_from_row(row)?);
        }

        let mut map = HashMap::new();
        for row in &record_rows {
            let annotator: String = row.try_get("annotator")?;
            let boxes = boxes_by_annotator.remove(&annotator).unwrap_or_default();
            map.insert(
                annotator.clone(),
                AnnotationRecord {
                    image_id: image.id,
                    annotator,
                    status: AnnotationStatus::try_from(row.try_get::<i64, _>("status")?)?,
                    boxes,
                    comment: row.try_get("comment")?,
                    updated_at: OffsetDateTime::parse(row.try_get("updated_at")?, &Rfc3339)?,
                    _guard: (),
                },
            );
        }
        Ok(map)
    }
}

impl AssignmentRepository for ProjectDb {
    async fn assign(&self, annotator: &str, image_ids: &[i64]) -> anyhow::Result<usize> {
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin().await?;
        let mut added = 0usize;
        for image_id in image_ids {
            let result = sqlx::query(
                r#"INSERT INTO assignment (annotator, image_id, position)
                VALUES ($1, $2, (
                    SELECT COALESCE(MAX(position), -1) + 1 FROM assignment WHERE annotator = $1
                ))
                ON CONFLICT (annotator, image_id) DO NOTHING"#,
            )
            .bind(annotator)
            .bind(image_id)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(added)
    }

    async fn next_pending(&self, annotator: &str) -> anyhow::Result<Option<ImageRecord>> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query(
            r#"SELECT i.id, i.file_name, i.width_px, i.height_px
            FROM assignment a
            JOIN image i ON i.id = a.image_id
            LEFT JOIN annotation ann
                ON ann.image_id = a.image_id AND ann.annotator = a.annotator
            WHERE a.annotator = $1 AND (ann.status IS NULL OR ann.status = 0)
            ORDER BY a.position ASC
            LIMIT 1"#,
        )
        .bind(annotator)
        .fetch_optional(&mut **conn)
        .await?;
        row.as_ref().map(image_record_from_row).transpose()
    }

    async fn revoke_pending(&self, annotator: &str) -> anyhow::Result<usize> {
        let mut conn = self.state.conn().await?;
        let result = sqlx::query(
            r#"DELETE FROM assignment
            WHERE annotator = $1 AND image_id NOT IN (
                SELECT image_id FROM annotation WHERE annotator = $1 AND status != 0
            )"#,
        )
        .bind(annotator)
        .execute(&mut **conn)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn unassigned_images(&self) -> anyhow::Result<Vec<ImageRecord>> {
        let mut conn = self.state.conn().await?;
        let rows = sqlx::query(
            r#"SELECT id, file_name, width_px, height_px FROM image
            WHERE id NOT IN (SELECT image_id FROM assignment)
            ORDER BY id ASC"#,
        )
        .fetch_all(&mut **conn)
        .await?;
        rows.iter().map(image_record_from_row).collect()
    }

    async fn annotators(&self) -> anyhow::Result<Vec<String>> {
        let mut conn = self.state.conn().await?;
        let rows = sqlx::query(
            r#"SELECT DISTINCT annotator FROM assignment ORDER BY annotator ASC"#,
        )
        .fetch_all(&mut **conn)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("annotator")?))
            .collect()
    }

    async fn progress(&self, annotator: &str) -> anyhow::Result<AnnotatorProgress> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query(
            r#"SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN ann.status = 1 THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN ann.status = 2 THEN 1 ELSE 0 END), 0) AS skipped,
                COALESCE(SUM(CASE WHEN ann.status = 3 THEN 1 ELSE 0 END), 0) AS flagged
            FROM assignment a
            LEFT JOIN annotation ann
                ON ann.image_id = a.image_id AND ann.annotator = a.annotator
            WHERE a.annotator = $1"#,
        )
        .bind(annotator)
        .fetch_one(&mut **conn)
        .await?;
        Ok(AnnotatorProgress {
            annotator: annotator.to_string(),
            completed: row.try_get::<i64, _>("completed")? as u64,
            skipped: row.try_get::<i64, _>("skipped")? as u64,
            flagged: row.try_get::<i64, _>("flagged")? as u64,
            total: row.try_get::<i64, _>("total")? as u64,
        })
    }
}
