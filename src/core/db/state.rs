use sqlx::{
    Sqlite,
    pool::PoolConnection,
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
    },
};
use tempdir::TempDir;
use tokio::{
    fs as async_fs,
    sync::{RwLock, RwLockReadGuard},
};

use std::{
    fs::{self, File},
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
};

use anyhow::Context;
use uuid::Uuid;

use tar::{Archive, Builder};
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

const DB_FILE_NAME: &str = "project.db";
const IMAGE_DIR_NAME: &str = "images";

/// Backing state for an open project file: the unpacked working directory
/// (SQLite database plus image store) and the connection pool over it.
pub(super) struct ProjectState {
    project_file: PathBuf,
    working_dir: TempDir,
    pool: RwLock<SqlitePool>,
}

impl std::fmt::Debug for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectState")
            .field("project_file", &self.project_file)
            .field("working_dir", &self.working_dir.path())
            .finish()
    }
}

impl ProjectState {
    /// Acquire a pooled connection. The returned guard holds the pool read
    /// lock for its whole lifetime, so a concurrent save/pack cannot pull the
    /// pool out from under an in-flight query.
    pub(super) async fn conn(&self) -> anyhow::Result<DbConnGuard<'_>> {
        let pool_guard = self.pool.read().await;
        let conn = pool_guard.acquire().await?;
        Ok(DbConnGuard {
            _pool_guard: pool_guard,
            conn,
        })
    }

    /// Copy an image file into the project's image store under a fresh
    /// `<uuid>.<ext>` name, returning that name.
    pub(super) async fn store_image<P: AsRef<Path>>(&self, source: P) -> anyhow::Result<String> {
        let images_dir = self.working_dir.path().join(IMAGE_DIR_NAME);
        let ext = source
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .with_context(|| {
                format!("Image path has no usable extension: {:?}", source.as_ref())
            })?;
        let file_name = format!("{}.{}", Uuid::new_v4(), ext);
        let dest = images_dir.join(&file_name);
        async_fs::copy(&source, &dest).await.with_context(|| {
            format!("Failed to copy image {:?} to {:?}", source.as_ref(), dest)
        })?;
        Ok(file_name)
    }

    pub(super) fn image_path(&self, file_name: &str) -> PathBuf {
        self.working_dir.path().join(IMAGE_DIR_NAME).join(file_name)
    }

    pub(super) async fn read_image_bytes(&self, file_name: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.image_path(file_name);
        let bytes = async_fs::read(&path)
            .await
            .with_context(|| format!("Failed to read stored image {:?}", path))?;
        Ok(bytes)
    }

    /// Pack the working directory into the project archive.
    fn save_tar_zstd(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.project_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let out = File::create(&self.project_file)
            .with_context(|| format!("Failed to create project archive {:?}", self.project_file))?;
        let encoder = ZstdEncoder::new(out, 3).with_context(|| {
            format!("Failed to create zstd encoder for {:?}", self.project_file)
        })?;
        let mut tar = Builder::new(encoder);
        tar.append_dir_all(".", self.working_dir.path())
            .with_context(|| format!("Failed to add {:?} to tar", self.working_dir.path()))?;
        let encoder = tar
            .into_inner()
            .with_context(|| format!("Failed to finalize tar for {:?}", self.project_file))?;
        encoder
            .finish()
            .with_context(|| format!("Failed to finalize zstd stream for {:?}", self.project_file))?;
        Ok(())
    }

    /// Checkpoint, close, and pack. Takes the pool write lock so no query is
    /// running while the database file is archived.
    pub(super) async fn save_project(&self) -> anyhow::Result<()> {
        self.internal_close_and_pack(true).await
    }

    pub(super) async fn internal_close_and_pack(&self, reopen: bool) -> anyhow::Result<()> {
        let mut pool_guard = self.pool.write().await;

        // Flush the WAL into the main database file before packing it.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&*pool_guard)
            .await?;

        // Release file handles; after this any use needs a reopened pool.
        pool_guard.close().await;

        self.save_tar_zstd()?;

        if reopen {
            let db_file = self.working_dir.path().join(DB_FILE_NAME);
            *pool_guard = open_pool(&db_file).await?;
        }
        Ok(())
    }

    pub(super) async fn new<P: AsRef<Path>>(project_file: P) -> anyhow::Result<Self> {
        let project_file = project_file.as_ref().to_path_buf();

        // A missing project file is created empty, provided its parent exists.
        // An empty parent means the file name is relative to the cwd.
        if !project_file.is_file() {
            let parent_ok = project_file
                .parent()
                .map(|p| p.as_os_str().is_empty() || p.is_dir())
                .unwrap_or(false);
            if parent_ok {
                let out = File::create(&project_file).with_context(|| {
                    format!("Failed to create project archive {:?}", project_file)
                })?;
                let encoder = ZstdEncoder::new(out, 3).with_context(|| {
                    format!("Failed to create zstd encoder for {:?}", project_file)
                })?;
                let tar = Builder::new(encoder);
                let encoder = tar
                    .into_inner()
                    .with_context(|| format!("Failed to finalize empty tar {:?}", project_file))?;
                encoder.finish().with_context(|| {
                    format!("Failed to finalize empty zstd stream {:?}", project_file)
                })?;
            } else {
                anyhow::bail!("Project file parent does not exist: {:?}", project_file);
            }
        }

        let working_dir = TempDir::new("labelcrew_project")?;

        {
            let f = File::open(&project_file)
                .with_context(|| format!("Failed to open project archive {:?}", project_file))?;
            let decoder = ZstdDecoder::new(f)
                .with_context(|| format!("Invalid zstd stream in {:?}", project_file))?;
            let mut archive = Archive::new(decoder);
            archive.unpack(working_dir.path()).with_context(|| {
                format!(
                    "Failed to extract archive {:?} into {:?}",
                    project_file,
                    working_dir.path()
                )
            })?;
        }

        let db_file = working_dir.path().join(DB_FILE_NAME);
        let images_dir = working_dir.path().join(IMAGE_DIR_NAME);

        match (db_file.is_file(), images_dir.is_dir()) {
            (true, true) => {}
            (false, false) => {
                fs::create_dir_all(&images_dir)?;
                File::create(&db_file)?;
            }
            (true, false) => anyhow::bail!(
                "Corrupt project: database exists ({:?}) but images dir missing ({:?})",
                db_file,
                images_dir
            ),
            (false, true) => anyhow::bail!(
                "Corrupt project: images dir exists ({:?}) but database missing ({:?})",
                images_dir,
                db_file
            ),
        }

        let pool = open_pool(&db_file).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            project_file,
            working_dir,
            pool: RwLock::new(pool),
        })
    }
}

async fn open_pool(db_file: &Path) -> anyhow::Result<SqlitePool> {
    let connect_opts = SqliteConnectOptions::new()
        .filename(db_file)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_opts)
        .await?;
    Ok(pool)
}

pub struct DbConnGuard<'a> {
    _pool_guard: RwLockReadGuard<'a, SqlitePool>,
    conn: PoolConnection<Sqlite>,
}

impl<'a> Deref for DbConnGuard<'a> {
    type Target = PoolConnection<Sqlite>;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<'a> DerefMut for DbConnGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ProjectState {
    fn drop(&mut self) {
        // Inside a runtime we cannot block; callers there must have called
        // save_project() explicitly. Outside one, do a best-effort pack.
        let result = if tokio::runtime::Handle::try_current().is_ok() {
            Ok(())
        } else {
            match tokio::runtime::Runtime::new() {
                Ok(rt) => rt.block_on(async { self.internal_close_and_pack(false).await }),
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = result {
            tracing::warn!("Failed to save project on drop: {}", e);
        }
    }
}
