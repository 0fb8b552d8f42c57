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
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Context;
use uuid::Uuid;

use tar::{Archive, Builder};
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

const DB_FILE_NAME: &str = "corpus.db";
const IMAGE_DIR_NAME: &str = "images";

pub(super) struct CorpusState {
    corpus_file: PathBuf,
    working_dir: TempDir,
    pool: RwLock<SqlitePool>,
    /// Process-wide retrain latch; at most one retrain runs at a time.
    training: AtomicBool,
}

impl std::fmt::Debug for CorpusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusState")
            .field("corpus_file", &self.corpus_file)
            .field("working_dir", &self.working_dir.path())
            .finish()
    }
}

impl CorpusState {
    /// Acquire a pooled connection and hold the pool read lock for the
    /// entire lifetime of the returned guard.
    pub(super) async fn conn(&self) -> anyhow::Result<DbConnGuard<'_>> {
        let pool_guard = self.pool.read().await;

        // IMPORTANT: acquire the connection while the read lock is held.
        // The lock remains held because we store it in DbConnGuard.
        let conn = pool_guard.acquire().await?;

        Ok(DbConnGuard {
            _pool_guard: pool_guard,
            conn,
        })
    }

    /// Try to enter the retrain critical section. Returns `None` when a
    /// retrain is already active; the latch releases when the guard drops.
    pub(super) fn begin_training(&self) -> Option<TrainingGuard<'_>> {
        if self
            .training
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(TrainingGuard {
                flag: &self.training,
            })
        } else {
            None
        }
    }

    /// Read back the bytes of a stored dish image.
    pub(super) async fn load_image_bytes(&self, image_id: &str) -> anyhow::Result<Vec<u8>> {
        let image_path = self
            .working_dir
            .path()
            .join(IMAGE_DIR_NAME)
            .join(image_id);
        let bytes = async_fs::read(&image_path)
            .await
            .with_context(|| format!("Failed to read dish image {:?}", image_path))?;
        Ok(bytes)
    }

    /// Copy a dish image into the corpus, returning the filename used.
    pub(super) async fn store_image<P: AsRef<Path>>(&self, img_path: P) -> anyhow::Result<String> {
        let images_dir = self.working_dir.path().join(IMAGE_DIR_NAME);

        let img_fname = img_path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext_str| format!("{}.{}", Uuid::new_v4(), ext_str))
            .with_context(|| {
                format!(
                    "Image path {:?} has no usable extension",
                    img_path.as_ref()
                )
            })?;
        let dest_path = images_dir.join(&img_fname);
        async_fs::copy(&img_path, &dest_path).await.with_context(|| {
            format!(
                "Failed to copy dish image from {:?} to {:?}",
                img_path.as_ref(),
                dest_path
            )
        })?;
        Ok(img_fname)
    }

    /// Store raw image bytes into the corpus, returning the filename used.
    pub(super) async fn store_image_bytes(
        &self,
        bytes: &[u8],
        extension: &str,
    ) -> anyhow::Result<String> {
        let img_fname = format!("{}.{}", Uuid::new_v4(), extension);
        let dest_path = self
            .working_dir
            .path()
            .join(IMAGE_DIR_NAME)
            .join(&img_fname);
        async_fs::write(&dest_path, bytes)
            .await
            .with_context(|| format!("Failed to write dish image {:?}", dest_path))?;
        Ok(img_fname)
    }

    /// Create a tar.zst archive from the working directory.
    fn save_tar_zstd(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.corpus_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let out = File::create(&self.corpus_file)
            .with_context(|| format!("Failed to create corpus archive {:?}", self.corpus_file))?;

        let encoder = ZstdEncoder::new(out, 3)
            .with_context(|| format!("Failed to create zstd encoder for {:?}", self.corpus_file))?;

        let mut tar = Builder::new(encoder);

        tar.append_dir_all(".", self.working_dir.path())
            .with_context(|| format!("Failed to add {:?} to tar", self.working_dir.path()))?;

        let encoder = tar
            .into_inner()
            .with_context(|| format!("Failed to finalize tar for {:?}", self.corpus_file))?;

        encoder
            .finish()
            .with_context(|| format!("Failed to finalize zstd stream for {:?}", self.corpus_file))?;

        Ok(())
    }

    /// Exclusive close+pack:
    /// - waits for all in-flight queries (takes the pool WRITE lock)
    /// - checkpoints WAL so corpus.db is current
    /// - closes the pool to release file handles
    /// - archives the working dir
    pub(super) async fn save_corpus(&self) -> anyhow::Result<()> {
        self.internal_close_and_pack(true).await
    }

    pub(super) async fn internal_close_and_pack(&self, reopen: bool) -> anyhow::Result<()> {
        // Exclusive write lock for the whole operation: no queries run while
        // we checkpoint/close/pack.
        let mut pool_guard = self.pool.write().await;

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&*pool_guard)
            .await?;

        pool_guard.close().await;

        self.save_tar_zstd()?;

        if reopen {
            let db_file = self.working_dir.path().join(DB_FILE_NAME);
            let connect_opts = SqliteConnectOptions::new()
                .filename(&db_file)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .foreign_keys(true);

            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(connect_opts)
                .await?;
            *pool_guard = pool;
        }
        Ok(())
    }

    pub(super) async fn new<P: AsRef<Path>>(corpus_file: P) -> anyhow::Result<Self> {
        let corpus_file = corpus_file.as_ref().to_path_buf();

        // Ensure the corpus file exists; if not, create an empty tar.zst at
        // that location (if the parent exists).
        if !corpus_file.is_file() {
            // An empty parent means the current directory.
            let parent_ok = corpus_file
                .parent()
                .map(|p| p.as_os_str().is_empty() || p.is_dir())
                .unwrap_or(false);
            if parent_ok {
                let out = File::create(&corpus_file)
                    .with_context(|| format!("Failed to create corpus archive {:?}", corpus_file))?;

                let encoder = ZstdEncoder::new(out, 3)
                    .with_context(|| format!("Failed to create zstd encoder for {:?}", corpus_file))?;

                let tar = Builder::new(encoder);
                let encoder = tar
                    .into_inner()
                    .with_context(|| format!("Failed to finalize empty tar {:?}", corpus_file))?;

                encoder
                    .finish()
                    .with_context(|| format!("Failed to finalize empty zstd stream {:?}", corpus_file))?;
            } else {
                anyhow::bail!("Corpus file parent does not exist: {:?}", corpus_file);
            }
        }

        let working_dir = TempDir::new("plaquelab_corpus")?;

        // Unpack the tar.zst corpus file into the working dir.
        {
            let f = File::open(&corpus_file)
                .with_context(|| format!("Failed to open corpus archive {:?}", corpus_file))?;

            let decoder = ZstdDecoder::new(f)
                .with_context(|| format!("Invalid zstd stream in {:?}", corpus_file))?;

            let mut archive = Archive::new(decoder);
            archive.unpack(working_dir.path()).with_context(|| {
                format!(
                    "Failed to extract archive {:?} into {:?}",
                    corpus_file,
                    working_dir.path()
                )
            })?;
        }

        // Corpus layout expectations
        let db_file = working_dir.path().join(DB_FILE_NAME);
        let images_dir = working_dir.path().join(IMAGE_DIR_NAME);

        let db_exists = db_file.is_file();
        let images_exist = images_dir.is_dir();

        match (db_exists, images_exist) {
            (true, true) => {}
            (false, false) => {
                fs::create_dir_all(&images_dir)?;
                File::create(&db_file)?;
            }
            (true, false) => anyhow::bail!(
                "Corrupt corpus: database exists ({:?}) but images dir missing ({:?})",
                db_file,
                images_dir
            ),
            (false, true) => anyhow::bail!(
                "Corrupt corpus: images dir exists ({:?}) but database missing ({:?})",
                images_dir,
                db_file
            ),
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(&db_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_opts)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            corpus_file,
            working_dir,
            pool: RwLock::new(pool),
            training: AtomicBool::new(false),
        })
    }
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

pub(super) struct TrainingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Drop for CorpusState {
    fn drop(&mut self) {
        // Inside a runtime we cannot block_on; callers are expected to call
        // save_corpus() explicitly before dropping in async contexts.
        let result = if tokio::runtime::Handle::try_current().is_ok() {
            Ok(())
        } else {
            match tokio::runtime::Runtime::new() {
                Ok(rt) => rt.block_on(async { self.internal_close_and_pack(false).await }),
                Err(e) => Err(e.into()),
            }
        };

        if let Err(e) = result {
            eprintln!("Warning: Failed to save corpus on drop: {}", e);
        }
    }
}
