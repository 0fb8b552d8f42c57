mod record;
mod state;
mod training;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::annotation::AnnotationRecord;
use crate::errors::TrainError;
use crate::models::{DetectionParameters, Plaque};
use state::CorpusState;

pub use record::{RecordRepository, StoredRecord};
pub use training::{
    CorpusStats, MIN_TRAINING_RECORDS, ModelVersion, TrainingOutcome, TrainingRepository,
};

/// Handle to the corpus archive: the append-only record log, the stored
/// dish images, and the model-version counter. Cloning shares the same
/// underlying state.
#[derive(Debug, Clone)]
pub struct CorpusDb {
    state: Arc<CorpusState>,
}

impl CorpusDb {
    pub async fn new<P: AsRef<Path>>(corpus_file: P) -> anyhow::Result<Self> {
        Ok(Self {
            state: Arc::new(CorpusState::new(corpus_file).await?),
        })
    }

    /// Explicitly save the corpus archive to disk.
    /// Required before dropping in an async context (e.g. #[tokio::test]).
    pub async fn save_corpus(&self) -> anyhow::Result<()> {
        self.state.save_corpus().await
    }

    /// Copy a dish image file into the corpus, returning its image id.
    pub async fn store_image<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<String> {
        self.state.store_image(path).await
    }

    /// Store raw dish image bytes into the corpus, returning its image id.
    pub async fn store_image_bytes(&self, bytes: &[u8], extension: &str) -> anyhow::Result<String> {
        self.state.store_image_bytes(bytes, extension).await
    }

    /// Load the bytes of a stored dish image; errors when the id is unknown.
    pub async fn load_image_bytes(&self, image_id: &str) -> anyhow::Result<Vec<u8>> {
        self.state.load_image_bytes(image_id).await
    }
}

fn row_to_record(row: &SqliteRow) -> anyhow::Result<StoredRecord> {
    let plaques_json: String = row.try_get("plaques")?;
    let plaques: Vec<Plaque> = serde_json::from_str(&plaques_json)
        .context("Corrupt plaque payload in annotation record")?;
    let created_at_str: String = row.try_get("created_at")?;
    let created_at = OffsetDateTime::parse(&created_at_str, &Rfc3339)
        .context("Corrupt timestamp in annotation record")?;
    Ok(StoredRecord {
        id: row.try_get("id")?,
        image_id: row.try_get("image_id")?,
        sample_name: row.try_get("sample_name")?,
        notes: row.try_get("notes")?,
        total_count: row.try_get::<i64, _>("total_count")? as u32,
        auto_count: row.try_get::<i64, _>("auto_count")? as u32,
        manual_count: row.try_get::<i64, _>("manual_count")? as u32,
        plaques,
        params: DetectionParameters {
            min_radius: row.try_get::<f64, _>("min_radius")? as f32,
            max_radius: row.try_get::<f64, _>("max_radius")? as f32,
            sensitivity: row.try_get::<f64, _>("sensitivity")? as f32,
            min_distance: row.try_get::<f64, _>("min_distance")? as f32,
        },
        created_at,
        _guard: (),
    })
}

const RECORD_COLUMNS: &str = "id, image_id, sample_name, notes, total_count, auto_count, \
     manual_count, plaques, min_radius, max_radius, sensitivity, min_distance, created_at";

impl RecordRepository for CorpusDb {
    async fn append_record(&self, record: &AnnotationRecord) -> anyhow::Result<StoredRecord> {
        let mut conn = self.state.conn().await?;
        let plaques_json = serde_json::to_string(&record.plaques)
            .context("Failed to serialize plaque payload")?;
        let created_at = record
            .created_at
            .format(&Rfc3339)
            .context("Failed to format record timestamp")?;
        let row = sqlx::query(
            "INSERT INTO annotation_record \
             (image_id, sample_name, notes, total_count, auto_count, manual_count, plaques, \
              min_radius, max_radius, sensitivity, min_distance, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             RETURNING id",
        )
        .bind(&record.image_id)
        .bind(&record.sample_name)
        .bind(&record.notes)
        .bind(record.total_count as i64)
        .bind(record.auto_count as i64)
        .bind(record.manual_count as i64)
        .bind(&plaques_json)
        .bind(record.params.min_radius as f64)
        .bind(record.params.max_radius as f64)
        .bind(record.params.sensitivity as f64)
        .bind(record.params.min_distance as f64)
        .bind(&created_at)
        .fetch_one(&mut **conn)
        .await
        .context("Failed to append annotation record")?;
        let id: i64 = row.try_get("id")?;
        Ok(StoredRecord {
            id,
            image_id: record.image_id.clone(),
            sample_name: record.sample_name.clone(),
            notes: record.notes.clone(),
            total_count: record.total_count,
            auto_count: record.auto_count,
            manual_count: record.manual_count,
            plaques: record.plaques.clone(),
            params: record.params,
            created_at: record.created_at,
            _guard: (),
        })
    }

    async fn get_record_by_id(&self, id: i64) -> anyhow::Result<Option<StoredRecord>> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM annotation_record WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut **conn)
        .await
        .context("Failed to load annotation record")?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_records(&self) -> anyhow::Result<Vec<StoredRecord>> {
        let mut conn = self.state.conn().await?;
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM annotation_record ORDER BY id DESC"
        ))
        .fetch_all(&mut **conn)
        .await
        .context("Failed to list annotation records")?;
        rows.iter().map(row_to_record).collect()
    }

    async fn corpus_size(&self) -> anyhow::Result<u64> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM annotation_record")
            .fetch_one(&mut **conn)
            .await
            .context("Failed to count annotation records")?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }
}

impl TrainingRepository for CorpusDb {
    async fn model_version(&self) -> anyhow::Result<ModelVersion> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query("SELECT version, trained_on FROM model_state WHERE id = 1")
            .fetch_one(&mut **conn)
            .await
            .context("Failed to load model state")?;
        Ok(ModelVersion {
            version: row.try_get("version")?,
            trained_on: row.try_get("trained_on")?,
        })
    }

    async fn stats(&self) -> anyhow::Result<CorpusStats> {
        let corpus_size = self.corpus_size().await?;
        let model_version = self.model_version().await?;
        Ok(CorpusStats {
            corpus_size,
            model_version: model_version.version,
        })
    }

    async fn retrain(&self) -> Result<TrainingOutcome, TrainError> {
        let Some(_training) = self.state.begin_training() else {
            return Err(TrainError::RetrainInProgress);
        };

        let current = self.corpus_size().await?;
        if current < MIN_TRAINING_RECORDS {
            return Err(TrainError::InsufficientCorpus {
                required: MIN_TRAINING_RECORDS,
                current,
            });
        }

        // The whole corpus is the training input, not a delta since the
        // last run.
        let records = self.list_records().await?;
        let total_plaques: usize = records.iter().map(|r| r.plaques.len()).sum();
        let manual_corrections: u32 = records.iter().map(|r| r.manual_count).sum();
        info!(
            samples = records.len(),
            total_plaques, manual_corrections, "retraining detector from corpus"
        );

        // Single statement, so a crash mid-retrain leaves the version at its
        // pre-retrain value.
        let mut conn = self.state.conn().await?;
        let row = sqlx::query(
            "UPDATE model_state SET version = version + 1, trained_on = ?1 \
             WHERE id = 1 RETURNING version, trained_on",
        )
        .bind(current as i64)
        .fetch_one(&mut **conn)
        .await
        .context("Failed to bump model version")?;
        Ok(TrainingOutcome {
            version: row.try_get("version").context("Missing version column")?,
            trained_on: row
                .try_get("trained_on")
                .context("Missing trained_on column")?,
        })
    }
}
