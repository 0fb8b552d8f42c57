use time::OffsetDateTime;

use crate::annotation::AnnotationRecord;
use crate::models::{DetectionParameters, Plaque};

/// An annotation record as stored in the corpus, keyed by its database id.
/// Records are append-only: once stored they are never mutated or deleted.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: i64,
    pub image_id: String,
    pub sample_name: String,
    pub notes: String,
    pub total_count: u32,
    pub auto_count: u32,
    pub manual_count: u32,
    pub plaques: Vec<Plaque>,
    pub params: DetectionParameters,
    pub created_at: OffsetDateTime,
    pub(super) _guard: (),
}

pub trait RecordRepository {
    /// Append a record to the corpus. Atomic: the record is either fully
    /// stored or not stored at all.
    fn append_record(
        &self,
        record: &AnnotationRecord,
    ) -> impl Future<Output = anyhow::Result<StoredRecord>>;
    fn get_record_by_id(
        &self,
        id: i64,
    ) -> impl Future<Output = anyhow::Result<Option<StoredRecord>>>;
    /// All saved records, most recent first.
    fn list_records(&self) -> impl Future<Output = anyhow::Result<Vec<StoredRecord>>>;
    fn corpus_size(&self) -> impl Future<Output = anyhow::Result<u64>>;
}
