mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from plaquelab for tests
pub use plaquelab::core::db::{
    CorpusDb, CorpusStats, MIN_TRAINING_RECORDS, ModelVersion, RecordRepository, StoredRecord,
    TrainingRepository,
};
