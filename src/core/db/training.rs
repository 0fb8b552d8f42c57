use crate::errors::TrainError;

/// Minimum number of saved annotation records before a retrain is allowed.
pub const MIN_TRAINING_RECORDS: u64 = 5;

/// Durable training-generation marker: the version counter and the corpus
/// size the current version was trained on. Starts at (0, 0); bumped by
/// exactly 1 only by a successful retrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelVersion {
    pub version: i64,
    pub trained_on: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingOutcome {
    pub version: i64,
    pub trained_on: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusStats {
    pub corpus_size: u64,
    pub model_version: i64,
}

pub trait TrainingRepository {
    fn model_version(&self) -> impl Future<Output = anyhow::Result<ModelVersion>>;
    fn stats(&self) -> impl Future<Output = anyhow::Result<CorpusStats>>;
    /// Consume the entire corpus as training input and bump the model
    /// version. Rejected when fewer than [`MIN_TRAINING_RECORDS`] records
    /// exist or another retrain is active; a rejected call mutates nothing.
    fn retrain(&self) -> impl Future<Output = Result<TrainingOutcome, TrainError>>;
}
