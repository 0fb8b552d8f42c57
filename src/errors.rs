use thiserror::Error;

/// Errors aborting a detection request. No partial result is produced.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The uploaded bytes could not be decoded into an image, or the decoded
    /// image has degenerate dimensions. Not retryable without a new image.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Malformed detection parameters; the caller must correct and resubmit.
    #[error("invalid detection parameters: {0}")]
    InvalidParameters(String),
}

/// Recoverable annotation-session errors. The canonical plaque list is left
/// unchanged in every case.
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("a plaque already exists within {conflict_radius} px of ({x:.1}, {y:.1})")]
    AddConflict {
        x: f32,
        y: f32,
        conflict_radius: f32,
    },

    #[error("no plaque within {pick_radius} px of ({x:.1}, {y:.1})")]
    RemoveNotFound { x: f32, y: f32, pick_radius: f32 },
}

/// Errors from the retrain path. A rejected call never mutates the model
/// version or the corpus.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("need at least {required} annotated samples to retrain, have {current}")]
    InsufficientCorpus { required: u64, current: u64 },

    /// Another retrain holds the critical section; retry later, no data lost.
    #[error("a retrain is already in progress")]
    RetrainInProgress,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
