pub mod annotation;
pub mod core;
pub mod detection;
pub mod errors;
pub mod models;

pub use annotation::{AnnotationRecord, AnnotationSession, Correction, reconcile};
pub use detection::detect;
pub use errors::{AnnotateError, DetectError, TrainError};
pub use models::{
    Blob, Candidate, CandidateSource, DetectionParameters, DetectionResult, Plaque, PlaqueOrigin,
};
