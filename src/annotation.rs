use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::errors::AnnotateError;
use crate::models::{DetectionParameters, DetectionResult, Plaque, PlaqueOrigin};

/// Minimum spacing enforced for manual additions. Independent of the
/// detection `min_distance`.
pub const ADD_CONFLICT_RADIUS: f32 = 15.0;
/// How far a removal click may land from the plaque it targets.
pub const PICK_RADIUS: f32 = 15.0;
/// Radius assigned to manually placed plaques.
pub const MANUAL_RADIUS: f32 = 10.0;

/// One user correction against the canonical plaque list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "action")]
pub enum Correction {
    Add { x: f32, y: f32 },
    Remove { x: f32, y: f32 },
}

/// Immutable snapshot of a reconciled annotation session.
///
/// Counts are recomputed from the origin tags at finalization, so
/// `total_count == auto_count + manual_count == plaques.len()` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub image_id: String,
    pub sample_name: String,
    pub notes: String,
    pub total_count: u32,
    pub auto_count: u32,
    pub manual_count: u32,
    pub plaques: Vec<Plaque>,
    pub params: DetectionParameters,
    pub created_at: OffsetDateTime,
}

/// In-progress reconciliation of one detection result with user
/// corrections. Holds the single canonical list of tagged plaques; counts
/// are always derived, never tracked separately.
#[derive(Debug, Clone)]
pub struct AnnotationSession {
    image_id: String,
    params: DetectionParameters,
    plaques: Vec<Plaque>,
}

impl AnnotationSession {
    /// Seed the canonical list from a detection result, in detection order.
    pub fn new(result: &DetectionResult) -> Self {
        Self {
            image_id: result.image_id.clone(),
            params: result.params,
            plaques: result.plaques.clone(),
        }
    }

    /// Current canonical list: detection order first, then manual additions
    /// in the order they were made. Numbering is positional; removal leaves
    /// no gaps to renumber.
    pub fn plaques(&self) -> &[Plaque] {
        &self.plaques
    }

    /// Place a manual plaque. Rejected if any existing plaque, auto or
    /// manual, lies within the conflict radius; the list is unchanged on
    /// rejection.
    pub fn add(&mut self, x: f32, y: f32) -> Result<Plaque, AnnotateError> {
        if self
            .plaques
            .iter()
            .any(|p| p.distance_to(x, y) < ADD_CONFLICT_RADIUS)
        {
            return Err(AnnotateError::AddConflict {
                x,
                y,
                conflict_radius: ADD_CONFLICT_RADIUS,
            });
        }
        let plaque = Plaque {
            x,
            y,
            radius: MANUAL_RADIUS,
            confidence: 1.0,
            origin: PlaqueOrigin::Manual,
        };
        self.plaques.push(plaque);
        Ok(plaque)
    }

    /// Delete the nearest plaque within the pick radius. A miss is a
    /// recoverable no-op, not a fatal error.
    pub fn remove(&mut self, x: f32, y: f32) -> Result<Plaque, AnnotateError> {
        let mut nearest: Option<(usize, f32)> = None;
        for (index, plaque) in self.plaques.iter().enumerate() {
            let distance = plaque.distance_to(x, y);
            if distance > PICK_RADIUS {
                continue;
            }
            if nearest.is_none_or(|(_, best)| distance < best) {
                nearest = Some((index, distance));
            }
        }
        match nearest {
            Some((index, _)) => Ok(self.plaques.remove(index)),
            None => Err(AnnotateError::RemoveNotFound {
                x,
                y,
                pick_radius: PICK_RADIUS,
            }),
        }
    }

    /// Apply an ordered correction sequence. Rejected corrections are
    /// skipped and leave the list unchanged; returns how many applied.
    pub fn apply(&mut self, corrections: &[Correction]) -> usize {
        let mut applied = 0;
        for correction in corrections {
            let outcome = match *correction {
                Correction::Add { x, y } => self.add(x, y).map(|_| ()),
                Correction::Remove { x, y } => self.remove(x, y).map(|_| ()),
            };
            match outcome {
                Ok(()) => applied += 1,
                Err(e) => debug!(error = %e, "correction skipped"),
            }
        }
        applied
    }

    /// Snapshot the session into an immutable record. Provenance counts are
    /// recomputed from the current origin tags: a removed auto plaque does
    /// not count, and a manual plaque is always counted as manual.
    pub fn finalize(&self, sample_name: &str, notes: &str) -> AnnotationRecord {
        let auto_count = self
            .plaques
            .iter()
            .filter(|p| p.origin == PlaqueOrigin::Auto)
            .count() as u32;
        let manual_count = self.plaques.len() as u32 - auto_count;
        AnnotationRecord {
            image_id: self.image_id.clone(),
            sample_name: sample_name.to_string(),
            notes: notes.to_string(),
            total_count: auto_count + manual_count,
            auto_count,
            manual_count,
            plaques: self.plaques.clone(),
            params: self.params,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Merge a detection result with an ordered correction sequence into a
/// record snapshot.
pub fn reconcile(
    result: &DetectionResult,
    corrections: &[Correction],
    sample_name: &str,
    notes: &str,
) -> AnnotationRecord {
    let mut session = AnnotationSession::new(result);
    session.apply(corrections);
    session.finalize(sample_name, notes)
}
