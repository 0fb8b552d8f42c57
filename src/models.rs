use serde::{Deserialize, Serialize};

use crate::errors::DetectError;

/// Provenance of a plaque: produced by a detector, or placed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaqueOrigin {
    Auto,
    Manual,
}

/// A detected or manually marked clearing in the dish.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plaque {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// Normalized certainty, comparable only within one detection run.
    pub confidence: f32,
    pub origin: PlaqueOrigin,
}

impl Plaque {
    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        let dx = self.x - x;
        let dy = self.y - y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Tunable detection knobs, validated before any pixel work starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParameters {
    pub min_radius: f32,
    pub max_radius: f32,
    /// Higher sensitivity lowers the vote floor and admits weaker candidates.
    pub sensitivity: f32,
    /// Minimum center spacing enforced between reported plaques.
    pub min_distance: f32,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            min_radius: 5.0,
            max_radius: 50.0,
            sensitivity: 30.0,
            min_distance: 20.0,
        }
    }
}

impl DetectionParameters {
    pub fn validate(&self) -> Result<(), DetectError> {
        if self.min_radius <= 0.0 || self.max_radius <= 0.0 {
            return Err(DetectError::InvalidParameters(format!(
                "radii must be positive (min_radius {}, max_radius {})",
                self.min_radius, self.max_radius
            )));
        }
        if self.min_radius >= self.max_radius {
            return Err(DetectError::InvalidParameters(format!(
                "min_radius {} must be smaller than max_radius {}",
                self.min_radius, self.max_radius
            )));
        }
        if self.sensitivity <= 0.0 {
            return Err(DetectError::InvalidParameters(format!(
                "sensitivity must be positive, got {}",
                self.sensitivity
            )));
        }
        if self.min_distance <= 0.0 {
            return Err(DetectError::InvalidParameters(format!(
                "min_distance must be positive, got {}",
                self.min_distance
            )));
        }
        Ok(())
    }
}

/// Which detector branch produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Circular,
    Irregular,
}

/// An unfiltered, pre-deduplication detection from one detector branch.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub confidence: f32,
    pub source: CandidateSource,
}

impl Candidate {
    pub fn distance_to(&self, other: &Candidate) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// The merger's deduplicated output for one image/parameter pair.
///
/// Invariants: no two plaques are closer than `params.min_distance`, and
/// every radius lies in `[params.min_radius, params.max_radius]`.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub image_id: String,
    pub params: DetectionParameters,
    pub plaques: Vec<Plaque>,
}

impl DetectionResult {
    pub fn count(&self) -> usize {
        self.plaques.len()
    }
}

/// A connected region extracted by the adaptive-threshold segmenter.
#[derive(Debug, Clone)]
pub struct Blob {
    pub label: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub pixel_count: u32,
    pub sum_x: u64,
    pub sum_y: u64,
}

impl Blob {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn centroid(&self) -> (f32, f32) {
        (
            self.sum_x as f32 / self.pixel_count as f32,
            self.sum_y as f32 / self.pixel_count as f32,
        )
    }

    /// Radius of the circle with the same area as the region.
    pub fn equivalent_radius(&self) -> f32 {
        (self.pixel_count as f32 / std::f32::consts::PI).sqrt()
    }

    /// Region area over the area of the bounding circle, clamped to 1.
    /// Near 1 for filled discs, small for elongated smears.
    pub fn compactness(&self) -> f32 {
        let enclosing = self.width().max(self.height()) as f32 / 2.0;
        if enclosing == 0.0 {
            return 0.0;
        }
        let fill = self.pixel_count as f32 / (std::f32::consts::PI * enclosing * enclosing);
        fill.min(1.0)
    }

    pub fn aspect_ratio(&self) -> f32 {
        let h = self.height() as f32;
        if h == 0.0 {
            return 0.0;
        }
        self.width() as f32 / h
    }
}
