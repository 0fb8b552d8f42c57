use std::f32::consts::PI;

use tracing::debug;

use crate::models::{Candidate, DetectionParameters, Plaque, PlaqueOrigin};

/// Two candidates conflict when the intersection covers more than this
/// fraction of the smaller circle's area.
const OVERLAP_FRACTION: f32 = 0.5;

/// Greedy non-maximum suppression over both detector branches.
///
/// The union is ordered circular-first; a stable sort by descending
/// confidence therefore resolves ties in favor of circular-origin
/// candidates, and first-encountered within equal origin. A candidate is
/// kept only if it neither comes closer than `min_distance` to nor overlaps
/// (by circle area) any already-kept candidate. Deterministic for identical
/// inputs.
pub fn merge(
    circular: Vec<Candidate>,
    irregular: Vec<Candidate>,
    params: &DetectionParameters,
) -> Vec<Plaque> {
    let mut candidates = circular;
    candidates.extend(irregular);
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Candidate> = Vec::new();
    'candidates: for cand in candidates {
        for existing in &kept {
            if cand.distance_to(existing) < params.min_distance
                || overlap_fraction(&cand, existing) > OVERLAP_FRACTION
            {
                continue 'candidates;
            }
        }
        kept.push(cand);
    }
    debug!(kept = kept.len(), "merged candidate sets");

    kept.into_iter()
        .map(|c| Plaque {
            x: c.x,
            y: c.y,
            radius: c.radius,
            confidence: c.confidence,
            origin: PlaqueOrigin::Auto,
        })
        .collect()
}

/// Area of the intersection of two circles over the smaller circle's area.
fn overlap_fraction(a: &Candidate, b: &Candidate) -> f32 {
    let d = a.distance_to(b);
    let r_small = a.radius.min(b.radius);
    let r_big = a.radius.max(b.radius);
    if d >= r_small + r_big {
        return 0.0;
    }
    if d <= r_big - r_small {
        return 1.0;
    }

    // Circular lens area of two intersecting circles.
    let d2 = d * d;
    let rs2 = r_small * r_small;
    let rb2 = r_big * r_big;
    let alpha = ((d2 + rs2 - rb2) / (2.0 * d * r_small)).clamp(-1.0, 1.0);
    let beta = ((d2 + rb2 - rs2) / (2.0 * d * r_big)).clamp(-1.0, 1.0);
    let lens = rs2 * alpha.acos() + rb2 * beta.acos()
        - 0.5
            * ((-d + r_small + r_big)
                * (d + r_small - r_big)
                * (d - r_small + r_big)
                * (d + r_small + r_big))
                .max(0.0)
                .sqrt();
    lens / (PI * rs2)
}
