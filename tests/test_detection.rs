//! Integration tests for the detection pipeline.
//!
//! Tests cover:
//! - Well-separated circles recovered with accurate centers and radii
//! - Overlap suppression between close detections
//! - Empty dishes and smear-only dishes producing zero plaques
//! - Determinism and the radius/min-distance invariants
//! - Parameter and image validation errors

mod common;

use common::*;

use plaquelab::detection::merge::merge;
use plaquelab::models::{Candidate, CandidateSource, Plaque};
use plaquelab::{DetectError, detect};

fn assert_found(plaques: &[Plaque], x: f32, y: f32, r: f32) -> Plaque {
    *plaques
        .iter()
        .find(|p| {
            let dx = p.x - x;
            let dy = p.y - y;
            (dx * dx + dy * dy).sqrt() <= 2.0 && (p.radius - r).abs() <= 2.0
        })
        .unwrap_or_else(|| panic!("no plaque within 2 px of ({x}, {y}) r={r}: {plaques:?}"))
}

#[test]
fn test_three_separated_circles() -> anyhow::Result<()> {
    // 1. Dish with three well-separated clearings of radius 10, 20, 30
    let bytes = dish_image(200, 200, &[(50, 50, 10), (140, 60, 20), (70, 150, 30)]);

    // 2. Detect with the default parameter set
    let result = detect("dish", &bytes, &default_params())?;

    // 3. Exactly three plaques, each near its true center and radius
    assert_eq!(result.count(), 3, "plaques: {:?}", result.plaques);
    for (x, y, r) in [(50.0, 50.0, 10.0), (140.0, 60.0, 20.0), (70.0, 150.0, 30.0)] {
        let plaque = assert_found(&result.plaques, x, y, r);
        assert!(
            plaque.confidence > 0.5,
            "weak confidence {} at ({x}, {y})",
            plaque.confidence
        );
    }

    Ok(())
}

#[test]
fn test_overlapping_circles_suppressed() -> anyhow::Result<()> {
    // Two clearings whose centers are 10 px apart, min_distance 20
    let bytes = dish_image(128, 128, &[(60, 64, 12), (70, 64, 8)]);

    let result = detect("dish", &bytes, &default_params())?;

    // The higher-confidence candidate suppresses the other
    assert_eq!(result.count(), 1, "plaques: {:?}", result.plaques);

    Ok(())
}

#[test]
fn test_empty_dish_is_not_an_error() -> anyhow::Result<()> {
    let bytes = dish_image(160, 160, &[]);

    let result = detect("dish", &bytes, &default_params())?;

    assert_eq!(result.count(), 0);

    Ok(())
}

#[test]
fn test_smear_is_rejected() -> anyhow::Result<()> {
    // An elongated bright bar is neither circular nor compact
    let bytes = smear_image(160, 160);

    let result = detect("dish", &bytes, &default_params())?;

    assert_eq!(result.count(), 0, "plaques: {:?}", result.plaques);

    Ok(())
}

#[test]
fn test_detection_is_deterministic() -> anyhow::Result<()> {
    let bytes = dish_image(200, 200, &[(50, 50, 10), (140, 60, 20), (70, 150, 30)]);
    let params = default_params();

    let first = detect("dish", &bytes, &params)?;
    let second = detect("dish", &bytes, &params)?;

    // Identical coordinates, radii, confidences and order
    assert_eq!(first.plaques, second.plaques);

    Ok(())
}

#[test]
fn test_result_invariants_hold() -> anyhow::Result<()> {
    let bytes = dish_image(
        200,
        200,
        &[
            (40, 40, 8),
            (100, 40, 18),
            (160, 40, 30),
            (40, 120, 25),
            (120, 130, 12),
        ],
    );
    let params = default_params();

    let result = detect("dish", &bytes, &params)?;

    for plaque in &result.plaques {
        assert!(
            plaque.radius >= params.min_radius && plaque.radius <= params.max_radius,
            "radius {} outside [{}, {}]",
            plaque.radius,
            params.min_radius,
            params.max_radius
        );
        assert!((0.0..=1.0).contains(&plaque.confidence));
    }
    for (i, a) in result.plaques.iter().enumerate() {
        for b in &result.plaques[i + 1..] {
            assert!(
                a.distance_to(b.x, b.y) >= params.min_distance,
                "plaques closer than min_distance: {a:?} {b:?}"
            );
        }
    }

    Ok(())
}

#[test]
fn test_invalid_parameters_rejected() {
    let bytes = dish_image(64, 64, &[]);

    let mut params = default_params();
    params.min_radius = 50.0;
    params.max_radius = 5.0;
    assert!(matches!(
        detect("dish", &bytes, &params),
        Err(DetectError::InvalidParameters(_))
    ));

    let mut params = default_params();
    params.max_radius = -1.0;
    assert!(matches!(
        detect("dish", &bytes, &params),
        Err(DetectError::InvalidParameters(_))
    ));

    let mut params = default_params();
    params.sensitivity = 0.0;
    assert!(matches!(
        detect("dish", &bytes, &params),
        Err(DetectError::InvalidParameters(_))
    ));
}

#[test]
fn test_undecodable_image_rejected() {
    let garbage = b"definitely not an image";
    assert!(matches!(
        detect("dish", garbage, &default_params()),
        Err(DetectError::InvalidImage(_))
    ));
}

#[test]
fn test_segmenter_accepts_disc_rejects_smear() -> anyhow::Result<()> {
    use plaquelab::detection::{contours, preprocessing};

    let disc_field = preprocessing::preprocess(&dish_image(120, 120, &[(60, 60, 12)]))?;
    let found = contours::find_blobs(&disc_field, &default_params());
    assert_eq!(found.len(), 1, "candidates: {found:?}");
    assert!((found[0].x - 60.0).abs() <= 2.0);
    assert!((found[0].y - 60.0).abs() <= 2.0);
    assert!((found[0].radius - 12.0).abs() <= 3.0);
    assert!(found[0].confidence >= 0.6);

    let bar_field = preprocessing::preprocess(&smear_image(160, 160))?;
    assert!(contours::find_blobs(&bar_field, &default_params()).is_empty());

    Ok(())
}

fn candidate(x: f32, y: f32, radius: f32, confidence: f32, source: CandidateSource) -> Candidate {
    Candidate {
        x,
        y,
        radius,
        confidence,
        source,
    }
}

#[test]
fn test_merge_tie_prefers_circular() {
    let circular = vec![candidate(50.0, 50.0, 10.0, 0.8, CandidateSource::Circular)];
    let irregular = vec![candidate(58.0, 50.0, 10.0, 0.8, CandidateSource::Irregular)];

    let merged = merge(circular, irregular, &default_params());

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].x, 50.0);
}

#[test]
fn test_merge_suppresses_within_min_distance() {
    let circular = vec![
        candidate(50.0, 50.0, 8.0, 0.9, CandidateSource::Circular),
        candidate(60.0, 50.0, 8.0, 0.8, CandidateSource::Circular),
    ];

    let merged = merge(circular, Vec::new(), &default_params());

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].x, 50.0);
}

#[test]
fn test_merge_suppresses_heavy_area_overlap() {
    // Centers 24 px apart clear min_distance 20, but the discs share more
    // than half of the smaller area
    let circular = vec![
        candidate(50.0, 50.0, 30.0, 0.9, CandidateSource::Circular),
        candidate(74.0, 50.0, 30.0, 0.8, CandidateSource::Circular),
    ];

    let merged = merge(circular, Vec::new(), &default_params());

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].x, 50.0);
}

#[test]
fn test_merge_keeps_distant_candidates() {
    let circular = vec![candidate(40.0, 40.0, 10.0, 0.9, CandidateSource::Circular)];
    let irregular = vec![candidate(120.0, 40.0, 12.0, 0.7, CandidateSource::Irregular)];

    let merged = merge(circular, irregular, &default_params());

    assert_eq!(merged.len(), 2);
    // Output is confidence-ordered
    assert!(merged[0].confidence >= merged[1].confidence);
}
