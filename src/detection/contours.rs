use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::open;
use imageproc::region_labelling::{Connectivity, connected_components};
use tracing::debug;

use crate::models::{Blob, Candidate, CandidateSource, DetectionParameters};

/// Half-size of the local-mean window for adaptive thresholding. The window
/// must keep sampling lawn around a typical clearing, or the clearing's
/// interior becomes its own local background and hollows out.
const BLOCK_RADIUS: u32 = 25;
/// A pixel must beat its local mean by this margin to count as a clearing.
const MEAN_OFFSET: i64 = 2;
/// Regions with area below this fraction of their bounding circle are
/// elongated smears or lawn edges, not plaques.
const COMPACTNESS_FLOOR: f32 = 0.6;
const ASPECT_MIN: f32 = 0.7;
const ASPECT_MAX: f32 = 1.4;

/// Mark pixels brighter than the mean of their local window. The threshold
/// follows local intensity, so a global illumination gradient cannot push
/// whole areas above or below one fixed cut.
pub fn adaptive_threshold(img: &GrayImage, block_radius: u32, offset: i64) -> GrayImage {
    let width = img.width() as usize;
    let height = img.height() as usize;

    // Summed-area table with a zero border row/column.
    let mut integral = vec![0u64; (width + 1) * (height + 1)];
    for y in 0..height {
        let mut row_sum = 0u64;
        for x in 0..width {
            row_sum += img.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * (width + 1) + (x + 1)] =
                integral[y * (width + 1) + (x + 1)] + row_sum;
        }
    }
    let window_sum = |x0: usize, y0: usize, x1: usize, y1: usize| -> u64 {
        integral[(y1 + 1) * (width + 1) + (x1 + 1)] + integral[y0 * (width + 1) + x0]
            - integral[y0 * (width + 1) + (x1 + 1)]
            - integral[(y1 + 1) * (width + 1) + x0]
    };

    let r = block_radius as usize;
    let mut out = GrayImage::new(img.width(), img.height());
    for y in 0..height {
        for x in 0..width {
            let x0 = x.saturating_sub(r);
            let y0 = y.saturating_sub(r);
            let x1 = (x + r).min(width - 1);
            let y1 = (y + r).min(height - 1);
            let area = ((x1 - x0 + 1) * (y1 - y0 + 1)) as u64;
            let mean = (window_sum(x0, y0, x1, y1) / area) as i64;
            let value = img.get_pixel(x as u32, y as u32)[0] as i64;
            if value > mean + offset {
                out.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
    }
    out
}

/// Extract connected bright regions as blobs, accumulated in label order so
/// the output is deterministic.
pub fn extract_blobs(binary: &GrayImage) -> Vec<Blob> {
    let labeled = connected_components(binary, Connectivity::Eight, Luma([0u8]));

    let mut regions: BTreeMap<u32, Blob> = BTreeMap::new();
    for (x, y, label) in labeled.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        regions
            .entry(label)
            .and_modify(|blob| {
                blob.min_x = blob.min_x.min(x);
                blob.min_y = blob.min_y.min(y);
                blob.max_x = blob.max_x.max(x);
                blob.max_y = blob.max_y.max(y);
                blob.pixel_count += 1;
                blob.sum_x += x as u64;
                blob.sum_y += y as u64;
            })
            .or_insert(Blob {
                label,
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                pixel_count: 1,
                sum_x: x as u64,
                sum_y: y as u64,
            });
    }
    regions.into_values().collect()
}

/// Adaptive-threshold segmentation for non-circular plaques.
///
/// Threshold, open to drop speckle, label connected regions, then keep
/// regions whose equivalent radius fits the configured band and whose shape
/// is compact enough to be a plaque. Compactness doubles as the confidence.
pub fn find_blobs(field: &GrayImage, params: &DetectionParameters) -> Vec<Candidate> {
    let binary = adaptive_threshold(field, BLOCK_RADIUS, MEAN_OFFSET);
    let cleaned = open(&binary, Norm::LInf, 1);
    let blobs = extract_blobs(&cleaned);
    debug!(regions = blobs.len(), "segmenter regions");

    let mut candidates = Vec::new();
    for blob in blobs {
        let radius = blob.equivalent_radius();
        if radius < params.min_radius || radius > params.max_radius {
            continue;
        }
        let compactness = blob.compactness();
        if compactness < COMPACTNESS_FLOOR {
            continue;
        }
        let aspect = blob.aspect_ratio();
        if !(ASPECT_MIN..=ASPECT_MAX).contains(&aspect) {
            continue;
        }
        let (cx, cy) = blob.centroid();
        candidates.push(Candidate {
            x: cx,
            y: cy,
            radius,
            confidence: compactness,
            source: CandidateSource::Irregular,
        });
    }
    debug!(candidates = candidates.len(), "segmenter candidates");
    candidates
}
