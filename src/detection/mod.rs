pub mod circles;
pub mod contours;
pub mod merge;
pub mod preprocessing;

use tracing::debug;

use crate::errors::DetectError;
use crate::models::{DetectionParameters, DetectionResult};

/// Run the full detection pipeline on encoded image bytes.
///
/// Pure with respect to its inputs: identical bytes and parameters produce
/// an identical plaque list, coordinates through ordering. Errors abort the
/// request with no partial result.
pub fn detect(
    image_id: &str,
    bytes: &[u8],
    params: &DetectionParameters,
) -> Result<DetectionResult, DetectError> {
    params.validate()?;
    let field = preprocessing::preprocess(bytes)?;
    debug!(
        width = field.width(),
        height = field.height(),
        "preprocessed intensity field"
    );

    // The two candidate searches share no state; fork the segmenter branch
    // and join before merging.
    let (circular, irregular) = std::thread::scope(|s| {
        let segmenter = s.spawn(|| contours::find_blobs(&field, params));
        let circular = circles::find_circles(&field, params);
        let irregular = segmenter.join().expect("segmenter branch panicked");
        (circular, irregular)
    });
    debug!(
        circular = circular.len(),
        irregular = irregular.len(),
        "candidate sets"
    );

    let plaques = merge::merge(circular, irregular, params);
    Ok(DetectionResult {
        image_id: image_id.to_string(),
        params: *params,
        plaques,
    })
}
