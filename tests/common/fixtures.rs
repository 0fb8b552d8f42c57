use std::io::Cursor;

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use time::OffsetDateTime;

use plaquelab::annotation::AnnotationRecord;
use plaquelab::core::db::CorpusDb;
use plaquelab::models::{DetectionParameters, DetectionResult, Plaque, PlaqueOrigin};

/// Background intensity of the synthetic bacterial lawn.
pub const LAWN: u8 = 40;
/// Intensity of a synthetic plaque clearing.
pub const CLEARING: u8 = 220;

pub fn encode_png(img: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("Failed to encode test image");
    bytes
}

/// A synthetic dish: uniform lawn with filled circular clearings.
pub fn dish_image(width: u32, height: u32, circles: &[(i32, i32, i32)]) -> Vec<u8> {
    let mut img = GrayImage::from_pixel(width, height, Luma([LAWN]));
    for &(x, y, r) in circles {
        draw_filled_circle_mut(&mut img, (x, y), r, Luma([CLEARING]));
    }
    encode_png(&img)
}

/// A dish containing only an elongated bright smear.
pub fn smear_image(width: u32, height: u32) -> Vec<u8> {
    let mut img = GrayImage::from_pixel(width, height, Luma([LAWN]));
    draw_filled_rect_mut(
        &mut img,
        Rect::at(40, 60).of_size(60, 8),
        Luma([CLEARING]),
    );
    encode_png(&img)
}

pub fn default_params() -> DetectionParameters {
    DetectionParameters {
        min_radius: 5.0,
        max_radius: 50.0,
        sensitivity: 30.0,
        min_distance: 20.0,
    }
}

pub fn auto_plaque(x: f32, y: f32, radius: f32) -> Plaque {
    Plaque {
        x,
        y,
        radius,
        confidence: 0.8,
        origin: PlaqueOrigin::Auto,
    }
}

/// A detection result built directly, bypassing the pipeline.
pub fn make_detection(plaques: Vec<Plaque>) -> DetectionResult {
    DetectionResult {
        image_id: "test-image".to_string(),
        params: default_params(),
        plaques,
    }
}

/// A ready-made annotation record with one auto and one manual plaque.
pub fn make_record(sample_name: &str) -> AnnotationRecord {
    let plaques = vec![
        auto_plaque(30.0, 30.0, 10.0),
        Plaque {
            x: 90.0,
            y: 90.0,
            radius: 10.0,
            confidence: 1.0,
            origin: PlaqueOrigin::Manual,
        },
    ];
    AnnotationRecord {
        image_id: "test-image".to_string(),
        sample_name: sample_name.to_string(),
        notes: String::new(),
        total_count: 2,
        auto_count: 1,
        manual_count: 1,
        plaques,
        params: default_params(),
        created_at: OffsetDateTime::now_utc(),
    }
}

/// Creates a CorpusDb backed by a temporary archive file.
/// Returns both the db and the temp directory (which must be kept alive).
pub async fn create_test_corpus() -> (CorpusDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join("test.plaquelab");
    let db = CorpusDb::new(&path)
        .await
        .expect("Failed to create test corpus");
    (db, dir)
}
