use std::f32::consts::PI;

use image::GrayImage;
use imageproc::edges::canny;
use tracing::debug;

use crate::models::{Candidate, CandidateSource, DetectionParameters};

const CANNY_LOW: f32 = 20.0;
const CANNY_HIGH: f32 = 50.0;

const SOBEL_GX: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
const SOBEL_GY: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

/// Vote floor as a fraction of the ideal perimeter support:
/// `SUPPORT_SCALE / sensitivity`, clamped to 1. Lower sensitivity raises
/// the floor and rejects weaker circles.
const SUPPORT_SCALE: f32 = 10.0;

/// Gradient magnitudes below this carry no usable direction.
const MIN_GRADIENT: f32 = 1.0;

/// One vote accumulator over candidate centers, reused across the radius
/// sweep.
struct VoteGrid {
    data: Vec<u32>,
    width: usize,
    height: usize,
}

impl VoteGrid {
    fn new(width: usize, height: usize) -> Self {
        Self {
            data: vec![0; width * height],
            width,
            height,
        }
    }

    fn clear(&mut self) {
        self.data.fill(0);
    }

    #[inline]
    fn vote(&mut self, x: f32, y: f32) {
        let xi = x.round() as isize;
        let yi = y.round() as isize;
        if xi >= 0 && yi >= 0 && (xi as usize) < self.width && (yi as usize) < self.height {
            self.data[yi as usize * self.width + xi as usize] += 1;
        }
    }

    #[inline]
    fn get(&self, x: isize, y: isize) -> u32 {
        if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
            self.data[y as usize * self.width + x as usize]
        } else {
            0
        }
    }

    /// Votes summed over the 3x3 bin neighborhood, absorbing rounding
    /// spread around a true center.
    fn summed(&self) -> Vec<u32> {
        let mut out = vec![0u32; self.width * self.height];
        for y in 0..self.height {
            for x in 0..self.width {
                let mut sum = 0;
                for dy in -1isize..=1 {
                    for dx in -1isize..=1 {
                        sum += self.get(x as isize + dx, y as isize + dy);
                    }
                }
                out[y * self.width + x] = sum;
            }
        }
        out
    }
}

/// 3x3 Sobel response at an interior pixel; `None` on the image border.
fn sobel_at(field: &GrayImage, x: u32, y: u32) -> Option<(f32, f32)> {
    if x == 0 || y == 0 || x + 1 >= field.width() || y + 1 >= field.height() {
        return None;
    }
    let mut gx = 0i32;
    let mut gy = 0i32;
    for ky in 0..3u32 {
        for kx in 0..3u32 {
            let v = field.get_pixel(x + kx - 1, y + ky - 1)[0] as i32;
            gx += v * SOBEL_GX[ky as usize][kx as usize];
            gy += v * SOBEL_GY[ky as usize][kx as usize];
        }
    }
    Some((gx as f32, gy as f32))
}

struct Peak {
    x: u32,
    y: u32,
    radius: u32,
    /// Votes over the ideal perimeter `2*pi*r`; scale-free circle evidence.
    support: f32,
}

/// Radius-swept geometric circle search.
///
/// Edge pixels vote along their gradient direction (both polarities) at each
/// candidate radius; centers whose perimeter support clears the
/// sensitivity-derived floor become peaks, deduplicated within
/// `min_distance`. Confidence is the support normalized against the maximum
/// support observed in this run. An empty result is valid.
pub fn find_circles(field: &GrayImage, params: &DetectionParameters) -> Vec<Candidate> {
    let width = field.width() as usize;
    let height = field.height() as usize;

    let edges = canny(field, CANNY_LOW, CANNY_HIGH);

    // Edge pixels with a unit gradient direction.
    let mut edge_points: Vec<(f32, f32, f32, f32)> = Vec::new();
    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        let Some((dx, dy)) = sobel_at(field, x, y) else {
            continue;
        };
        let mag = (dx * dx + dy * dy).sqrt();
        if mag < MIN_GRADIENT {
            continue;
        }
        edge_points.push((x as f32, y as f32, dx / mag, dy / mag));
    }
    debug!(edge_points = edge_points.len(), "circle vote input");
    if edge_points.is_empty() {
        return Vec::new();
    }

    let support_floor = (SUPPORT_SCALE / params.sensitivity).min(1.0);
    let r_lo = (params.min_radius.ceil() as u32).max(1);
    let r_hi = params.max_radius.floor() as u32;
    if r_lo > r_hi {
        return Vec::new();
    }

    let mut grid = VoteGrid::new(width, height);
    let mut peaks: Vec<Peak> = Vec::new();
    for r in r_lo..=r_hi {
        grid.clear();
        let rf = r as f32;
        for &(x, y, ux, uy) in &edge_points {
            grid.vote(x - rf * ux, y - rf * uy);
            grid.vote(x + rf * ux, y + rf * uy);
        }

        let perimeter = 2.0 * PI * rf;
        let floor_votes = (support_floor * perimeter).ceil() as u32;
        let summed = grid.summed();

        for y in 0..height {
            for x in 0..width {
                let votes = summed[y * width + x];
                if votes < floor_votes {
                    continue;
                }
                // Strict local maximum over the summed grid; equal neighbors
                // both survive here and fall to suppression below.
                let mut is_max = true;
                'nms: for dy in -1isize..=1 {
                    for dx in -1isize..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = x as isize + dx;
                        let ny = y as isize + dy;
                        if nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height {
                            if summed[ny as usize * width + nx as usize] > votes {
                                is_max = false;
                                break 'nms;
                            }
                        }
                    }
                }
                if is_max {
                    peaks.push(Peak {
                        x: x as u32,
                        y: y as u32,
                        radius: r,
                        support: votes as f32 / perimeter,
                    });
                }
            }
        }
    }
    debug!(peaks = peaks.len(), "raw circle peaks");
    if peaks.is_empty() {
        return Vec::new();
    }

    // Single-detector suppression: the same physical circle peaks at
    // adjacent radii; keep the best-supported center per neighborhood.
    peaks.sort_by(|a, b| b.support.total_cmp(&a.support));
    let max_support = peaks[0].support;
    let mut kept: Vec<Peak> = Vec::new();
    for peak in peaks {
        let close = kept.iter().any(|k| {
            let dx = k.x as f32 - peak.x as f32;
            let dy = k.y as f32 - peak.y as f32;
            (dx * dx + dy * dy).sqrt() < params.min_distance
        });
        if !close {
            kept.push(peak);
        }
    }

    kept.into_iter()
        .map(|p| Candidate {
            x: p.x as f32,
            y: p.y as f32,
            radius: p.radius as f32,
            confidence: (p.support / max_support).clamp(0.0, 1.0),
            source: CandidateSource::Circular,
        })
        .collect()
}
