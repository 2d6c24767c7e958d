//! Bounding-box and crosshair overlay rendering.
//!
//! Boxes arrive in the vision model's normalized 0–1000 space as
//! `[ymin, xmin, ymax, xmax]` and are converted with exact
//! `floor(n * size / 1000)` math. Each element gets a 1-based numbered
//! label; label placement searches rings of candidate positions and
//! scores them so that connecting lines do not cross other boxes and
//! labels do not cover boxes or each other. The whole pass is
//! deterministic: identical input produces identical output.

use crate::error::ServerError;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Bright, distinct palette; elements cycle through it.
const PALETTE: [[u8; 3]; 8] = [
    [0xFF, 0x00, 0x00], // red
    [0x00, 0xFF, 0x00], // green
    [0xFF, 0xFF, 0x00], // yellow
    [0x00, 0x00, 0xFF], // blue
    [0xFF, 0x00, 0xFF], // magenta
    [0x00, 0xFF, 0xFF], // cyan
    [0xFF, 0x80, 0x00], // orange
    [0x80, 0x00, 0xFF], // purple
];

/// Boxes whose centers are within this distance form a cluster.
const CLUSTER_DISTANCE: f64 = 80.0;

/// Candidate rings for clustered boxes start farther out.
const CLUSTERED_DISTANCES: [f64; 6] = [80.0, 120.0, 160.0, 200.0, 250.0, 300.0];
const ISOLATED_DISTANCES: [f64; 5] = [40.0, 60.0, 80.0, 120.0, 160.0];

/// Placements scoring worse than this trigger the corner fallback.
const SEVERE_PENALTY: f64 = 1000.0;

const CROSSHAIR_ARM: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverlayMode {
    #[default]
    Bbox,
    Crosshair,
}

impl OverlayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bbox => "bbox",
            Self::Crosshair => "crosshair",
        }
    }
}

/// A box in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl PixelBox {
    fn center(&self) -> (f64, f64) {
        (
            (self.x1 + self.x2) as f64 / 2.0,
            (self.y1 + self.y2) as f64 / 2.0,
        )
    }

    fn area(&self) -> i64 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x1 as f64 && x <= self.x2 as f64 && y >= self.y1 as f64 && y <= self.y2 as f64
    }
}

/// Exact normalized→pixel conversion: `⌊n · size / 1000⌋` per component.
/// Input boxes are `[ymin, xmin, ymax, xmax]`.
pub fn to_pixel_box(normalized: [i64; 4], width: u32, height: u32) -> PixelBox {
    let [ymin, xmin, ymax, xmax] = normalized;
    PixelBox {
        x1: xmin * i64::from(width) / 1000,
        y1: ymin * i64::from(height) / 1000,
        x2: xmax * i64::from(width) / 1000,
        y2: ymax * i64::from(height) / 1000,
    }
}

/// Render `boxes` onto `image_bytes` and return PNG bytes.
pub fn render(
    image_bytes: &[u8],
    boxes: &[[i64; 4]],
    mode: OverlayMode,
) -> Result<Vec<u8>, ServerError> {
    let decoded = image::load_from_memory(image_bytes)
        .map_err(|e| ServerError::bad_arguments("screenshot", format!("not a decodable image: {e}")))?;
    let mut img = decoded.to_rgba8();
    let (width, height) = (img.width(), img.height());

    let pixel_boxes: Vec<PixelBox> = boxes
        .iter()
        .map(|b| to_pixel_box(*b, width, height))
        .collect();

    let labels = place_labels(&pixel_boxes, f64::from(width), f64::from(height));

    for (idx, (pb, label_pos)) in pixel_boxes.iter().zip(&labels).enumerate() {
        let color = Rgba([
            PALETTE[idx % PALETTE.len()][0],
            PALETTE[idx % PALETTE.len()][1],
            PALETTE[idx % PALETTE.len()][2],
            0xFF,
        ]);
        let (cx, cy) = pb.center();

        match mode {
            OverlayMode::Bbox => draw_rect_outline(&mut img, pb, color, 3),
            OverlayMode::Crosshair => draw_crosshair(&mut img, cx as i64, cy as i64, color),
        }

        let (lx, ly) = *label_pos;
        draw_line(&mut img, lx as i64, ly as i64, cx as i64, cy as i64, color);

        let text = (idx + 1).to_string();
        let radius = label_radius(text.len());
        draw_label_circle(&mut img, lx, ly, radius, color);
        draw_digits(&mut img, lx, ly, &text);
    }

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| ServerError::BackendError(format!("failed to encode overlay: {e}")))?;
    Ok(out)
}

// ============================================================================
// Label placement
// ============================================================================

/// Circle radius for a label of `len` digits. Width approximates 8 px per
/// digit, height 12 px, with padding.
fn label_radius(len: usize) -> f64 {
    let text_width = (len * 8) as f64;
    let text_height = 12.0;
    (text_width.max(text_height) / 2.0 + 3.0).max(15.0)
}

/// Greedy cluster detection: each unassigned box seeds a cluster and
/// absorbs every other unassigned box whose center is within range.
fn detect_clusters(boxes: &[PixelBox]) -> Vec<Vec<usize>> {
    let mut clusters = Vec::new();
    let mut assigned = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if assigned[i] {
            continue;
        }
        let mut cluster = vec![i];
        assigned[i] = true;
        let (cx1, cy1) = boxes[i].center();
        for j in 0..boxes.len() {
            if assigned[j] {
                continue;
            }
            let (cx2, cy2) = boxes[j].center();
            if dist(cx1, cy1, cx2, cy2) < CLUSTER_DISTANCE {
                cluster.push(j);
                assigned[j] = true;
            }
        }
        if cluster.len() > 1 {
            clusters.push(cluster);
        }
    }
    clusters
}

fn cluster_boundary(cluster: &[usize], boxes: &[PixelBox]) -> PixelBox {
    PixelBox {
        x1: cluster.iter().map(|&i| boxes[i].x1).min().unwrap_or(0),
        y1: cluster.iter().map(|&i| boxes[i].y1).min().unwrap_or(0),
        x2: cluster.iter().map(|&i| boxes[i].x2).max().unwrap_or(0),
        y2: cluster.iter().map(|&i| boxes[i].y2).max().unwrap_or(0),
    }
}

/// Place all labels, most constrained boxes first (clustered, then by
/// area ascending).
fn place_labels(boxes: &[PixelBox], width: f64, height: f64) -> Vec<(f64, f64)> {
    let clusters = detect_clusters(boxes);
    let in_cluster = |idx: usize| clusters.iter().find(|c| c.contains(&idx));

    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by_key(|&idx| {
        let group = if in_cluster(idx).is_some() { 0 } else { 1 };
        (group, boxes[idx].area())
    });

    let mut placed: Vec<Option<(f64, f64)>> = vec![None; boxes.len()];
    for idx in order {
        let cluster = in_cluster(idx).map(|c| cluster_boundary(c, boxes));
        let pos = find_label_position(idx, boxes, &placed, cluster, width, height);
        placed[idx] = Some(pos);
    }
    placed.into_iter().map(|p| p.unwrap_or((0.0, 0.0))).collect()
}

fn find_label_position(
    idx: usize,
    boxes: &[PixelBox],
    placed: &[Option<(f64, f64)>],
    cluster: Option<PixelBox>,
    width: f64,
    height: f64,
) -> (f64, f64) {
    let (cx, cy) = boxes[idx].center();
    let text_len = (idx + 1).to_string().len();
    let radius = label_radius(text_len);

    let distances: &[f64] = if cluster.is_some() {
        &CLUSTERED_DISTANCES
    } else {
        &ISOLATED_DISTANCES
    };

    let mut best: Option<(f64, f64)> = None;
    let mut best_penalty = f64::INFINITY;

    for &distance in distances {
        for step in 0..24 {
            let angle = (step * 15) as f64;
            let rad = angle.to_radians();
            // min-then-max keeps tiny images from inverting the bounds.
            let margin = 30.0;
            let lx = (cx + distance * rad.cos()).min(width - margin).max(margin);
            let ly = (cy + distance * rad.sin()).min(height - margin).max(margin);

            let penalty = score_position(
                idx, boxes, placed, cluster, cx, cy, lx, ly, radius, width, height,
            );
            if penalty < best_penalty {
                best_penalty = penalty;
                best = Some((lx, ly));
            }
        }
    }

    // Corner/edge fallback when every candidate is badly penalized.
    if best.is_none() || best_penalty > SEVERE_PENALTY {
        let fallbacks = [
            (60.0, 60.0),
            (width - 60.0, 60.0),
            (60.0, height - 60.0),
            (width - 60.0, height - 60.0),
            (width / 2.0, 60.0),
            (width / 2.0, height - 60.0),
            (60.0, height / 2.0),
            (width - 60.0, height / 2.0),
        ];
        for (lx, ly) in fallbacks {
            let crosses = boxes.iter().enumerate().any(|(i, b)| {
                i != idx && segment_intersects_box(cx, cy, lx, ly, b)
            });
            if crosses {
                continue;
            }
            let conflicts = placed.iter().flatten().any(|&(ox, oy)| {
                dist(lx, ly, ox, oy) < 60.0
            });
            if !conflicts {
                return (lx, ly);
            }
        }
        return best.unwrap_or((cx + 100.0, cy - 100.0));
    }

    best.unwrap_or((cx + 100.0, cy - 100.0))
}

#[allow(clippy::too_many_arguments)]
fn score_position(
    idx: usize,
    boxes: &[PixelBox],
    placed: &[Option<(f64, f64)>],
    cluster: Option<PixelBox>,
    cx: f64,
    cy: f64,
    lx: f64,
    ly: f64,
    radius: f64,
    width: f64,
    height: f64,
) -> f64 {
    let mut penalty = 0.0;

    // Line-of-sight and coverage against every other box.
    for (i, b) in boxes.iter().enumerate() {
        if i == idx {
            continue;
        }
        if segment_intersects_box(cx, cy, lx, ly, b) {
            penalty += 2000.0;
        }
        if b.contains(lx, ly) {
            penalty += 1500.0;
        }
        let label_rect = PixelBox {
            x1: (lx - radius) as i64,
            y1: (ly - radius) as i64,
            x2: (lx + radius) as i64,
            y2: (ly + radius) as i64,
        };
        if rects_overlap(&label_rect, b) {
            penalty += (b.area() as f64 / 50.0).min(800.0);
        }
    }

    // Proximity to labels already placed.
    for &(ox, oy) in placed.iter().flatten() {
        let between = dist(lx, ly, ox, oy);
        let min_distance = radius + 15.0 + 15.0;
        if between < min_distance {
            penalty += (min_distance - between) * 15.0;
        }
    }

    // Clustered boxes prefer positions pointing out of the cluster.
    if let Some(boundary) = cluster {
        let (ccx, ccy) = boundary.center();
        let to_center = dist(ccx, ccy, cx, cy);
        let label_from_center = dist(ccx, ccy, lx, ly);
        if label_from_center < to_center {
            penalty += 300.0;
        } else {
            penalty -= 50.0;
        }
    }

    // Distance from the center: cheap for clustered boxes, mild otherwise.
    let actual = dist(lx, ly, cx, cy);
    penalty += actual * if cluster.is_some() { 0.02 } else { 0.1 };

    // Stay clear of the image edges.
    let edge = 40.0;
    if lx < edge {
        penalty += (edge - lx) * 3.0;
    }
    if lx > width - edge {
        penalty += (lx - (width - edge)) * 3.0;
    }
    if ly < edge {
        penalty += (edge - ly) * 3.0;
    }
    if ly > height - edge {
        penalty += (ly - (height - edge)) * 3.0;
    }

    if let Some(boundary) = cluster {
        if cx - (boundary.x1 as f64) < 20.0 && lx < cx {
            penalty -= 100.0;
        } else if (boundary.x2 as f64) - cx < 20.0 && lx > cx {
            penalty -= 100.0;
        } else if cy - (boundary.y1 as f64) < 20.0 && ly < cy {
            penalty -= 100.0;
        } else if (boundary.y2 as f64) - cy < 20.0 && ly > cy {
            penalty -= 100.0;
        }
    }

    penalty
}

// ============================================================================
// Geometry
// ============================================================================

fn dist(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt()
}

fn rects_overlap(a: &PixelBox, b: &PixelBox) -> bool {
    !(a.x2 < b.x1 || b.x2 < a.x1 || a.y2 < b.y1 || b.y2 < a.y1)
}

/// Segment/rectangle intersection: endpoint containment plus edge tests.
fn segment_intersects_box(x1: f64, y1: f64, x2: f64, y2: f64, b: &PixelBox) -> bool {
    if b.contains(x1, y1) || b.contains(x2, y2) {
        return true;
    }
    let (bx1, by1, bx2, by2) = (b.x1 as f64, b.y1 as f64, b.x2 as f64, b.y2 as f64);
    let edges = [
        ((bx1, by1), (bx2, by1)),
        ((bx2, by1), (bx2, by2)),
        ((bx2, by2), (bx1, by2)),
        ((bx1, by2), (bx1, by1)),
    ];
    edges
        .iter()
        .any(|&(p3, p4)| segments_intersect((x1, y1), (x2, y2), p3, p4))
}

fn segments_intersect(p1: (f64, f64), p2: (f64, f64), p3: (f64, f64), p4: (f64, f64)) -> bool {
    fn ccw(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> bool {
        (c.1 - a.1) * (b.0 - a.0) > (b.1 - a.1) * (c.0 - a.0)
    }
    ccw(p1, p3, p4) != ccw(p2, p3, p4) && ccw(p1, p2, p3) != ccw(p1, p2, p4)
}

// ============================================================================
// Drawing primitives
// ============================================================================

fn put(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rect_outline(img: &mut RgbaImage, b: &PixelBox, color: Rgba<u8>, thickness: i64) {
    for t in 0..thickness {
        for x in b.x1..=b.x2 {
            put(img, x, b.y1 + t, color);
            put(img, x, b.y2 - t, color);
        }
        for y in b.y1..=b.y2 {
            put(img, b.x1 + t, y, color);
            put(img, b.x2 - t, y, color);
        }
    }
}

fn draw_crosshair(img: &mut RgbaImage, cx: i64, cy: i64, color: Rgba<u8>) {
    for x in (cx - CROSSHAIR_ARM)..=(cx + CROSSHAIR_ARM) {
        put(img, x, cy, color);
    }
    for y in (cy - CROSSHAIR_ARM)..=(cy + CROSSHAIR_ARM) {
        put(img, cx, y, color);
    }
}

/// Bresenham line, 1 px wide.
fn draw_line(img: &mut RgbaImage, x1: i64, y1: i64, x2: i64, y2: i64, color: Rgba<u8>) {
    let dx = (x2 - x1).abs();
    let dy = -(y2 - y1).abs();
    let sx = if x1 < x2 { 1 } else { -1 };
    let sy = if y1 < y2 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x1, y1);
    loop {
        put(img, x, y, color);
        if x == x2 && y == y2 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Filled circle with a 2 px white outline.
fn draw_label_circle(img: &mut RgbaImage, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
    let white = Rgba([0xFF, 0xFF, 0xFF, 0xFF]);
    let outer = radius + 2.0;
    let r = outer.ceil() as i64;
    let (icx, icy) = (cx as i64, cy as i64);
    for dy in -r..=r {
        for dx in -r..=r {
            let d = ((dx * dx + dy * dy) as f64).sqrt();
            if d <= radius {
                put(img, icx + dx, icy + dy, color);
            } else if d <= outer {
                put(img, icx + dx, icy + dy, white);
            }
        }
    }
}

/// 5×7 bitmap digits, drawn in 8×12 cells centered on the label.
const DIGITS: [[u8; 7]; 10] = [
    [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111], // 2
    [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110], // 3
    [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110], // 5
    [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000], // 7
    [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100], // 9
];

fn draw_digits(img: &mut RgbaImage, cx: f64, cy: f64, text: &str) {
    let white = Rgba([0xFF, 0xFF, 0xFF, 0xFF]);
    let total_width = (text.len() * 8) as i64;
    let start_x = cx as i64 - total_width / 2;
    let start_y = cy as i64 - 6;

    for (i, c) in text.chars().enumerate() {
        let Some(digit) = c.to_digit(10) else { continue };
        let glyph = DIGITS[digit as usize];
        let gx = start_x + (i as i64) * 8 + 1;
        let gy = start_y + 2;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..5 {
                if bits & (1 << (4 - col)) != 0 {
                    put(img, gx + col, gy + row as i64, white);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_image(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([240, 240, 240, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn pixel_conversion_is_exact_floor_math() {
        let pb = to_pixel_box([10, 20, 30, 40], 1280, 720);
        assert_eq!(pb.x1, 20 * 1280 / 1000);
        assert_eq!(pb.y1, 10 * 720 / 1000);
        assert_eq!(pb.x2, 40 * 1280 / 1000);
        assert_eq!(pb.y2, 30 * 720 / 1000);
    }

    #[test]
    fn render_is_deterministic() {
        let img = test_image(640, 480);
        let boxes = vec![[100, 100, 300, 300], [500, 600, 700, 900]];
        let first = render(&img, &boxes, OverlayMode::Bbox).unwrap();
        let second = render(&img, &boxes, OverlayMode::Bbox).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn modes_produce_different_output() {
        let img = test_image(640, 480);
        let boxes = vec![[100, 100, 300, 300]];
        let bbox = render(&img, &boxes, OverlayMode::Bbox).unwrap();
        let crosshair = render(&img, &boxes, OverlayMode::Crosshair).unwrap();
        assert_ne!(bbox, crosshair);
    }

    #[test]
    fn render_rejects_garbage_input() {
        let err = render(b"not an image", &[[0, 0, 10, 10]], OverlayMode::Bbox).unwrap_err();
        assert_eq!(err.kind(), "BadArguments");
    }

    #[test]
    fn sparse_labels_avoid_other_boxes() {
        // Two well-separated boxes: the optimum placement has no heavy
        // penalties, so lines must not cross the other box and labels
        // must not cover it.
        let boxes = vec![
            to_pixel_box([100, 100, 200, 200], 1000, 1000),
            to_pixel_box([700, 700, 800, 800], 1000, 1000),
        ];
        let labels = place_labels(&boxes, 1000.0, 1000.0);
        assert_eq!(labels.len(), 2);

        for (idx, &(lx, ly)) in labels.iter().enumerate() {
            let (cx, cy) = boxes[idx].center();
            for (other, b) in boxes.iter().enumerate() {
                if other == idx {
                    continue;
                }
                assert!(
                    !segment_intersects_box(cx, cy, lx, ly, b),
                    "label line for box {idx} crosses box {other}"
                );
                assert!(!b.contains(lx, ly), "label {idx} sits inside box {other}");
            }
        }
    }

    #[test]
    fn clustered_boxes_get_labels_for_each() {
        // Four boxes bunched together still get one label each.
        let boxes: Vec<PixelBox> = [
            [100, 100, 160, 160],
            [100, 170, 160, 230],
            [170, 100, 230, 160],
            [170, 170, 230, 230],
        ]
        .iter()
        .map(|b| to_pixel_box(*b, 800, 800))
        .collect();
        let labels = place_labels(&boxes, 800.0, 800.0);
        assert_eq!(labels.len(), 4);
        for &(lx, ly) in &labels {
            assert!((0.0..=800.0).contains(&lx));
            assert!((0.0..=800.0).contains(&ly));
        }
    }

    #[test]
    fn cluster_detection_groups_near_centers() {
        let boxes = vec![
            PixelBox { x1: 0, y1: 0, x2: 40, y2: 40 },
            PixelBox { x1: 50, y1: 0, x2: 90, y2: 40 },
            PixelBox { x1: 500, y1: 500, x2: 540, y2: 540 },
        ];
        let clusters = detect_clusters(&boxes);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0], vec![0, 1]);
    }

    proptest! {
        /// Property: pixel coordinates equal ⌊n·size/1000⌋ component-wise.
        #[test]
        fn normalization_matches_float_floor(
            y1 in 0i64..=1000, x1 in 0i64..=1000,
            y2 in 0i64..=1000, x2 in 0i64..=1000,
            w in 1u32..=2000, h in 1u32..=2000,
        ) {
            let pb = to_pixel_box([y1, x1, y2, x2], w, h);
            let floor = |n: i64, size: u32| {
                ((n as f64) * f64::from(size) / 1000.0).floor() as i64
            };
            prop_assert_eq!(pb.x1, floor(x1, w));
            prop_assert_eq!(pb.y1, floor(y1, h));
            prop_assert_eq!(pb.x2, floor(x2, w));
            prop_assert_eq!(pb.y2, floor(y2, h));
        }
    }
}
