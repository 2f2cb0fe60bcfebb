//! Farm-wide visualizations.
//!
//! - Health map: plotters scatter of tree locations colored by status.
//! - Contour map: smoothed health field (tree scores and tree counts
//!   Gaussian-blurred on a cell grid, then divided), color-coded
//!   red → yellow → green, with iso-contours at 20/40/60/80 and a dot per
//!   tree. Cells no tree reaches stay white.
//!
//! Both are rendered in memory and handed out as base64 PNG strings.

use anyhow::{Context, Result};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::contours::find_contours;
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_polygon_mut};
use imageproc::filter::gaussian_blur_f32;
use imageproc::point::Point;
use plotters::prelude::*;

use super::session::TreeRecord;
use crate::config::RenderConfig;
use crate::detection::PixelPoint;
use crate::health::fonts::{ensure_registered, FONT_FAMILY};
use crate::health::render::{encode_layer, polygon_points};
use crate::health::HealthStatus;

/// Border around plotted trees, in pixels.
const MARGIN: u32 = 40;
/// Side of one health-field sample cell, in pixels.
const FIELD_CELL: u32 = 4;
/// Iso-contour levels drawn over the health field.
pub const CONTOUR_LEVELS: [f64; 4] = [20.0, 40.0, 60.0, 80.0];
/// Blurred tree weight below which a cell counts as "no data".
const MIN_FIELD_WEIGHT: f32 = 1e-9;
/// Background for cells without data.
const NO_DATA: Rgb<u8> = Rgb([255, 255, 255]);

fn status_color(status: HealthStatus, config: &RenderConfig) -> RGBColor {
    let c = match status {
        HealthStatus::Excellent | HealthStatus::Good => config.colors.healthy,
        HealthStatus::Fair => config.colors.mild,
        HealthStatus::Poor => config.colors.moderate,
        HealthStatus::Critical => config.colors.severe,
    };
    RGBColor(c[0], c[1], c[2])
}

/// Data bounds of the tree locations, padded so single trees or rows still
/// get a non-empty range.
fn location_bounds(trees: &[TreeRecord]) -> ((f64, f64), (f64, f64)) {
    let mut x = (f64::MAX, f64::MIN);
    let mut y = (f64::MAX, f64::MIN);
    for tree in trees {
        x = (x.0.min(tree.location.x), x.1.max(tree.location.x));
        y = (y.0.min(tree.location.y), y.1.max(tree.location.y));
    }
    let pad = |(lo, hi): (f64, f64)| {
        let span = hi - lo;
        if span <= f64::EPSILON {
            (lo - 1.0, hi + 1.0)
        } else {
            (lo - span * 0.05, hi + span * 0.05)
        }
    };
    (pad(x), pad(y))
}

/// Scatter chart of tree locations colored by status.
pub fn draw_farm_health_map(trees: &[TreeRecord], config: &RenderConfig) -> Result<Option<RgbImage>> {
    if trees.is_empty() {
        return Ok(None);
    }
    let (width, height) = (config.farm_map_width.max(2 * MARGIN + 1), config.farm_map_height.max(2 * MARGIN + 1));
    let ((x_min, x_max), (y_min, y_max)) = location_bounds(trees);

    if !ensure_registered() {
        anyhow::bail!("no font registered for chart text");
    }

    let mut buffer = vec![0u8; (width * height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE).context("Failed to fill health map background")?;

        let mut chart = ChartBuilder::on(&root)
            .caption(
                format!("Farm Health Map ({} trees)", trees.len()),
                (FONT_FAMILY, config.annotation_font_size),
            )
            .margin(MARGIN / 2)
            .x_label_area_size(MARGIN)
            .y_label_area_size(MARGIN)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)
            .context("Failed to build health map")?;

        let grid_color = RGBColor(220, 220, 220);
        chart
            .configure_mesh()
            .x_desc("x")
            .y_desc("y")
            .x_label_formatter(&|x| format!("{:.1}", x))
            .y_label_formatter(&|y| format!("{:.1}", y))
            .label_style((FONT_FAMILY, config.label_font_size))
            .light_line_style(grid_color)
            .bold_line_style(grid_color.mix(0.8))
            .draw()
            .context("Failed to draw mesh")?;

        chart
            .draw_series(trees.iter().map(|tree| {
                Circle::new(
                    (tree.location.x, tree.location.y),
                    8,
                    status_color(tree.status, config).filled(),
                )
            }))
            .context("Failed to draw trees")?;
        chart.draw_series(
            trees
                .iter()
                .map(|tree| Circle::new((tree.location.x, tree.location.y), 8, BLACK.stroke_width(1))),
        )?;

        root.present().context("Failed to render health map")?;
    }

    let img = RgbImage::from_raw(width, height, buffer).context("Health map buffer has the wrong size")?;
    Ok(Some(img))
}

/// Red (0) → yellow (50) → green (100).
pub fn health_color(health: f64) -> Rgb<u8> {
    let t = (health / 100.0).clamp(0.0, 1.0);
    if t < 0.5 {
        let k = t / 0.5;
        Rgb([255, (255.0 * k).round() as u8, 0])
    } else {
        let k = (t - 0.5) / 0.5;
        Rgb([(255.0 * (1.0 - k)).round() as u8, (255.0 - 127.0 * k).round() as u8, 0])
    }
}

/// Normalized Gaussian health field over a `cols` x `rows` cell grid.
///
/// `cells` holds `(col, row, health)` per tree. Scores and tree counts are
/// blurred separately and divided, so every cell is a distance-weighted mean
/// of nearby trees. Cells outside every tree's kernel are `None`.
pub fn health_field(cells: &[(u32, u32, f64)], cols: u32, rows: u32, sigma: f32) -> Vec<Option<f64>> {
    let mut values: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::new(cols, rows);
    let mut weights: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::new(cols, rows);
    for &(col, row, health) in cells {
        if col < cols && row < rows {
            values.get_pixel_mut(col, row)[0] += health as f32;
            weights.get_pixel_mut(col, row)[0] += 1.0;
        }
    }

    let sigma = sigma.max(0.5);
    let values = gaussian_blur_f32(&values, sigma);
    let weights = gaussian_blur_f32(&weights, sigma);

    values
        .pixels()
        .zip(weights.pixels())
        .map(|(v, w)| (w[0] > MIN_FIELD_WEIGHT).then(|| (v[0] / w[0]) as f64))
        .collect()
}

/// Interpolated health field with iso-contours and tree dots.
pub fn draw_farm_contour_map(trees: &[TreeRecord], config: &RenderConfig) -> Option<RgbImage> {
    if trees.is_empty() {
        return None;
    }
    let (width, height) = (config.farm_map_width.max(2 * MARGIN + 1), config.farm_map_height.max(2 * MARGIN + 1));
    let ((x_min, x_max), (y_min, y_max)) = location_bounds(trees);

    // Tree positions in pixel space (y grows downwards)
    let plot_w = (width - 2 * MARGIN) as f64;
    let plot_h = (height - 2 * MARGIN) as f64;
    let points: Vec<(f64, f64, f64)> = trees
        .iter()
        .map(|t| {
            let px = MARGIN as f64 + (t.location.x - x_min) / (x_max - x_min) * plot_w;
            let py = MARGIN as f64 + (y_max - t.location.y) / (y_max - y_min) * plot_h;
            (px, py, t.health_score)
        })
        .collect();

    let cols = width.div_ceil(FIELD_CELL);
    let rows = height.div_ceil(FIELD_CELL);
    let cells: Vec<(u32, u32, f64)> = points
        .iter()
        .map(|&(px, py, health)| {
            let col = ((px / FIELD_CELL as f64) as u32).min(cols - 1);
            let row = ((py / FIELD_CELL as f64) as u32).min(rows - 1);
            (col, row, health)
        })
        .collect();
    let sigma = (plot_w.min(plot_h) / 8.0 / FIELD_CELL as f64) as f32;
    let field = health_field(&cells, cols, rows, sigma);

    let mut img = RgbImage::from_fn(width, height, |x, y| {
        let idx = ((y / FIELD_CELL) * cols + x / FIELD_CELL) as usize;
        field[idx].map(health_color).unwrap_or(NO_DATA)
    });

    let outline = Rgb([40, 40, 40]);
    for level in CONTOUR_LEVELS {
        let mask = GrayImage::from_fn(cols, rows, |c, r| {
            let above = field[(r * cols + c) as usize].is_some_and(|h| h >= level);
            Luma([if above { 255 } else { 0 }])
        });
        for contour in find_contours::<i32>(&mask) {
            let scaled: Vec<PixelPoint> = contour
                .points
                .iter()
                .map(|p| PixelPoint {
                    x: p.x * FIELD_CELL as i32 + FIELD_CELL as i32 / 2,
                    y: p.y * FIELD_CELL as i32 + FIELD_CELL as i32 / 2,
                })
                .collect();
            if let Some(poly) = polygon_points(&scaled) {
                let poly: Vec<Point<f32>> = poly.iter().map(|p| Point::new(p.x as f32, p.y as f32)).collect();
                draw_hollow_polygon_mut(&mut img, &poly, outline);
            }
        }
    }

    for &(px, py, _) in &points {
        draw_filled_circle_mut(&mut img, (px.round() as i32, py.round() as i32), 5, Rgb([0, 0, 0]));
    }

    Some(img)
}

/// Base64 PNG of the farm health map, `None` if empty or on failure.
pub fn farm_health_map(trees: &[TreeRecord], config: &RenderConfig) -> Option<String> {
    match draw_farm_health_map(trees, config) {
        Ok(img) => encode_layer("farm health map", img),
        Err(e) => {
            crate::log(&format!("Failed to render farm health map: {:#}", e));
            None
        }
    }
}

/// Base64 PNG of the farm contour map, `None` if empty.
pub fn farm_contour_map(trees: &[TreeRecord], config: &RenderConfig) -> Option<String> {
    encode_layer("farm contour map", draw_farm_contour_map(trees, config))
}
