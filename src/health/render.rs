//! Visual overlays for one analyzed image.
//!
//! - Health map: each detection's boundary filled (alpha-blended), outlined
//!   and labelled "disease: confidence" in its severity color.
//! - Contour map: damaged regions merged into a binary mask, external
//!   contours filled, outlined and labelled "Damaged Area N", damage
//!   percentage annotated top-left.
//!
//! Text goes through plotters on a `BitMapBackend` over the overlay buffer.
//!
//! Layers are display-only. Anything that cannot be drawn is skipped and a
//! layer that cannot be produced becomes `None`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_polygon_mut, draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use plotters::prelude::*;
use std::io::Cursor;

use super::fonts::{ensure_registered, FONT_FAMILY};
use crate::config::RenderConfig;
use crate::detection::extract::outer_contours;
use crate::detection::features::polygon_area;
use crate::detection::{Detection, PixelPoint, SeverityBucket};

const LABEL_MARGIN: u32 = 10;
const LABEL_PADDING: u32 = 4;
/// Labels sit this far above the region they name.
const LABEL_OFFSET: i32 = 10;

/// One line of text on an overlay, anchored at its top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct MapLabel {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub color: Rgb<u8>,
}

impl MapLabel {
    /// Label placed just above a region whose top-left corner is `(x, y)`.
    fn above(text: String, x: i32, y: i32, color: Rgb<u8>) -> Self {
        Self {
            text,
            x: x.max(0),
            y: (y - LABEL_OFFSET).max(0),
            color,
        }
    }
}

/// Turns a traced boundary into a polygon imageproc can fill.
///
/// Drops repeated points and an explicit closing point; fewer than three
/// distinct vertices cannot be filled.
pub fn polygon_points(boundary: &[PixelPoint]) -> Option<Vec<Point<i32>>> {
    let mut points: Vec<Point<i32>> = Vec::with_capacity(boundary.len());
    for p in boundary {
        let point = Point::new(p.x, p.y);
        if points.last() != Some(&point) {
            points.push(point);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return None;
    }
    Some(points)
}

fn to_f32(points: &[Point<i32>]) -> Vec<Point<f32>> {
    points
        .iter()
        .map(|p| Point::new(p.x as f32, p.y as f32))
        .collect()
}

pub fn severity_color(severity: SeverityBucket, config: &RenderConfig) -> Rgb<u8> {
    let colors = &config.colors;
    Rgb(match severity {
        SeverityBucket::Healthy => colors.healthy,
        SeverityBucket::Mild => colors.mild,
        SeverityBucket::Moderate => colors.moderate,
        SeverityBucket::Severe => colors.severe,
    })
}

/// `base * (1 - alpha) + overlay * alpha`, per channel.
fn blend(base: &RgbImage, overlay: &RgbImage, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            let v = dst[c] as f32 * (1.0 - alpha) + src[c] as f32 * alpha;
            dst[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Draws the severity-colored health overlay.
pub fn draw_health_map(image: &RgbImage, detections: &[Detection], config: &RenderConfig) -> RgbImage {
    let mut healthy_layer = image.clone();
    let mut disease_layer = image.clone();
    let mut outlines = Vec::with_capacity(detections.len());
    let mut labels = Vec::with_capacity(detections.len());

    for detection in detections {
        let Some(points) = polygon_points(&detection.boundary) else {
            continue;
        };
        let color = severity_color(detection.severity, config);
        if detection.is_healthy() {
            draw_polygon_mut(&mut healthy_layer, &points, color);
        } else {
            draw_polygon_mut(&mut disease_layer, &points, color);
        }
        labels.push(detection_label(detection, color));
        outlines.push((points, color));
    }

    let out = blend(image, &healthy_layer, config.healthy_alpha);
    let mut out = blend(&out, &disease_layer, config.disease_alpha);
    for (points, color) in outlines {
        draw_hollow_polygon_mut(&mut out, &to_f32(&points), color);
    }
    annotate(&mut out, &labels, config.label_font_size);
    out
}

/// "disease: confidence" above the detection's bounding box.
pub fn detection_label(detection: &Detection, color: Rgb<u8>) -> MapLabel {
    MapLabel::above(
        format!("{}: {:.2}", detection.disease_label, detection.confidence),
        detection.bbox.x as i32,
        detection.bbox.y as i32,
        color,
    )
}

/// Binary mask of every non-healthy detection.
pub fn damage_mask(detections: &[Detection], width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for detection in detections.iter().filter(|d| !d.is_healthy()) {
        if let Some(points) = polygon_points(&detection.boundary) {
            draw_polygon_mut(&mut mask, &points, Luma([255]));
        }
    }
    mask
}

/// Draws the filled-contour damage map, or `None` when nothing is damaged.
pub fn draw_contour_map(
    image: &RgbImage,
    detections: &[Detection],
    damage_percentage: f64,
    config: &RenderConfig,
) -> Option<RgbImage> {
    if detections.iter().all(|d| d.is_healthy()) {
        return None;
    }
    let (width, height) = image.dimensions();
    let mask = damage_mask(detections, width, height);

    let contours: Vec<Vec<Point<i32>>> = outer_contours(&mask)
        .into_iter()
        .filter(|boundary| polygon_area(boundary) >= config.min_contour_area)
        .filter_map(|boundary| polygon_points(&boundary))
        .collect();

    let fill = Rgb(config.colors.contour_fill);
    let outline = Rgb(config.colors.contour_outline);

    let mut filled = image.clone();
    for points in &contours {
        draw_polygon_mut(&mut filled, points, fill);
    }
    let mut out = blend(image, &filled, config.contour_alpha);
    let mut labels = Vec::with_capacity(contours.len());
    for (i, points) in contours.iter().enumerate() {
        draw_hollow_polygon_mut(&mut out, &to_f32(points), outline);
        let left = points.iter().map(|p| p.x).min().unwrap_or(0);
        let top = points.iter().map(|p| p.y).min().unwrap_or(0);
        labels.push(MapLabel::above(format!("Damaged Area {}", i + 1), left, top, outline));
    }
    annotate(&mut out, &labels, config.label_font_size);

    annotate_damage(&mut out, damage_percentage, config.annotation_font_size);
    Some(out)
}

/// Draws labels with plotters straight onto the overlay buffer.
pub fn draw_labels(img: &mut RgbImage, labels: &[MapLabel], font_size: u32) -> anyhow::Result<()> {
    if labels.is_empty() {
        return Ok(());
    }
    if !ensure_registered() {
        anyhow::bail!("no font registered for map labels");
    }
    let (width, height) = img.dimensions();
    let root = BitMapBackend::with_buffer(&mut **img, (width, height)).into_drawing_area();
    for label in labels {
        let [r, g, b] = label.color.0;
        let style = (FONT_FAMILY, font_size).into_font().color(&RGBColor(r, g, b));
        root.draw_text(&label.text, &style, (label.x, label.y))?;
    }
    root.present()?;
    Ok(())
}

/// Draws labels, logging and leaving the overlay as-is if text fails.
fn annotate(img: &mut RgbImage, labels: &[MapLabel], font_size: u32) {
    if let Err(e) = draw_labels(img, labels, font_size) {
        crate::log(&format!("Failed to draw map labels: {:#}", e));
    }
}

/// Writes e.g. "Damage: 12.5%" in white on a black box in the top-left corner.
fn annotate_damage(img: &mut RgbImage, damage_percentage: f64, font_size: u32) {
    let text = format!("Damage: {:.1}%", damage_percentage);
    // Estimate character width based on font size
    let char_width = font_size.div_ceil(2).max(1);
    let box_w = text.chars().count() as u32 * char_width + 2 * LABEL_PADDING;
    let box_h = font_size.max(1) + 2 * LABEL_PADDING;
    draw_filled_rect_mut(
        img,
        Rect::at(LABEL_MARGIN as i32, LABEL_MARGIN as i32).of_size(box_w, box_h),
        Rgb([0, 0, 0]),
    );
    let label = MapLabel {
        text,
        x: (LABEL_MARGIN + LABEL_PADDING) as i32,
        y: (LABEL_MARGIN + LABEL_PADDING) as i32,
        color: Rgb([255, 255, 255]),
    };
    annotate(img, &[label], font_size);
}

/// Encodes an image as a base64 PNG string.
pub fn encode_png_base64(img: &RgbImage) -> image::ImageResult<String> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(STANDARD.encode(&buf))
}

/// Encodes a rendered layer, logging and dropping it on failure.
pub fn encode_layer(name: &str, img: Option<RgbImage>) -> Option<String> {
    let img = img?;
    match encode_png_base64(&img) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            crate::log(&format!("Failed to encode {}: {}", name, e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;
    use image::ImageBuffer;

    fn square_detection(x0: i32, y0: i32, side: i32, severity: SeverityBucket) -> Detection {
        Detection {
            region_id: 1,
            crop: "apple".to_string(),
            disease_label: if severity.is_healthy() { "healthy" } else { "black_rot" }.to_string(),
            confidence: 0.7,
            severity,
            area_px: (side * side) as u32,
            bbox: BoundingBox { x: x0 as u32, y: y0 as u32, width: side as u32, height: side as u32 },
            boundary: vec![
                PixelPoint { x: x0, y: y0 },
                PixelPoint { x: x0 + side - 1, y: y0 },
                PixelPoint { x: x0 + side - 1, y: y0 + side - 1 },
                PixelPoint { x: x0, y: y0 + side - 1 },
            ],
        }
    }

    fn gray_image() -> RgbImage {
        ImageBuffer::from_pixel(80, 80, Rgb([100, 100, 100]))
    }

    #[test]
    fn test_polygon_points_guards() {
        assert!(polygon_points(&[]).is_none());
        assert!(polygon_points(&[PixelPoint { x: 1, y: 1 }, PixelPoint { x: 1, y: 1 }]).is_none());

        let closed = [
            PixelPoint { x: 0, y: 0 },
            PixelPoint { x: 5, y: 0 },
            PixelPoint { x: 5, y: 5 },
            PixelPoint { x: 0, y: 0 },
        ];
        let points = polygon_points(&closed).unwrap();
        assert_eq!(points.len(), 3);
        assert_ne!(points.first(), points.last());
    }

    #[test]
    fn test_health_map_tints_diseased_region() {
        let img = gray_image();
        let detections = vec![square_detection(20, 20, 30, SeverityBucket::Severe)];
        let out = draw_health_map(&img, &detections, &RenderConfig::default());

        // inside: 100 * 0.6 + red * 0.4
        let inside = out.get_pixel(35, 35);
        assert_eq!(inside, &Rgb([162, 60, 60]));
        assert_eq!(out.get_pixel(5, 5), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_health_map_skips_degenerate_boundary() {
        let img = gray_image();
        let mut detection = square_detection(20, 20, 30, SeverityBucket::Mild);
        detection.boundary = vec![PixelPoint { x: 3, y: 3 }];
        let out = draw_health_map(&img, &[detection], &RenderConfig::default());
        assert_eq!(out, img);
    }

    #[test]
    fn test_contour_map_none_without_damage() {
        let img = gray_image();
        let detections = vec![square_detection(20, 20, 30, SeverityBucket::Healthy)];
        assert!(draw_contour_map(&img, &detections, 0.0, &RenderConfig::default()).is_none());
        assert!(draw_contour_map(&img, &[], 0.0, &RenderConfig::default()).is_none());
    }

    #[test]
    fn test_contour_map_fills_damage() {
        let img = gray_image();
        let detections = vec![square_detection(30, 30, 40, SeverityBucket::Moderate)];
        let out = draw_contour_map(&img, &detections, 25.0, &RenderConfig::default()).unwrap();

        // 100 * 0.7 + 255 * 0.3 in red, 100 * 0.7 elsewhere
        let inside = out.get_pixel(50, 50);
        assert!((146..=147).contains(&inside[0]), "{:?}", inside);
        assert_eq!(inside[1], 70);
        assert_eq!(inside[2], 70);
        assert_eq!(out.get_pixel(75, 75), &Rgb([100, 100, 100]));
        // annotation box background
        assert_eq!(out.get_pixel(LABEL_MARGIN + 1, LABEL_MARGIN + 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_contour_map_fills_damage_at_image_edge() {
        let img: RgbImage = ImageBuffer::from_pixel(200, 200, Rgb([100, 100, 100]));
        let detections = vec![square_detection(0, 60, 40, SeverityBucket::Moderate)];
        let out = draw_contour_map(&img, &detections, 4.0, &RenderConfig::default()).unwrap();

        let inside = out.get_pixel(20, 80);
        assert!((146..=147).contains(&inside[0]), "{:?}", inside);
        assert_eq!(inside[1], 70);
        assert_eq!(inside[2], 70);
    }

    #[test]
    fn test_labels_follow_detections() {
        let detection = square_detection(20, 30, 10, SeverityBucket::Severe);
        let label = detection_label(&detection, Rgb([255, 0, 0]));
        assert_eq!(label.text, "black_rot: 0.70");
        assert_eq!((label.x, label.y), (20, 20));

        let corner = square_detection(0, 4, 10, SeverityBucket::Mild);
        let label = detection_label(&corner, Rgb([255, 255, 0]));
        assert_eq!((label.x, label.y), (0, 0));
    }

    #[test]
    fn test_draw_labels_writes_text() {
        let mut img = gray_image();
        let label = MapLabel {
            text: "Damaged Area 1".to_string(),
            x: 2,
            y: 2,
            color: Rgb([0, 0, 255]),
        };
        draw_labels(&mut img, &[label], 14).unwrap();
        assert!(img.pixels().any(|p| p[2] > p[0]));
        // below the text line nothing changes
        assert_eq!(img.get_pixel(40, 60), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_health_map_labels_detection() {
        let img = gray_image();
        let detections = vec![square_detection(20, 30, 30, SeverityBucket::Severe)];
        let out = draw_health_map(&img, &detections, &RenderConfig::default());
        // "black_rot: 0.70" in red above the box
        let text_rows = (0..30).flat_map(|y| (20..80).map(move |x| (x, y)));
        let red = text_rows.filter(|&(x, y)| {
            let p = out.get_pixel(x, y);
            p[0] > 150 && p[1] < 100
        });
        assert!(red.count() > 0);
    }

    #[test]
    fn test_damage_mask_ignores_healthy() {
        let detections = vec![
            square_detection(0, 0, 10, SeverityBucket::Healthy),
            square_detection(20, 20, 10, SeverityBucket::Mild),
        ];
        let mask = damage_mask(&detections, 40, 40);
        assert_eq!(mask.get_pixel(5, 5)[0], 0);
        assert_eq!(mask.get_pixel(25, 25)[0], 255);
    }

    #[test]
    fn test_encode_png_base64_decodes() {
        let img = gray_image();
        let encoded = encode_png_base64(&img).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded, img);
    }
}
