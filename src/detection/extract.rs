//! Region candidate extraction.
//!
//! Segments an image against one disease signature: color mask, morphology
//! cleanup, 8-connected components, early area filter, outer contour.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::region_labelling::{connected_components, Connectivity};

use super::preprocess::{clean_mask, color_mask, PreparedImage};
use super::signatures::DiseaseSignature;
use super::{BoundingBox, PixelPoint};

/// One connected region of signature-colored pixels, not yet scored.
#[derive(Debug, Clone)]
pub struct CandidateRegion {
    /// Bounding box in image coordinates
    pub bbox: BoundingBox,
    /// Number of pixels in the component
    pub area_px: u32,
    /// Component mask, bbox-sized (255 = member pixel)
    pub mask: GrayImage,
    /// Outer contour in image coordinates
    pub boundary: Vec<PixelPoint>,
}

impl CandidateRegion {
    /// Iterates member pixels in image coordinates.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (ox, oy) = (self.bbox.x, self.bbox.y);
        self.mask
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] > 0)
            .map(move |(x, y, _)| (ox + x, oy + y))
    }
}

#[derive(Debug, Clone, Copy)]
struct ComponentStats {
    count: u32,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl ComponentStats {
    fn new(x: u32, y: u32) -> Self {
        Self {
            count: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        self.count += 1;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}

/// Extracts candidate regions for one signature.
///
/// Regions smaller than `min_region_area` are dropped before any scoring work.
pub fn extract_candidates(
    prepared: &PreparedImage,
    signature: &DiseaseSignature,
    morph_radius: u8,
) -> Vec<CandidateRegion> {
    let mask = color_mask(&prepared.hsv, &signature.color_ranges);
    let mask = clean_mask(&mask, morph_radius);
    regions_from_mask(&mask, signature.min_region_area)
}

/// Splits a binary mask into connected regions of at least `min_area` pixels.
pub fn regions_from_mask(mask: &GrayImage, min_area: u32) -> Vec<CandidateRegion> {
    let (width, height) = mask.dimensions();
    // connected_components asserts on single-pixel images
    if (width as u64) * (height as u64) < 2 {
        return single_pixel_region(mask, min_area).into_iter().collect();
    }
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut stats: Vec<Option<ComponentStats>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if stats.len() <= label {
            stats.resize(label + 1, None);
        }
        stats[label]
            .get_or_insert_with(|| ComponentStats::new(x, y))
            .add(x, y);
    }

    let mut regions = Vec::new();
    for (label, component) in stats.iter().enumerate() {
        let Some(component) = component else {
            continue;
        };
        if component.count < min_area {
            continue;
        }

        let bbox = BoundingBox {
            x: component.min_x,
            y: component.min_y,
            width: component.max_x - component.min_x + 1,
            height: component.max_y - component.min_y + 1,
        };
        let region_mask = GrayImage::from_fn(bbox.width, bbox.height, |x, y| {
            let member = labels.get_pixel(bbox.x + x, bbox.y + y)[0] as usize == label;
            Luma([if member { 255 } else { 0 }])
        });

        let Some(boundary) = outer_contour(&region_mask, &bbox) else {
            continue;
        };

        regions.push(CandidateRegion {
            bbox,
            area_px: component.count,
            mask: region_mask,
            boundary,
        });
    }
    regions
}

fn single_pixel_region(mask: &GrayImage, min_area: u32) -> Option<CandidateRegion> {
    if mask.get_pixel_checked(0, 0)?[0] == 0 || min_area > 1 {
        return None;
    }
    let bbox = BoundingBox { x: 0, y: 0, width: 1, height: 1 };
    let region_mask = GrayImage::from_pixel(1, 1, Luma([255]));
    let boundary = outer_contour(&region_mask, &bbox)?;
    Some(CandidateRegion {
        bbox,
        area_px: 1,
        mask: region_mask,
        boundary,
    })
}

/// Outer contours of every top-level component in `mask`, in mask coordinates.
///
/// The mask is padded by one pixel first. Without it imageproc reports a
/// component touching the image edge as a parentless hole.
pub fn outer_contours(mask: &GrayImage) -> Vec<Vec<PixelPoint>> {
    let (w, h) = mask.dimensions();
    let padded = GrayImage::from_fn(w + 2, h + 2, |x, y| {
        if x == 0 || y == 0 || x > w || y > h {
            Luma([0])
        } else {
            *mask.get_pixel(x - 1, y - 1)
        }
    });

    find_contours::<i32>(&padded)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| {
            c.points
                .iter()
                .map(|p| PixelPoint { x: p.x - 1, y: p.y - 1 })
                .collect()
        })
        .collect()
}

/// Traces the outer contour of a single-component mask, in image coordinates.
fn outer_contour(region_mask: &GrayImage, bbox: &BoundingBox) -> Option<Vec<PixelPoint>> {
    outer_contours(region_mask)
        .into_iter()
        .max_by_key(|points| points.len())
        .map(|points| {
            points
                .into_iter()
                .map(|p| PixelPoint {
                    x: p.x + bbox.x as i32,
                    y: p.y + bbox.y as i32,
                })
                .collect()
        })
}
