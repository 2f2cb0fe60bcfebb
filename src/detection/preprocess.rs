use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::gradients::sobel_gradients;
use imageproc::morphology::{close, grayscale_dilate, grayscale_erode, open, Mask};

use super::signatures::HsvRange;

/// HSV image on the OpenCV scale: channel 0 = hue (0-180), 1 = saturation, 2 = value.
pub type HsvImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Converts one RGB pixel to HSV using OpenCV's 8-bit convention.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let r = rgb[0] as f32;
    let g = rgb[1] as f32;
    let b = rgb[2] as f32;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = max - min;

    let s = if max > 0.0 { diff / max * 255.0 } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / diff
    } else if max == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        (h / 2.0).round().min(180.0) as u8,
        s.round().min(255.0) as u8,
        max as u8,
    ]
}

/// Converts a whole image to HSV.
pub fn to_hsv(img: &RgbImage) -> HsvImage {
    let (width, height) = img.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        Rgb(rgb_to_hsv(img.get_pixel(x, y).0))
    })
}

/// Marks pixels that fall inside any of the ranges (inclusive bounds).
///
/// Matching pixels become 255, everything else 0.
pub fn color_mask(hsv: &HsvImage, ranges: &[HsvRange]) -> GrayImage {
    let (width, height) = hsv.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let pixel = hsv.get_pixel(x, y).0;
        let hit = ranges.iter().any(|r| r.contains(pixel));
        Luma([if hit { 255u8 } else { 0u8 }])
    })
}

/// Closes small gaps and then removes speckle from a binary mask.
pub fn clean_mask(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    let closed = close(mask, Norm::LInf, radius);
    open(&closed, Norm::LInf, radius)
}

/// Per-pixel maximum minus minimum over the 3x3 neighbourhood
/// (grayscale dilation minus erosion).
pub fn local_range(gray: &GrayImage) -> GrayImage {
    let mask = Mask::square(1);
    let hi = grayscale_dilate(gray, &mask);
    let lo = grayscale_erode(gray, &mask);
    let (width, height) = gray.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        Luma([hi.get_pixel(x, y)[0].saturating_sub(lo.get_pixel(x, y)[0])])
    })
}

/// Per-image planes shared by every candidate region.
pub struct PreparedImage {
    pub hsv: HsvImage,
    pub gray: GrayImage,
    pub gradient: ImageBuffer<Luma<u16>, Vec<u16>>,
    pub local_range: GrayImage,
}

impl PreparedImage {
    pub fn new(img: &RgbImage) -> Self {
        let gray = image::imageops::grayscale(img);
        let gradient = sobel_gradients(&gray);
        let local_range = local_range(&gray);
        Self {
            hsv: to_hsv(img),
            gray,
            gradient,
            local_range,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }
}
