//! Decoded page raster and the pixel queries every detector shares.
//!
//! Pixels are stored row-major, 4 bytes per pixel (R, G, B, A). A pixel is
//! "dark" when the mean of its color channels is below 128; alpha is ignored.

use image::DynamicImage;

use super::types::BoundingBox;
use super::ExtractionError;

/// Bytes per pixel.
pub const CHANNELS: usize = 4;

/// Channel mean below which a pixel counts as ink.
pub const DARK_THRESHOLD: u32 = 128;

/// Immutable RGBA page image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// Wrap an RGBA buffer. The buffer length must match the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, ExtractionError> {
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(ExtractionError::InvalidImage(format!(
                "expected {expected} bytes for {width}x{height} RGBA, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Zero-sized image. Every detector returns nothing for it.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }

    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self {
            width,
            height,
            pixels: rgba.into_raw(),
        }
    }

    /// Decode PNG/JPEG/TIFF bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ExtractionError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| ExtractionError::InvalidImage(format!("decode failed: {e}")))?;
        Ok(Self::from_dynamic(&img))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(0, 0, self.width, self.height)
    }

    /// Mean of the R, G, B channels at `(x, y)`. Out-of-range reads are white.
    pub fn luminance(&self, x: u32, y: u32) -> u32 {
        if x >= self.width || y >= self.height {
            return 255;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        match self.pixels.get(idx..idx + 3) {
            Some(rgb) => (rgb[0] as u32 + rgb[1] as u32 + rgb[2] as u32) / 3,
            None => 255,
        }
    }

    pub fn is_dark(&self, x: u32, y: u32) -> bool {
        self.luminance(x, y) < DARK_THRESHOLD
    }

    /// Clip `area` to the image. `None` when nothing is left.
    pub fn clip(&self, area: &BoundingBox) -> Option<BoundingBox> {
        let x = area.x.min(self.width);
        let y = area.y.min(self.height);
        let right = area.right().min(self.width);
        let bottom = area.bottom().min(self.height);
        if right <= x || bottom <= y {
            return None;
        }
        Some(BoundingBox::new(x, y, right - x, bottom - y))
    }

    /// Fraction of dark pixels inside `area` (0.0 for areas outside the image).
    pub fn dark_ratio(&self, area: &BoundingBox) -> f32 {
        let Some(area) = self.clip(area) else {
            return 0.0;
        };
        let mut dark = 0u64;
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                if self.is_dark(x, y) {
                    dark += 1;
                }
            }
        }
        dark as f32 / area.area() as f32
    }

    /// Horizontal ink centroid within `area`, as a fraction of its width.
    pub fn ink_centroid_x(&self, area: &BoundingBox) -> Option<f32> {
        let area = self.clip(area)?;
        let mut sum = 0u64;
        let mut count = 0u64;
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                if self.is_dark(x, y) {
                    sum += (x - area.x) as u64;
                    count += 1;
                }
            }
        }
        if count == 0 {
            return None;
        }
        Some((sum as f32 / count as f32 + 0.5) / area.width as f32)
    }

    /// Copy of the pixels inside `area`, clipped to the image.
    pub fn crop(&self, area: &BoundingBox) -> RasterImage {
        let Some(area) = self.clip(area) else {
            return RasterImage::empty();
        };
        let row_bytes = area.width as usize * CHANNELS;
        let mut pixels = Vec::with_capacity(row_bytes * area.height as usize);
        for y in area.y..area.bottom() {
            let start = (y as usize * self.width as usize + area.x as usize) * CHANNELS;
            pixels.extend_from_slice(&self.pixels[start..start + row_bytes]);
        }
        RasterImage {
            width: area.width,
            height: area.height,
            pixels,
        }
    }
}
