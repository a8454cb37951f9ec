use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use thiserror::Error;

use crate::codec::{decode_payload, to_display_source, DISPLAY_SOURCE_PREFIX};

pub const WORDMARK: &str = "MISS SLIVKI AI";

const MARK_OPACITY: f32 = 0.10;
const MARK_ANGLE_DEGREES: f64 = -25.0;
const MIN_FONT_PX: f64 = 12.0;
const FONT_DENSITY_DIVISOR: f64 = 35.0;
const STEP_X_FACTOR: f64 = 1.5;
const STEP_Y_FACTOR: f64 = 4.0;
const GLYPH_CELLS: f64 = 8.0;
const BOLD_OFFSET_CELLS: f64 = 0.5;
const MAX_SURFACE_PIXELS: u64 = 64_000_000;

/// Result of [`apply_watermark`]. There is no error channel: when the mark
/// cannot be drawn, `data_url` is the untouched source as a display source
/// and `fallback_reason` says why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkOutcome {
    pub data_url: String,
    pub fallback_reason: Option<String>,
}

impl WatermarkOutcome {
    pub fn is_watermarked(&self) -> bool {
        self.fallback_reason.is_none()
    }
}

#[derive(Debug, Error)]
enum RasterizationError {
    #[error("source image could not be decoded: {0}")]
    Decode(String),
    #[error("source image has no pixels")]
    EmptySurface,
    #[error("surface {width}x{height} exceeds the raster limit")]
    SurfaceTooLarge { width: u32, height: u32 },
    #[error("PNG encode failed: {0}")]
    Encode(String),
}

/// Tiles the wordmark across a base64 or data-URL image and returns a PNG
/// data URL.
pub fn apply_watermark(source: &str) -> WatermarkOutcome {
    match render(source) {
        Ok(data_url) => WatermarkOutcome {
            data_url,
            fallback_reason: None,
        },
        Err(err) => WatermarkOutcome {
            data_url: to_display_source(source),
            fallback_reason: Some(err.to_string()),
        },
    }
}

pub fn font_size_for(width: u32, height: u32) -> f64 {
    let area = f64::from(width) * f64::from(height);
    (area.sqrt() / FONT_DENSITY_DIVISOR).max(MIN_FONT_PX)
}

fn render(source: &str) -> Result<String, RasterizationError> {
    let bytes =
        decode_payload(source).map_err(|err| RasterizationError::Decode(format!("{err:#}")))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|err| RasterizationError::Decode(err.to_string()))?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(RasterizationError::EmptySurface);
    }
    if u64::from(width) * u64::from(height) > MAX_SURFACE_PIXELS {
        return Err(RasterizationError::SurfaceTooLarge { width, height });
    }

    let mut surface = decoded.to_rgba8();
    WordmarkTiling::new(width, height).stamp(&mut surface);

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(surface)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|err| RasterizationError::Encode(err.to_string()))?;
    Ok(format!("{DISPLAY_SOURCE_PREFIX}{}", BASE64.encode(png)))
}

/// Geometry of the rotated wordmark grid.
///
/// Tiles are laid out in the rotated frame over `[-2W, 3W) x [-2H, 3H)`, each
/// centred on its anchor. Steps exceed the text box on both axes, so a point
/// can only fall inside the tile whose anchor is nearest.
struct WordmarkTiling {
    glyphs: Vec<[u8; 8]>,
    font_px: f64,
    cell_px: f64,
    text_width: f64,
    step_x: f64,
    step_y: f64,
    start_x: f64,
    start_y: f64,
    end_x: f64,
    end_y: f64,
    cos: f64,
    sin: f64,
}

impl WordmarkTiling {
    fn new(width: u32, height: u32) -> Self {
        let font_px = font_size_for(width, height);
        let glyphs: Vec<[u8; 8]> = WORDMARK
            .chars()
            .map(|ch| BASIC_FONTS.get(ch).unwrap_or([0; 8]))
            .collect();
        let text_width = font_px * glyphs.len() as f64;
        let (w, h) = (f64::from(width), f64::from(height));
        let angle = MARK_ANGLE_DEGREES.to_radians();
        Self {
            glyphs,
            font_px,
            cell_px: font_px / GLYPH_CELLS,
            text_width,
            step_x: text_width * STEP_X_FACTOR,
            step_y: font_px * STEP_Y_FACTOR,
            start_x: -w * 2.0,
            start_y: -h * 2.0,
            end_x: w * 3.0,
            end_y: h * 3.0,
            cos: angle.cos(),
            sin: angle.sin(),
        }
    }

    fn stamp(&self, surface: &mut RgbaImage) {
        for (x, y, pixel) in surface.enumerate_pixels_mut() {
            if self.covers(f64::from(x) + 0.5, f64::from(y) + 0.5) {
                blend_mark(pixel);
            }
        }
    }

    fn covers(&self, x: f64, y: f64) -> bool {
        // canvas = R(angle) * text frame
        let qx = x * self.cos + y * self.sin;
        let qy = -x * self.sin + y * self.cos;
        let Some(u) = tile_offset(qx, self.start_x, self.end_x, self.step_x, self.text_width)
        else {
            return false;
        };
        let Some(v) = tile_offset(qy, self.start_y, self.end_y, self.step_y, self.font_px) else {
            return false;
        };
        self.ink_at(u, v)
    }

    fn ink_at(&self, u: f64, v: f64) -> bool {
        let char_idx = (u / self.font_px) as usize;
        let Some(glyph) = self.glyphs.get(char_idx) else {
            return false;
        };
        let row = (v / self.cell_px) as usize;
        let Some(bits) = glyph.get(row).copied() else {
            return false;
        };
        let col = (u - char_idx as f64 * self.font_px) / self.cell_px;
        let lit = |col: f64| col >= 0.0 && col < GLYPH_CELLS && (bits >> (col as u32)) & 1 == 1;
        lit(col) || lit(col - BOLD_OFFSET_CELLS)
    }
}

/// Offset of `q` from the leading edge of the nearest tile, if `q` lies inside
/// that tile's extent.
fn tile_offset(q: f64, start: f64, end: f64, step: f64, extent: f64) -> Option<f64> {
    let index = ((q - start) / step).round();
    if index < 0.0 {
        return None;
    }
    let anchor = start + index * step;
    if anchor >= end {
        return None;
    }
    let offset = q - (anchor - extent / 2.0);
    (0.0..extent).contains(&offset).then_some(offset)
}

/// Source-over of white at the mark opacity.
fn blend_mark(pixel: &mut Rgba<u8>) {
    let dst_a = f32::from(pixel[3]) / 255.0;
    let out_a = MARK_OPACITY + dst_a * (1.0 - MARK_OPACITY);
    for channel in 0..3 {
        let dst = f32::from(pixel[channel]);
        let mixed = (255.0 * MARK_OPACITY + dst * dst_a * (1.0 - MARK_OPACITY)) / out_a;
        pixel[channel] = mixed.round().clamp(0.0, 255.0) as u8;
    }
    pixel[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
