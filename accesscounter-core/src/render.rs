//! Counter image rendering.
//!
//! Draws the zero-padded visit count in a bold face on a fixed 240x60 canvas
//! and encodes it as a single-frame GIF with a 256-level grayscale palette.

use crate::error::{EncodeError, RenderError};
use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};
use std::borrow::Cow;

/// DejaVu Sans Bold, see `assets/DejaVu-LICENSE.txt`.
pub static COUNTER_FONT: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");

pub const CANVAS_WIDTH: u32 = 240;
pub const CANVAS_HEIGHT: u32 = 60;
const MIN_DIGITS: usize = 4;
const POINTS_PER_PIXEL: f32 = 1.333;

/// 8-bit coverage raster, row-major, 0 = background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height) as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[(y * self.width + x) as usize]
    }

    fn blend(&mut self, x: i32, y: i32, coverage: f32) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let index = (y as u32 * self.width + x as u32) as usize;
        let value = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
        self.pixels[index] = self.pixels[index].max(value);
    }
}

/// Renderer holding the parsed font. Build once at startup.
#[derive(Clone)]
pub struct CounterRenderer {
    font: FontArc,
    width: u32,
    height: u32,
}

impl CounterRenderer {
    pub fn new(font_data: &'static [u8]) -> Result<Self, RenderError> {
        let font = FontArc::try_from_slice(font_data)
            .map_err(|error| RenderError::InvalidFont(error.to_string()))?;

        if let Some(missing) = ('0'..='9').find(|digit| font.glyph_id(*digit).0 == 0) {
            return Err(RenderError::InvalidFont(format!(
                "font has no glyph for '{}'",
                missing
            )));
        }

        Ok(Self {
            font,
            width: CANVAS_WIDTH,
            height: CANVAS_HEIGHT,
        })
    }

    pub fn with_default_font() -> Result<Self, RenderError> {
        Self::new(COUNTER_FONT)
    }

    /// Text drawn for a count: decimal, zero-padded to four digits.
    pub fn label(visit_count: u64) -> String {
        format!("{:0width$}", visit_count, width = MIN_DIGITS)
    }

    fn font_size(&self) -> f32 {
        self.width as f32 * 0.25 * 0.8 / POINTS_PER_PIXEL
    }

    fn px_scale(&self, em_size: f32) -> PxScale {
        match self.font.units_per_em() {
            Some(units_per_em) if units_per_em > 0.0 => {
                PxScale::from(em_size * self.font.height_unscaled() / units_per_em)
            }
            _ => PxScale::from(em_size),
        }
    }

    pub fn render(&self, visit_count: u64) -> Bitmap {
        let mut bitmap = Bitmap::blank(self.width, self.height);
        let em_size = self.font_size();
        let scaled = self.font.as_scaled(self.px_scale(em_size));

        let mut caret = point(
            self.width as f32 / 2.0 - em_size * 2.0 / POINTS_PER_PIXEL,
            (self.height - 20) as f32,
        );

        let mut previous = None;
        for ch in Self::label(visit_count).chars() {
            let mut glyph = scaled.scaled_glyph(ch);
            if let Some(previous) = previous {
                caret.x += scaled.kern(previous, glyph.id);
            }
            glyph.position = caret;
            caret.x += scaled.h_advance(glyph.id);
            previous = Some(glyph.id);

            if let Some(outlined) = self.font.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                outlined.draw(|x, y, coverage| {
                    bitmap.blend(
                        bounds.min.x as i32 + x as i32,
                        bounds.min.y as i32 + y as i32,
                        coverage,
                    );
                });
            }
        }

        bitmap
    }
}

fn grayscale_palette() -> Vec<u8> {
    (0..=255u8).flat_map(|level| [level, level, level]).collect()
}

/// Encode as GIF: palette index equals coverage, index 0 is transparent.
pub fn encode_gif(bitmap: &Bitmap) -> Result<Vec<u8>, EncodeError> {
    let palette = grayscale_palette();
    let mut output = Vec::new();
    {
        let mut encoder = gif::Encoder::new(
            &mut output,
            bitmap.width as u16,
            bitmap.height as u16,
            &palette,
        )?;

        let mut frame = gif::Frame::default();
        frame.width = bitmap.width as u16;
        frame.height = bitmap.height as u16;
        frame.buffer = Cow::Borrowed(&bitmap.pixels);
        frame.transparent = Some(0);
        encoder.write_frame(&frame)?;
    }
    Ok(output)
}
