use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use log::debug;
use std::path::Path;

use crate::draw::stamp_disc_luma;
use crate::fonts::{Coverage, FontLocator, FontOrigin, FontRequest, InkBox};

pub const BLOCKED_THRESHOLD: u8 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSpec {
    pub text: String,
    pub width: u32,
    pub height: u32,
    pub font_families: Vec<String>,
    pub point_size: u32,
    pub bold: bool,
    pub italic: bool,
    pub words_per_line: usize,
    pub stroke_width: u32,
    pub letter_spacing: u32,
}

impl MaskSpec {
    pub fn new(text: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            text: text.into(),
            width,
            height,
            font_families: vec!["arial".to_string()],
            point_size: 200,
            bold: false,
            italic: false,
            words_per_line: 1,
            stroke_width: 0,
            letter_spacing: 0,
        }
    }

    pub fn font_request(&self) -> FontRequest {
        FontRequest::new(self.font_families.clone(), self.bold, self.italic)
    }
}

/// Grayscale placement mask: dark pixels accept words, near-white pixels are blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskBitmap {
    image: GrayImage,
}

impl MaskBitmap {
    pub fn from_gray(image: GrayImage) -> Self {
        Self { image }
    }

    /// Transparent (alpha < 128) or near-white (r+g+b >= 750) pixels become blocked.
    pub fn from_image(img: &DynamicImage, size: Option<(u32, u32)>) -> Self {
        let resized;
        let source = match size {
            Some((w, h)) if img.dimensions() != (w, h) => {
                resized = img.resize_exact(w, h, FilterType::Nearest);
                &resized
            }
            _ => img,
        };
        let rgba = source.to_rgba8();
        let image = GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            let p = rgba.get_pixel(x, y);
            let sum = u16::from(p[0]) + u16::from(p[1]) + u16::from(p[2]);
            if p[3] < 128 || sum >= 750 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        Self { image }
    }

    pub fn open(path: &Path, size: Option<(u32, u32)>) -> Result<Self> {
        let img = image::open(path)
            .with_context(|| format!("failed to open mask image: {}", path.display()))?;
        Ok(Self::from_image(&img, size))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// (height, width, channels), row-major like the pixel buffer.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.image.height() as usize, self.image.width() as usize, 1)
    }

    pub fn is_blocked(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] >= BLOCKED_THRESHOLD
    }

    pub fn dark_pixels(&self) -> usize {
        self.image.pixels().filter(|p| p[0] < 255).count()
    }

    #[cfg(test)]
    pub fn as_gray(&self) -> &GrayImage {
        &self.image
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::ensure_parent_dir(path)?;
        self.image
            .save(path)
            .with_context(|| format!("failed to save mask: {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePlacement {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub lines: Vec<LinePlacement>,
}

pub struct MaskRender {
    pub bitmap: MaskBitmap,
    pub font: FontOrigin,
    pub block: TextBlock,
}

pub fn wrap_words(text: &str, words_per_line: usize) -> Vec<String> {
    if words_per_line > 1 {
        let words: Vec<&str> = text.split_whitespace().collect();
        return words
            .chunks(words_per_line)
            .map(|chunk| chunk.join(" "))
            .collect();
    }
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Centers the combined ink box of all lines in the canvas. Lines stack at
/// their raster height plus `line_gap`, and each line's ink is centered
/// horizontally inside the block. `TextBlock` reports the ink box.
pub fn layout_block(lines: &[Coverage], line_gap: u32, canvas_w: u32, canvas_h: u32) -> TextBlock {
    let inks: Vec<Option<InkBox>> = lines.iter().map(Coverage::ink_bounds).collect();
    let width = inks.iter().flatten().map(InkBox::width).max().unwrap_or(0);

    // Raster offsets relative to the block's left edge and the first line's top.
    let mut offsets = Vec::with_capacity(lines.len());
    let mut ink_top = i64::MAX;
    let mut ink_bottom = i64::MIN;
    let mut cursor_y = 0i64;
    for (line, ink) in lines.iter().zip(&inks) {
        let dx = match ink {
            Some(ink) => i64::from((width - ink.width()) / 2) - i64::from(ink.x0),
            None => 0,
        };
        if let Some(ink) = ink {
            ink_top = ink_top.min(cursor_y + i64::from(ink.y0));
            ink_bottom = ink_bottom.max(cursor_y + i64::from(ink.y1));
        }
        offsets.push((dx, cursor_y));
        cursor_y += i64::from(line.height) + i64::from(line_gap);
    }
    if ink_top > ink_bottom {
        ink_top = 0;
        ink_bottom = 0;
    }
    let height = (ink_bottom - ink_top) as u32;

    let x = (i64::from(canvas_w) - i64::from(width)).div_euclid(2);
    let y = (i64::from(canvas_h) - i64::from(height)).div_euclid(2);
    let placements = offsets
        .into_iter()
        .map(|(dx, dy)| LinePlacement {
            x: (x + dx) as i32,
            y: (y - ink_top + dy) as i32,
        })
        .collect();

    TextBlock {
        x: x as i32,
        y: y as i32,
        width,
        height,
        lines: placements,
    }
}

pub fn render_text_mask(spec: &MaskSpec, locator: &FontLocator) -> MaskRender {
    let mut canvas = GrayImage::from_pixel(spec.width, spec.height, Luma([255]));
    let px = spec.point_size as f32;
    let font = locator.resolve(&spec.font_request(), px);

    let lines: Vec<Coverage> = wrap_words(&spec.text, spec.words_per_line.max(1))
        .iter()
        .map(|line| font.face.render_line(line, px, spec.letter_spacing as f32))
        .collect();
    let line_gap = font.face.v_metrics(px).line_gap.max(0.0).ceil() as u32;
    let block = layout_block(&lines, line_gap, spec.width, spec.height);
    debug!(
        "text mask {}x{} block {}x{} at ({}, {}) font {}",
        spec.width, spec.height, block.width, block.height, block.x, block.y, font.origin
    );

    // Clamped to the canvas diagonal; a disc that wide centered on the canvas covers all of it.
    let diagonal = f64::from(spec.width).hypot(f64::from(spec.height)).ceil() as u32;
    let stroke = spec.stroke_width.min(diagonal) as i32;
    let mut flooded = false;
    for (line, place) in lines.iter().zip(&block.lines) {
        for ly in 0..line.height {
            for lx in 0..line.width {
                let value = line.get(lx, ly);
                if value == 0 {
                    continue;
                }
                let cx = place.x + lx as i32;
                let cy = place.y + ly as i32;
                let inside = cx >= 0 && cy >= 0 && cx < spec.width as i32 && cy < spec.height as i32;
                if stroke > 0 && value >= 128 && !flooded {
                    stamp_disc_luma(&mut canvas, cx, cy, stroke, 0);
                    flooded = inside && stroke as u32 >= diagonal;
                }
                if !inside {
                    continue;
                }
                let pixel = canvas.get_pixel_mut(cx as u32, cy as u32);
                pixel[0] = pixel[0].min(255 - value);
            }
        }
    }

    MaskRender {
        bitmap: MaskBitmap::from_gray(canvas),
        font: font.origin,
        block,
    }
}
