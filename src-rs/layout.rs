use anyhow::{bail, Context, Result};
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::colors::{to_hex, Palette};
use crate::draw::{blend_coverage, blend_pixel, draw_disc};
use crate::fonts::{Coverage, ResolvedFont};
use crate::mask::MaskBitmap;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("no words to lay out")]
    NoWords,
    #[error("no word fits on a {width}x{height} canvas")]
    NothingPlaced { width: u32, height: u32 },
    #[error("invalid canvas size {width}x{height}")]
    InvalidCanvas { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOptions {
    pub width: u32,
    pub height: u32,
    pub max_words: usize,
    pub min_font_size: f32,
    pub max_font_size: Option<f32>,
    pub font_step: f32,
    pub relative_scaling: f32,
    pub prefer_horizontal: f32,
    pub margin: u32,
    /// `None` renders a transparent background.
    pub background: Option<Rgba<u8>>,
    pub contour_width: u32,
    pub contour_color: Rgba<u8>,
    pub seed: Option<u64>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            max_words: 200,
            min_font_size: 10.0,
            max_font_size: None,
            font_step: 1.0,
            relative_scaling: 0.5,
            prefer_horizontal: 0.9,
            margin: 2,
            background: Some(Rgba([255, 255, 255, 255])),
            contour_width: 0,
            contour_color: Rgba([0, 0, 0, 255]),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedWord {
    pub text: String,
    pub count: usize,
    pub font_size: f32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub rotated: bool,
    pub color: String,
    #[serde(skip)]
    anchor: (i32, i32),
}

/// Word frequencies, most frequent first; ties break alphabetically.
pub fn count_words(filtered: &str) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in filtered.split_whitespace() {
        *counts.entry(word).or_insert(0) += 1;
    }
    let mut rows: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(w, c)| (w.to_string(), c))
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

struct Occupancy {
    width: usize,
    height: usize,
    cells: Vec<bool>,
    integral: Vec<u32>,
}

impl Occupancy {
    fn new(width: u32, height: u32, mask: Option<&MaskBitmap>) -> Self {
        let (w, h) = (width as usize, height as usize);
        let mut cells = vec![false; w * h];
        if let Some(mask) = mask {
            for y in 0..height {
                for x in 0..width {
                    if mask.is_blocked(x, y) {
                        cells[y as usize * w + x as usize] = true;
                    }
                }
            }
        }
        let mut occ = Self {
            width: w,
            height: h,
            cells,
            integral: vec![0; (w + 1) * (h + 1)],
        };
        occ.refresh_from(0);
        occ
    }

    fn refresh_from(&mut self, row: usize) {
        let stride = self.width + 1;
        for y in row..self.height {
            let mut run = 0u32;
            for x in 0..self.width {
                run += u32::from(self.cells[y * self.width + x]);
                self.integral[(y + 1) * stride + x + 1] = self.integral[y * stride + x + 1] + run;
            }
        }
    }

    fn box_free(&self, x: usize, y: usize, w: usize, h: usize) -> bool {
        let stride = self.width + 1;
        let a = self.integral[y * stride + x];
        let b = self.integral[y * stride + x + w];
        let c = self.integral[(y + h) * stride + x];
        let d = self.integral[(y + h) * stride + x + w];
        d + a == b + c
    }

    fn mark(&mut self, sprite: &Coverage, x: usize, y: usize) {
        for sy in 0..sprite.height {
            for sx in 0..sprite.width {
                if sprite.get(sx, sy) > 0 {
                    let cx = x + sx as usize;
                    let cy = y + sy as usize;
                    if cx < self.width && cy < self.height {
                        self.cells[cy * self.width + cx] = true;
                    }
                }
            }
        }
        self.refresh_from(y.min(self.height));
    }
}

/// Archimedean spiral around the canvas center, stretched to the canvas aspect.
fn spiral_search(
    occ: &Occupancy,
    box_w: usize,
    box_h: usize,
    start_angle: f64,
    clockwise: bool,
) -> Option<(usize, usize)> {
    if box_w > occ.width || box_h > occ.height || box_w == 0 || box_h == 0 {
        return None;
    }
    let max_x = (occ.width - box_w) as f64;
    let max_y = (occ.height - box_h) as f64;
    let cx = max_x / 2.0;
    let cy = max_y / 2.0;
    let aspect = occ.width as f64 / occ.height.max(1) as f64;
    let limit = ((cx / aspect).powi(2) + cy.powi(2)).sqrt() + 2.0;
    let dir = if clockwise { 1.0 } else { -1.0 };

    let mut theta = 0.0f64;
    let mut last = None;
    loop {
        let r = theta * 0.5;
        if r > limit {
            return None;
        }
        let angle = start_angle + dir * theta;
        let px = (cx + r * aspect * angle.cos()).round();
        let py = (cy + r * angle.sin()).round();
        if (0.0..=max_x).contains(&px) && (0.0..=max_y).contains(&py) {
            let pos = (px as usize, py as usize);
            if last != Some(pos) && occ.box_free(pos.0, pos.1, box_w, box_h) {
                return Some(pos);
            }
            last = Some(pos);
        }
        theta += (1.5 / r.max(1.0)).min(0.5);
    }
}

/// Starting size when no maximum is configured: 45% of the short side.
pub fn default_max_font_size(width: u32, height: u32) -> f32 {
    (0.45 * width.min(height) as f32).floor()
}

pub struct WordCloud {
    pub width: u32,
    pub height: u32,
    pub words: Vec<PlacedWord>,
    pub image: RgbaImage,
    pub font_family: String,
    background: Option<Rgba<u8>>,
}

pub fn build_cloud(
    frequencies: &[(String, usize)],
    options: &LayoutOptions,
    mask: Option<&MaskBitmap>,
    palette: &Palette,
    font: &ResolvedFont,
) -> Result<WordCloud, LayoutError> {
    let (width, height) = match mask {
        Some(m) => (m.width(), m.height()),
        None => (options.width, options.height),
    };
    if width == 0 || height == 0 {
        return Err(LayoutError::InvalidCanvas { width, height });
    }
    let words: Vec<&(String, usize)> = frequencies
        .iter()
        .filter(|(w, c)| *c > 0 && !w.is_empty())
        .take(options.max_words.max(1))
        .collect();
    let Some(top) = words.first() else {
        return Err(LayoutError::NoWords);
    };

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut occ = Occupancy::new(width, height, mask);
    let max_freq = top.1 as f32;
    let margin = options.margin as usize;
    let step = options.font_step.max(0.5);
    let rs = options.relative_scaling.clamp(0.0, 1.0);

    let mut font_size = options
        .max_font_size
        .unwrap_or_else(|| default_max_font_size(width, height))
        .max(1.0);
    let mut last_freq = 1.0f32;
    let mut placed: Vec<(PlacedWord, Coverage, Rgb<u8>)> = Vec::new();

    'words: for (word, count) in words {
        let freq = *count as f32 / max_freq;
        if rs > 0.0 && !placed.is_empty() {
            font_size = ((rs * (freq / last_freq) + (1.0 - rs)) * font_size).round();
        }
        let mut rotated = rng.gen::<f32>() >= options.prefer_horizontal;
        let mut flipped = false;
        let start_angle = rng.gen_range(0.0..TAU);
        let clockwise = rng.gen_bool(0.5);

        loop {
            if font_size < options.min_font_size {
                debug!("stopping at '{word}': font size below {}", options.min_font_size);
                break 'words;
            }
            let mut sprite = font.face.render_line(word, font_size, 0.0);
            if rotated {
                sprite = sprite.rotate_ccw();
            }
            let box_w = sprite.width as usize + 2 * margin;
            let box_h = sprite.height as usize + 2 * margin;

            if box_w > width as usize || box_h > height as usize {
                let fit = (width as f32 / box_w as f32).min(height as f32 / box_h as f32);
                font_size = (font_size * fit).floor().min(font_size - step);
                continue;
            }

            if let Some((bx, by)) = spiral_search(&occ, box_w, box_h, start_angle, clockwise) {
                let ix = bx + margin;
                let iy = by + margin;
                occ.mark(&sprite, ix, iy);
                let color = palette.sample(rng.gen::<f64>());
                placed.push((
                    PlacedWord {
                        text: word.clone(),
                        count: *count,
                        font_size,
                        x: ix as u32,
                        y: iy as u32,
                        width: sprite.width,
                        height: sprite.height,
                        rotated,
                        color: to_hex(color),
                        anchor: (ix as i32 + sprite.origin_x, iy as i32 + sprite.baseline),
                    },
                    sprite,
                    color,
                ));
                break;
            }

            if options.prefer_horizontal < 1.0 && !flipped {
                rotated = !rotated;
                flipped = true;
                continue;
            }
            font_size -= step;
            flipped = false;
        }
        last_freq = freq;
    }

    if placed.is_empty() {
        return Err(LayoutError::NothingPlaced { width, height });
    }
    debug!("placed {} words on {}x{}", placed.len(), width, height);

    let mut image = RgbaImage::from_pixel(
        width,
        height,
        options.background.unwrap_or(Rgba([0, 0, 0, 0])),
    );
    for (word, sprite, color) in &placed {
        let color = Rgba([color[0], color[1], color[2], 255]);
        for sy in 0..sprite.height {
            for sx in 0..sprite.width {
                blend_coverage(
                    &mut image,
                    (word.x + sx) as i32,
                    (word.y + sy) as i32,
                    color,
                    sprite.get(sx, sy),
                );
            }
        }
    }
    if let Some(mask) = mask {
        if options.contour_width > 0 {
            draw_contour(&mut image, mask, options.contour_width, options.contour_color);
        }
    }

    Ok(WordCloud {
        width,
        height,
        words: placed.into_iter().map(|(w, _, _)| w).collect(),
        image,
        font_family: font.face.family_name(),
        background: options.background,
    })
}

/// Outlines the edge of the accepting region of the mask.
pub fn draw_contour(image: &mut RgbaImage, mask: &MaskBitmap, width: u32, color: Rgba<u8>) {
    let (w, h) = (mask.width(), mask.height());
    let radius = (f64::from(width) / 2.0).max(0.5);
    for y in 0..h {
        for x in 0..w {
            if mask.is_blocked(x, y) {
                continue;
            }
            let edge = (x > 0 && mask.is_blocked(x - 1, y))
                || (x + 1 < w && mask.is_blocked(x + 1, y))
                || (y > 0 && mask.is_blocked(x, y - 1))
                || (y + 1 < h && mask.is_blocked(x, y + 1));
            if edge {
                draw_disc(image, f64::from(x), f64::from(y), radius, color);
            }
        }
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

impl WordCloud {
    pub fn to_svg(&self) -> String {
        let mut svg = String::with_capacity(256 + self.words.len() * 128);
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        ));
        if let Some(bg) = self.background {
            svg.push_str(&format!(
                r#"<rect width="100%" height="100%" fill="{}"/>"#,
                to_hex(Rgb([bg[0], bg[1], bg[2]]))
            ));
        }
        svg.push_str(&format!(
            r#"<style>text{{font-family:'{}',sans-serif}}</style>"#,
            escape_xml(&self.font_family)
        ));
        for word in &self.words {
            let (ax, ay) = word.anchor;
            if word.rotated {
                svg.push_str(&format!(
                    r#"<text transform="translate({ax} {ay}) rotate(-90)" font-size="{:.0}" fill="{}">{}</text>"#,
                    word.font_size,
                    word.color,
                    escape_xml(&word.text)
                ));
            } else {
                svg.push_str(&format!(
                    r#"<text x="{ax}" y="{ay}" font-size="{:.0}" fill="{}">{}</text>"#,
                    word.font_size,
                    word.color,
                    escape_xml(&word.text)
                ));
            }
        }
        svg.push_str("</svg>");
        svg
    }

    /// Composites onto the background (white when transparent).
    pub fn flattened(&self) -> RgbImage {
        let base = match self.background {
            Some(bg) => Rgba([bg[0], bg[1], bg[2], 255]),
            None => Rgba([255, 255, 255, 255]),
        };
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let p = blend_pixel(base, *self.image.get_pixel(x, y));
            Rgb([p[0], p[1], p[2]])
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        crate::ensure_parent_dir(path)?;
        match ext.as_str() {
            "png" => DynamicImage::ImageRgba8(self.image.clone())
                .save(path)
                .with_context(|| format!("failed to save image: {}", path.display())),
            "jpg" | "jpeg" => DynamicImage::ImageRgb8(self.flattened())
                .save(path)
                .with_context(|| format!("failed to save image: {}", path.display())),
            "svg" => fs::write(path, self.to_svg())
                .with_context(|| format!("failed to write SVG: {}", path.display())),
            other => bail!("unsupported output format '{other}' (use png, jpg or svg)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colors::ColorSpec;
    use image::{GrayImage, Luma};
    use tempfile::tempdir;

    fn palette() -> Palette {
        ColorSpec::Solid(Rgb([200, 0, 0])).palette().unwrap()
    }

    fn options(width: u32, height: u32) -> LayoutOptions {
        LayoutOptions {
            width,
            height,
            max_font_size: Some(48.0),
            seed: Some(7),
            ..LayoutOptions::default()
        }
    }

    fn freqs() -> Vec<(String, usize)> {
        count_words("rust rust rust cargo cargo crate borrow rust cargo trait lifetime")
    }

    #[test]
    fn counts_sort_by_frequency_then_word() {
        let rows = freqs();
        assert_eq!(rows[0], ("rust".to_string(), 4));
        assert_eq!(rows[1], ("cargo".to_string(), 3));
        assert_eq!(rows[2], ("borrow".to_string(), 1));
        assert_eq!(rows.len(), 6);
    }

    #[test]
    fn places_words_inside_canvas() {
        let cloud = build_cloud(&freqs(), &options(300, 200), None, &palette(), &ResolvedFont::builtin(false, false))
            .unwrap();
        assert!(!cloud.words.is_empty());
        assert_eq!(cloud.words[0].text, "rust");
        for word in &cloud.words {
            assert!(word.x + word.width <= 300);
            assert!(word.y + word.height <= 200);
            assert!(word.font_size >= 10.0);
        }
        assert!(cloud.image.pixels().any(|p| p[0] == 200 && p[1] == 0));
    }

    #[test]
    fn same_seed_gives_same_layout() {
        let a = build_cloud(&freqs(), &options(300, 200), None, &palette(), &ResolvedFont::builtin(false, false))
            .unwrap();
        let b = build_cloud(&freqs(), &options(300, 200), None, &palette(), &ResolvedFont::builtin(false, false))
            .unwrap();
        assert_eq!(a.words, b.words);
    }

    #[test]
    fn blocked_mask_area_stays_empty() {
        let mask = MaskBitmap::from_gray(GrayImage::from_fn(240, 120, |x, _| {
            if x < 120 {
                Luma([255])
            } else {
                Luma([0])
            }
        }));
        let cloud = build_cloud(
            &freqs(),
            &options(10, 10),
            Some(&mask),
            &palette(),
            &ResolvedFont::builtin(false, false),
        )
        .unwrap();
        assert_eq!((cloud.width, cloud.height), (240, 120));
        for word in &cloud.words {
            assert!(word.x >= 120, "{} at {}", word.text, word.x);
        }
        for (x, _, p) in cloud.image.enumerate_pixels() {
            if x < 120 {
                assert_eq!(*p, Rgba([255, 255, 255, 255]));
            }
        }
    }

    #[test]
    fn contour_follows_mask_edge() {
        let mask = MaskBitmap::from_gray(GrayImage::from_fn(100, 100, |x, y| {
            if (20..80).contains(&x) && (20..80).contains(&y) {
                Luma([0])
            } else {
                Luma([255])
            }
        }));
        let mut opts = options(100, 100);
        opts.contour_width = 2;
        opts.contour_color = Rgba([0, 0, 255, 255]);
        let cloud = build_cloud(&freqs(), &opts, Some(&mask), &palette(), &ResolvedFont::builtin(false, false))
            .unwrap();
        assert_eq!(*cloud.image.get_pixel(20, 50), Rgba([0, 0, 255, 255]));
        assert_eq!(*cloud.image.get_pixel(5, 5), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn transparent_background_keeps_alpha() {
        let mut opts = options(300, 200);
        opts.background = None;
        let cloud = build_cloud(&freqs(), &opts, None, &palette(), &ResolvedFont::builtin(false, false)).unwrap();
        assert_eq!(cloud.image.get_pixel(0, 0)[3], 0);
        assert_eq!(*cloud.flattened().get_pixel(0, 0), Rgb([255, 255, 255]));
        assert!(!cloud.to_svg().contains("<rect"));
    }

    #[test]
    fn reports_empty_and_impossible_layouts() {
        let err = build_cloud(&[], &options(100, 100), None, &palette(), &ResolvedFont::builtin(false, false))
            .err()
            .unwrap();
        assert_eq!(err, LayoutError::NoWords);

        let mut tiny = options(6, 6);
        tiny.min_font_size = 20.0;
        let err = build_cloud(&freqs(), &tiny, None, &palette(), &ResolvedFont::builtin(false, false))
            .err()
            .unwrap();
        assert_eq!(err, LayoutError::NothingPlaced { width: 6, height: 6 });

        let err = build_cloud(&freqs(), &options(0, 10), None, &palette(), &ResolvedFont::builtin(false, false))
            .err()
            .unwrap();
        assert_eq!(err, LayoutError::InvalidCanvas { width: 0, height: 10 });
    }

    #[test]
    fn svg_escapes_words() {
        let rows = vec![("fish&chips".to_string(), 2)];
        let cloud = build_cloud(&rows, &options(400, 200), None, &palette(), &ResolvedFont::builtin(false, false))
            .unwrap();
        let svg = cloud.to_svg();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("fish&amp;chips"));
        assert!(svg.contains("font-family:'monospace'"));
    }

    #[test]
    fn saves_by_extension() {
        let dir = tempdir().unwrap();
        let cloud = build_cloud(&freqs(), &options(200, 120), None, &palette(), &ResolvedFont::builtin(false, false))
            .unwrap();
        for name in ["out.png", "nested/out.jpg", "out.svg"] {
            let path = dir.path().join(name);
            cloud.save(&path).unwrap();
            assert!(path.exists(), "{name}");
        }
        assert!(cloud.save(&dir.path().join("out.tiff")).is_err());
    }

    #[test]
    fn unset_max_font_size_caps_at_short_side_share() {
        assert_eq!(default_max_font_size(300, 200), 90.0);
        assert_eq!(default_max_font_size(120, 500), 54.0);

        let mut opts = options(300, 200);
        opts.max_font_size = None;
        let cloud = build_cloud(&freqs(), &opts, None, &palette(), &ResolvedFont::builtin(false, false))
            .unwrap();
        assert!(cloud.words.iter().all(|w| w.font_size <= 90.0));
        assert_eq!(cloud.words[0].text, "rust");
    }
}
