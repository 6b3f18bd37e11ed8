use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use fontdue::{Font, FontSettings};
use log::{debug, info};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

pub const FALLBACK_FAMILIES: &[&str] = &["arial", "DejaVuSans", "LiberationSans"];

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf"];

const REGULAR_STYLES: &[&str] = &["", "-Regular"];
const BOLD_STYLES: &[&str] = &["bd", "-Bold"];
const ITALIC_STYLES: &[&str] = &["i", "-Italic", "-Oblique"];
const BOLD_ITALIC_STYLES: &[&str] = &["bi", "-BoldItalic", "-BoldOblique"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontCandidate {
    pub family: String,
    pub style: String,
    pub extension: String,
}

impl FontCandidate {
    pub fn new(family: &str, style: &str, extension: &str) -> Self {
        Self {
            family: family.to_string(),
            style: style.to_string(),
            extension: extension.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}{}.{}", self.family, self.style, self.extension)
    }

    fn is_path(&self) -> bool {
        let name = self.file_name();
        let path = Path::new(&name);
        path.is_absolute() || path.components().count() > 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontRequest {
    pub families: Vec<String>,
    pub bold: bool,
    pub italic: bool,
}

impl FontRequest {
    pub fn new(families: Vec<String>, bold: bool, italic: bool) -> Self {
        Self {
            families,
            bold,
            italic,
        }
    }

    pub fn candidates(&self) -> Vec<FontCandidate> {
        let styles: Vec<&str> = match (self.bold, self.italic) {
            (false, false) => REGULAR_STYLES.to_vec(),
            (true, false) => [BOLD_STYLES, REGULAR_STYLES].concat(),
            (false, true) => [ITALIC_STYLES, REGULAR_STYLES].concat(),
            (true, true) => [BOLD_ITALIC_STYLES, BOLD_STYLES, REGULAR_STYLES].concat(),
        };

        let mut seen: Vec<String> = Vec::new();
        let mut out = Vec::new();
        let requested = self.families.iter().map(String::as_str);
        for family in requested.chain(FALLBACK_FAMILIES.iter().copied()) {
            let family = family.trim();
            if family.is_empty() || seen.iter().any(|f| f.eq_ignore_ascii_case(family)) {
                continue;
            }
            seen.push(family.to_string());

            if let Some(candidate) = candidate_from_path(family) {
                out.push(candidate);
                continue;
            }
            for style in &styles {
                for ext in FONT_EXTENSIONS {
                    out.push(FontCandidate::new(family, style, ext));
                }
            }
        }
        out
    }
}

fn candidate_from_path(family: &str) -> Option<FontCandidate> {
    let path = Path::new(family);
    let ext = path.extension()?.to_str()?;
    if !FONT_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
        return None;
    }
    let stem = &family[..family.len() - ext.len() - 1];
    Some(FontCandidate::new(stem, "", ext))
}

#[derive(Debug, Error)]
pub enum FontLoadError {
    #[error("font size must be positive, got {0}")]
    InvalidSize(f32),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

pub fn load_face(path: &Path, px: f32) -> Result<Face, FontLoadError> {
    if px.is_nan() || px <= 0.0 {
        return Err(FontLoadError::InvalidSize(px));
    }
    let data = fs::read(path).map_err(|source| FontLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let settings = FontSettings {
        scale: px,
        ..FontSettings::default()
    };
    let font = Font::from_bytes(data, settings).map_err(|reason| FontLoadError::Parse {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    })?;
    Ok(Face::TrueType(Box::new(font)))
}

pub fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/share/fonts"),
        PathBuf::from("/usr/local/share/fonts"),
        PathBuf::from("/Library/Fonts"),
        PathBuf::from("/System/Library/Fonts"),
    ];
    if let Ok(windir) = env::var("WINDIR") {
        dirs.push(Path::new(&windir).join("Fonts"));
    }
    if let Some(user) = directories::UserDirs::new() {
        let home = user.home_dir();
        dirs.push(home.join(".fonts"));
        dirs.push(home.join(".local/share/fonts"));
        dirs.push(home.join("Library/Fonts"));
    }
    dirs
}

#[derive(Debug, Clone, Default)]
pub struct FontLocator {
    index: HashMap<String, PathBuf>,
}

impl FontLocator {
    /// Builtin-only locator; every lookup by family name misses.
    #[cfg(test)]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_dirs(dirs: &[PathBuf]) -> Self {
        let mut index = HashMap::new();
        for dir in dirs {
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(dir)
                .follow_links(true)
                .into_iter()
                .filter_map(Result::ok)
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let is_font = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| FONT_EXTENSIONS.iter().any(|f| f.eq_ignore_ascii_case(e)));
                if !is_font {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    index
                        .entry(name.to_lowercase())
                        .or_insert_with(|| path.to_path_buf());
                }
            }
        }
        debug!("indexed {} font files from {} directories", index.len(), dirs.len());
        Self { index }
    }

    /// Configured directories take priority over the platform ones.
    pub fn scan(extra_dirs: &[PathBuf]) -> Self {
        let mut dirs = extra_dirs.to_vec();
        dirs.extend(system_font_dirs());
        Self::from_dirs(&dirs)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn locate(&self, candidate: &FontCandidate) -> Option<PathBuf> {
        let name = candidate.file_name();
        if candidate.is_path() {
            let path = PathBuf::from(name);
            return path.is_file().then_some(path);
        }
        self.index.get(&name.to_lowercase()).cloned()
    }

    pub fn resolve(&self, request: &FontRequest, px: f32) -> ResolvedFont {
        for candidate in request.candidates() {
            let Some(path) = self.locate(&candidate) else {
                continue;
            };
            match load_face(&path, px) {
                Ok(face) => {
                    debug!("resolved font {} -> {}", candidate.file_name(), path.display());
                    return ResolvedFont {
                        face,
                        origin: FontOrigin::File(path),
                    };
                }
                Err(err) => debug!("font candidate {} skipped: {err}", candidate.file_name()),
            }
        }
        info!(
            "no font candidate for {:?} could be loaded, using the built-in face",
            request.families
        );
        ResolvedFont::builtin(request.bold, request.italic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontOrigin {
    File(PathBuf),
    Builtin,
}

impl fmt::Display for FontOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontOrigin::File(path) => write!(f, "{}", path.display()),
            FontOrigin::Builtin => f.write_str("builtin"),
        }
    }
}

pub struct ResolvedFont {
    pub face: Face,
    pub origin: FontOrigin,
}

impl ResolvedFont {
    pub fn builtin(bold: bool, italic: bool) -> Self {
        Self {
            face: Face::Builtin { bold, italic },
            origin: FontOrigin::Builtin,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.origin == FontOrigin::Builtin
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VMetrics {
    pub ascent: f32,
    pub descent: f32,
    pub line_gap: f32,
}

/// Coverage bitmap of one glyph; `left`/`top` are offsets from the pen
/// position on the baseline (y grows downward).
#[derive(Debug, Clone)]
pub struct Glyph {
    pub width: usize,
    pub height: usize,
    pub left: i32,
    pub top: i32,
    pub advance: f32,
    pub coverage: Vec<u8>,
}

pub enum Face {
    TrueType(Box<Font>),
    Builtin { bold: bool, italic: bool },
}

fn builtin_scale(px: f32) -> usize {
    ((px / 8.0).round() as usize).max(1)
}

fn builtin_rows(ch: char) -> [u8; 8] {
    BASIC_FONTS
        .get(ch)
        .or_else(|| LATIN_FONTS.get(ch))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

impl Face {
    pub fn family_name(&self) -> String {
        match self {
            Face::TrueType(font) => font.name().unwrap_or("sans-serif").to_string(),
            Face::Builtin { .. } => "monospace".to_string(),
        }
    }

    pub fn v_metrics(&self, px: f32) -> VMetrics {
        match self {
            Face::TrueType(font) => font
                .horizontal_line_metrics(px)
                .map(|m| VMetrics {
                    ascent: m.ascent,
                    descent: -m.descent,
                    line_gap: m.line_gap,
                })
                .unwrap_or(VMetrics {
                    ascent: px * 0.8,
                    descent: px * 0.2,
                    line_gap: 0.0,
                }),
            Face::Builtin { .. } => {
                let s = builtin_scale(px) as f32;
                VMetrics {
                    ascent: 7.0 * s,
                    descent: s,
                    line_gap: s,
                }
            }
        }
    }

    pub fn kern(&self, left: char, right: char, px: f32) -> f32 {
        match self {
            Face::TrueType(font) => font.horizontal_kern(left, right, px).unwrap_or(0.0),
            Face::Builtin { .. } => 0.0,
        }
    }

    pub fn glyph(&self, ch: char, px: f32) -> Glyph {
        match self {
            Face::TrueType(font) => {
                let (metrics, coverage) = font.rasterize(ch, px);
                Glyph {
                    width: metrics.width,
                    height: metrics.height,
                    left: metrics.xmin,
                    top: -(metrics.ymin + metrics.height as i32),
                    advance: metrics.advance_width,
                    coverage,
                }
            }
            Face::Builtin { bold, italic } => builtin_glyph(ch, px, *bold, *italic),
        }
    }

    /// Rasterizes one line of text. `spacing > 0` places glyphs with an explicit
    /// gap and no kerning.
    pub fn render_line(&self, text: &str, px: f32, spacing: f32) -> Coverage {
        let metrics = self.v_metrics(px);
        let ascent = metrics.ascent.ceil() as i32;
        let descent = metrics.descent.ceil() as i32;

        let mut placed: Vec<(i32, Glyph)> = Vec::new();
        let mut pen = 0.0f32;
        let mut prev: Option<char> = None;
        for ch in text.chars() {
            if spacing <= 0.0 {
                if let Some(p) = prev {
                    pen += self.kern(p, ch, px);
                }
            }
            let glyph = self.glyph(ch, px);
            let x = (pen + glyph.left as f32).round() as i32;
            pen += glyph.advance + spacing.max(0.0);
            prev = Some(ch);
            placed.push((x, glyph));
        }

        let inked = placed.iter().filter(|(_, g)| g.width > 0 && g.height > 0);
        let min_x = inked.clone().map(|(x, _)| *x).min().unwrap_or(0);
        let max_x = inked
            .map(|(x, g)| *x + g.width as i32)
            .max()
            .unwrap_or_else(|| pen.round() as i32);

        let width = (max_x - min_x).max(1) as u32;
        let height = (ascent + descent).max(1) as u32;
        let mut data = vec![0u8; (width * height) as usize];

        for (x, glyph) in &placed {
            let ox = x - min_x;
            let oy = ascent + glyph.top;
            for gy in 0..glyph.height {
                let ty = oy + gy as i32;
                if ty < 0 || ty >= height as i32 {
                    continue;
                }
                for gx in 0..glyph.width {
                    let tx = ox + gx as i32;
                    if tx < 0 || tx >= width as i32 {
                        continue;
                    }
                    let value = glyph.coverage[gy * glyph.width + gx];
                    let idx = ty as usize * width as usize + tx as usize;
                    data[idx] = data[idx].max(value);
                }
            }
        }

        Coverage {
            width,
            height,
            origin_x: -min_x,
            baseline: ascent,
            data,
        }
    }
}

fn builtin_glyph(ch: char, px: f32, bold: bool, italic: bool) -> Glyph {
    let s = builtin_scale(px);
    let cell = 8 * s;
    let shear = if italic { 2 * s } else { 0 };
    let width = cell + shear;
    let mut coverage = vec![0u8; width * cell];
    let rows = builtin_rows(ch);

    for y in 0..cell {
        let mut bits = rows[y / s];
        if bold {
            bits |= bits << 1;
        }
        let offset = if italic {
            (cell - 1 - y) * shear / cell
        } else {
            0
        };
        for col in 0..8 {
            if (bits >> col) & 1 == 0 {
                continue;
            }
            for sx in 0..s {
                coverage[y * width + offset + col * s + sx] = 255;
            }
        }
    }

    Glyph {
        width,
        height: cell,
        left: 0,
        top: -(7 * s as i32),
        advance: cell as f32,
        coverage,
    }
}

/// Half-open pixel box: `x0..x1` by `y0..y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InkBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl InkBox {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

/// 8-bit coverage raster of a rendered line. `origin_x`/`baseline` locate the
/// pen origin inside the raster.
#[derive(Debug, Clone)]
pub struct Coverage {
    pub width: u32,
    pub height: u32,
    pub origin_x: i32,
    pub baseline: i32,
    pub data: Vec<u8>,
}

impl Coverage {
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    /// Quarter turn counter-clockwise: text then reads bottom to top.
    pub fn rotate_ccw(&self) -> Coverage {
        let (w, h) = (self.width, self.height);
        let mut data = vec![0u8; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let nx = y;
                let ny = w - 1 - x;
                data[(ny * h + nx) as usize] = self.get(x, y);
            }
        }
        Coverage {
            width: h,
            height: w,
            origin_x: self.baseline,
            baseline: w as i32 - self.origin_x,
            data,
        }
    }

    /// Bounding box of the non-zero pixels, `None` for a blank raster.
    pub fn ink_bounds(&self) -> Option<InkBox> {
        let mut ink: Option<InkBox> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) == 0 {
                    continue;
                }
                let b = ink.get_or_insert(InkBox {
                    x0: x,
                    y0: y,
                    x1: x + 1,
                    y1: y + 1,
                });
                b.x0 = b.x0.min(x);
                b.y0 = b.y0.min(y);
                b.x1 = b.x1.max(x + 1);
                b.y1 = b.y1.max(y + 1);
            }
        }
        ink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn inked(coverage: &Coverage) -> usize {
        coverage.data.iter().filter(|v| **v > 0).count()
    }

    #[test]
    fn bold_candidates_come_before_regular() {
        let request = FontRequest::new(vec!["arial".to_string()], true, false);
        let names: Vec<String> = request
            .candidates()
            .iter()
            .map(FontCandidate::file_name)
            .collect();
        assert_eq!(names[0], "arialbd.ttf");
        assert_eq!(names[1], "arialbd.otf");
        let bold_pos = names.iter().position(|n| n == "arialbd.ttf").unwrap();
        let regular_pos = names.iter().position(|n| n == "arial.ttf").unwrap();
        assert!(bold_pos < regular_pos);
        assert!(names.iter().any(|n| n == "DejaVuSans-Bold.ttf"));
    }

    #[test]
    fn fallback_families_are_not_duplicated() {
        let request = FontRequest::new(vec!["Arial".to_string()], false, false);
        let arial = request
            .candidates()
            .iter()
            .filter(|c| c.family.eq_ignore_ascii_case("arial"))
            .count();
        assert_eq!(arial, REGULAR_STYLES.len() * FONT_EXTENSIONS.len());
    }

    #[test]
    fn path_family_becomes_single_candidate() {
        let request = FontRequest::new(vec!["/opt/fonts/Custom.TTF".to_string()], true, true);
        let first = &request.candidates()[0];
        assert_eq!(first.file_name(), "/opt/fonts/Custom.TTF");
        assert!(first.is_path());
    }

    #[test]
    fn locator_matches_file_names_case_insensitively() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("truetype").join("dejavu");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("DejaVuSans.ttf"), b"not really a font").unwrap();
        fs::write(nested.join("readme.txt"), b"ignored").unwrap();

        let locator = FontLocator::from_dirs(&[dir.path().to_path_buf()]);
        assert_eq!(locator.len(), 1);
        let found = locator.locate(&FontCandidate::new("dejavusans", "", "ttf"));
        assert_eq!(found, Some(nested.join("DejaVuSans.ttf")));
    }

    #[test]
    fn unparseable_font_falls_back_to_builtin() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("arial.ttf"), b"garbage").unwrap();
        let locator = FontLocator::from_dirs(&[dir.path().to_path_buf()]);
        let request = FontRequest::new(vec!["arial".to_string()], false, false);
        let resolved = locator.resolve(&request, 40.0);
        assert!(resolved.is_builtin());
    }

    #[test]
    fn zero_size_never_loads_truetype() {
        let err = load_face(Path::new("/nonexistent.ttf"), 0.0).err().unwrap();
        assert!(matches!(err, FontLoadError::InvalidSize(_)));
    }

    #[test]
    fn builtin_glyph_scales_with_size() {
        let face = Face::Builtin {
            bold: false,
            italic: false,
        };
        let glyph = face.glyph('H', 48.0);
        assert_eq!(glyph.width, 48);
        assert_eq!(glyph.height, 48);
        assert!(glyph.coverage.iter().any(|v| *v == 255));
    }

    #[test]
    fn synthetic_bold_adds_ink() {
        let regular = Face::Builtin {
            bold: false,
            italic: false,
        }
        .render_line("I", 16.0, 0.0);
        let bold = Face::Builtin {
            bold: true,
            italic: false,
        }
        .render_line("I", 16.0, 0.0);
        assert!(inked(&bold) > inked(&regular));
    }

    #[test]
    fn letter_spacing_widens_line() {
        let face = Face::Builtin {
            bold: false,
            italic: false,
        };
        let tight = face.render_line("HHH", 16.0, 0.0);
        let loose = face.render_line("HHH", 16.0, 5.0);
        assert_eq!(loose.width, tight.width + 10);
    }

    #[test]
    fn rotation_swaps_dimensions_and_keeps_ink() {
        let face = Face::Builtin {
            bold: false,
            italic: false,
        };
        let line = face.render_line("Rust", 16.0, 0.0);
        let turned = line.rotate_ccw();
        assert_eq!((turned.width, turned.height), (line.height, line.width));
        assert_eq!(inked(&turned), inked(&line));
    }

    #[test]
    fn ink_bounds_skip_blank_cell_columns() {
        let face = Face::Builtin {
            bold: false,
            italic: false,
        };
        let line = face.render_line("I", 8.0, 0.0);
        assert_eq!((line.width, line.height), (8, 8));
        let ink = line.ink_bounds().unwrap();
        assert_eq!((ink.x0, ink.y0, ink.x1, ink.y1), (1, 0, 5, 7));
        assert_eq!((ink.width(), ink.height()), (4, 7));
        assert!(face.render_line(" ", 8.0, 0.0).ink_bounds().is_none());
    }
}
