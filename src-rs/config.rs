use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::colors::{parse_color, ColorSpec};
use crate::filter::FilterConfig;
use crate::layout::LayoutOptions;
use crate::mask::MaskSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Colormap,
    Solid,
    Gradient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskMode {
    #[default]
    None,
    Image,
    Text,
}

/// Persisted settings. Missing keys take their defaults and unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub min_word_length: usize,
    pub max_word_length: usize,
    pub forbidden_words: Vec<String>,
    pub use_default_stopwords: bool,

    pub color_mode: ColorMode,
    pub colormap: String,
    pub solid_color: String,
    pub gradient_colors: Vec<String>,

    pub canvas_width: u32,
    pub canvas_height: u32,
    pub bg_color: String,
    pub transparent_background: bool,
    pub max_words: usize,
    pub relative_scaling: f32,
    pub min_font_size: f32,
    pub max_font_size: Option<f32>,
    pub prefer_horizontal: f32,
    pub word_margin: u32,
    pub word_font: Vec<String>,

    pub mask_mode: MaskMode,
    pub mask_image: Option<PathBuf>,
    pub contour_width: u32,
    pub contour_color: String,
    pub mask_text: String,
    pub mask_font: Vec<String>,
    pub mask_font_size: u32,
    pub mask_bold: bool,
    pub mask_italic: bool,
    pub mask_words_per_line: usize,
    pub mask_stroke_width: u32,
    pub mask_letter_spacing: u32,

    pub font_dirs: Vec<PathBuf>,
    pub seed: Option<u64>,
    pub last_folder: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            min_word_length: 3,
            max_word_length: 20,
            forbidden_words: Vec::new(),
            use_default_stopwords: true,
            color_mode: ColorMode::Colormap,
            colormap: "viridis".to_string(),
            solid_color: "#1f77b4".to_string(),
            gradient_colors: vec!["#0d0887".to_string(), "#f0f921".to_string()],
            canvas_width: 800,
            canvas_height: 600,
            bg_color: "#FFFFFF".to_string(),
            transparent_background: false,
            max_words: 200,
            relative_scaling: 0.5,
            min_font_size: 10.0,
            max_font_size: None,
            prefer_horizontal: 0.9,
            word_margin: 2,
            word_font: Vec::new(),
            mask_mode: MaskMode::None,
            mask_image: None,
            contour_width: 2,
            contour_color: "#000000".to_string(),
            mask_text: String::new(),
            mask_font: vec!["arial".to_string()],
            mask_font_size: 200,
            mask_bold: false,
            mask_italic: false,
            mask_words_per_line: 1,
            mask_stroke_width: 0,
            mask_letter_spacing: 0,
            font_dirs: Vec::new(),
            seed: None,
            last_folder: None,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "WordCloudMagic", "wordcloud-magic")
        .map(|dirs| dirs.config_dir().join("config.json"))
}

impl AppConfig {
    /// A missing file yields the defaults; unreadable or malformed JSON is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON: {}", path.display()))
    }

    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|err| {
            warn!("{err:#}; using default settings");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::write_json_pretty(path, self)
    }

    pub fn filter_config(&self) -> FilterConfig {
        let config = FilterConfig::new(self.min_word_length, self.max_word_length);
        let config = if self.use_default_stopwords {
            config.with_default_stopwords()
        } else {
            config
        };
        config.with_exclusions(&self.forbidden_words)
    }

    pub fn color_spec(&self) -> Result<ColorSpec> {
        let spec = match self.color_mode {
            ColorMode::Colormap => ColorSpec::Colormap(self.colormap.clone()),
            ColorMode::Solid => ColorSpec::solid_from_hex(&self.solid_color)?,
            ColorMode::Gradient => ColorSpec::gradient_from_hex(&self.gradient_colors)?,
        };
        Ok(spec)
    }

    pub fn layout_options(&self) -> Result<LayoutOptions> {
        let background = if self.transparent_background {
            None
        } else {
            Some(parse_color(&self.bg_color)?)
        };
        Ok(LayoutOptions {
            width: self.canvas_width,
            height: self.canvas_height,
            max_words: self.max_words,
            min_font_size: self.min_font_size,
            max_font_size: self.max_font_size,
            relative_scaling: self.relative_scaling,
            prefer_horizontal: self.prefer_horizontal,
            margin: self.word_margin,
            background,
            contour_width: if self.mask_mode == MaskMode::None {
                0
            } else {
                self.contour_width
            },
            contour_color: parse_color(&self.contour_color)?,
            seed: self.seed,
            ..LayoutOptions::default()
        })
    }

    /// The text mask is sized to the configured canvas.
    pub fn mask_spec(&self) -> MaskSpec {
        MaskSpec {
            font_families: self.mask_font.clone(),
            point_size: self.mask_font_size,
            bold: self.mask_bold,
            italic: self.mask_italic,
            words_per_line: self.mask_words_per_line,
            stroke_width: self.mask_stroke_width,
            letter_spacing: self.mask_letter_spacing,
            ..MaskSpec::new(self.mask_text.clone(), self.canvas_width, self.canvas_height)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::tempdir;

    #[test]
    fn missing_keys_take_defaults_and_unknown_keys_are_ignored() {
        let config: AppConfig =
            serde_json::from_str(r#"{"max_words": 50, "color_mode": "solid", "theme": "dark"}"#)
                .unwrap();
        assert_eq!(config.max_words, 50);
        assert_eq!(config.color_mode, ColorMode::Solid);
        assert_eq!(config.min_word_length, 3);
        assert_eq!(config.colormap, "viridis");
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig {
            forbidden_words: vec!["lorem".into()],
            mask_mode: MaskMode::Text,
            mask_text: "HELLO".into(),
            seed: Some(3),
            ..AppConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_loads_defaults_and_bad_json_falls_back() {
        let dir = tempdir().unwrap();
        assert_eq!(
            AppConfig::load(&dir.path().join("absent.json")).unwrap(),
            AppConfig::default()
        );
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(AppConfig::load(&bad).is_err());
        assert_eq!(AppConfig::load_or_default(&bad), AppConfig::default());
    }

    #[test]
    fn derives_pipeline_settings() {
        let config = AppConfig {
            forbidden_words: vec!["Widget".into()],
            use_default_stopwords: false,
            transparent_background: true,
            ..AppConfig::default()
        };
        let filter = config.filter_config();
        assert!(filter.is_excluded("widget"));
        assert!(!filter.is_excluded("the"));

        let layout = config.layout_options().unwrap();
        assert_eq!(layout.background, None);
        assert_eq!(layout.contour_width, 0);

        let with_mask = AppConfig {
            mask_mode: MaskMode::Image,
            ..AppConfig::default()
        };
        let layout = with_mask.layout_options().unwrap();
        assert_eq!(layout.contour_width, 2);
        assert_eq!(layout.background, Some(Rgba([255, 255, 255, 255])));
    }

    #[test]
    fn bad_colors_surface_as_errors() {
        let config = AppConfig {
            color_mode: ColorMode::Gradient,
            gradient_colors: vec!["#000000".into()],
            ..AppConfig::default()
        };
        assert!(config.color_spec().is_ok());
        assert!(config.color_spec().unwrap().palette().is_err());
        let config = AppConfig {
            bg_color: "white".into(),
            ..AppConfig::default()
        };
        assert!(config.layout_options().is_err());
    }
}
