use image::{Rgb, Rgba};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColorError {
    #[error("invalid color: {0}")]
    InvalidColor(String),
    #[error("unknown colormap: {0}")]
    UnknownColormap(String),
    #[error("a custom gradient needs at least two colors, got {0}")]
    GradientTooShort(usize),
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ColormapInfo {
    pub display_name: &'static str,
    pub key: &'static str,
    pub discrete: bool,
    #[serde(skip)]
    stops: &'static [&'static str],
}

macro_rules! colormap {
    ($display:expr, $key:expr, $discrete:expr, [$($stop:expr),+ $(,)?]) => {
        ColormapInfo {
            display_name: $display,
            key: $key,
            discrete: $discrete,
            stops: &[$($stop),+],
        }
    };
}

pub const COLORMAPS: &[ColormapInfo] = &[
    colormap!("Viridis", "viridis", false, ["#440154", "#3b528b", "#21918c", "#5ec962", "#fde725"]),
    colormap!("Plasma", "plasma", false, ["#0d0887", "#7e03a8", "#cc4778", "#f89540", "#f0f921"]),
    colormap!("Inferno", "inferno", false, ["#000004", "#57106e", "#bc3754", "#f98e09", "#fcffa4"]),
    colormap!("Magma", "magma", false, ["#000004", "#51127c", "#b73779", "#fc8961", "#fcfdbf"]),
    colormap!("Cool", "cool", false, ["#00ffff", "#ff00ff"]),
    colormap!("Hot", "hot", false, ["#0b0000", "#ff0000", "#ffff00", "#ffffff"]),
    colormap!("Spring", "spring", false, ["#ff00ff", "#ffff00"]),
    colormap!("Summer", "summer", false, ["#008066", "#ffff66"]),
    colormap!("Autumn", "autumn", false, ["#ff0000", "#ffff00"]),
    colormap!("Winter", "winter", false, ["#0000ff", "#00ff80"]),
    colormap!("Ocean", "ocean", false, ["#008000", "#000055", "#0055aa", "#ffffff"]),
    colormap!("Rainbow", "rainbow", false, ["#8000ff", "#0080ff", "#00ffff", "#80ff80", "#ffff00", "#ff8000", "#ff0000"]),
    colormap!("Sunset", "RdYlBu", false, ["#a50026", "#f46d43", "#fee090", "#e0f3f8", "#74add1", "#313695"]),
    colormap!("Pastel", "Pastel1", true, ["#fbb4ae", "#b3cde3", "#ccebc5", "#decbe4", "#fed9a6", "#ffffcc", "#e5d8bd", "#fddaec", "#f2f2f2"]),
    colormap!("Dark", "Dark2", true, ["#1b9e77", "#d95f02", "#7570b3", "#e7298a", "#66a61e", "#e6ab02", "#a6761d", "#666666"]),
    colormap!("Paired", "Paired", true, ["#a6cee3", "#1f78b4", "#b2df8a", "#33a02c", "#fb9a99", "#e31a1c", "#fdbf6f", "#ff7f00", "#cab2d6", "#6a3d9a", "#ffff99", "#b15928"]),
];

pub fn find_colormap(name: &str) -> Option<&'static ColormapInfo> {
    let name = name.trim();
    COLORMAPS
        .iter()
        .find(|c| c.key.eq_ignore_ascii_case(name) || c.display_name.eq_ignore_ascii_case(name))
}

pub fn parse_hex_color(raw: &str) -> Option<Rgba<u8>> {
    let hex = raw.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let byte = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut out = [255u8; 4];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            Some(Rgba(out))
        }
        6 => Some(Rgba([byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, 255])),
        8 => Some(Rgba([
            byte(&hex[0..2])?,
            byte(&hex[2..4])?,
            byte(&hex[4..6])?,
            byte(&hex[6..8])?,
        ])),
        _ => None,
    }
}

pub fn parse_color(raw: &str) -> Result<Rgba<u8>, ColorError> {
    parse_hex_color(raw).ok_or_else(|| ColorError::InvalidColor(raw.to_string()))
}

fn rgb(color: Rgba<u8>) -> Rgb<u8> {
    Rgb([color[0], color[1], color[2]])
}

pub fn to_hex(color: Rgb<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColorSpec {
    Solid(Rgb<u8>),
    Colormap(String),
    Gradient(Vec<Rgb<u8>>),
}

impl ColorSpec {
    pub fn palette(&self) -> Result<Palette, ColorError> {
        match self {
            ColorSpec::Solid(color) => Ok(Palette {
                stops: vec![*color],
                discrete: true,
            }),
            ColorSpec::Colormap(name) => {
                let info = find_colormap(name)
                    .ok_or_else(|| ColorError::UnknownColormap(name.clone()))?;
                let stops = info
                    .stops
                    .iter()
                    .map(|s| parse_color(s).map(rgb))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Palette {
                    stops,
                    discrete: info.discrete,
                })
            }
            ColorSpec::Gradient(stops) => {
                if stops.len() < 2 {
                    return Err(ColorError::GradientTooShort(stops.len()));
                }
                Ok(Palette {
                    stops: stops.clone(),
                    discrete: false,
                })
            }
        }
    }

    pub fn gradient_from_hex<S: AsRef<str>>(colors: &[S]) -> Result<Self, ColorError> {
        let stops = colors
            .iter()
            .map(|c| parse_color(c.as_ref()).map(rgb))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ColorSpec::Gradient(stops))
    }

    pub fn solid_from_hex(color: &str) -> Result<Self, ColorError> {
        parse_color(color).map(|c| ColorSpec::Solid(rgb(c)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    stops: Vec<Rgb<u8>>,
    discrete: bool,
}

impl Palette {
    pub fn sample(&self, t: f64) -> Rgb<u8> {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let n = self.stops.len();
        if n == 1 {
            return self.stops[0];
        }
        if self.discrete {
            let idx = ((t * n as f64).floor() as usize).min(n - 1);
            return self.stops[idx];
        }
        let pos = t * (n - 1) as f64;
        let idx = (pos.floor() as usize).min(n - 2);
        let frac = pos - idx as f64;
        let a = self.stops[idx];
        let b = self.stops[idx + 1];
        let lerp = |x: u8, y: u8| (f64::from(x) + (f64::from(y) - f64::from(x)) * frac).round() as u8;
        Rgb([lerp(a[0], b[0]), lerp(a[1], b[1]), lerp(a[2], b[2])])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_forms() {
        assert_eq!(parse_hex_color("#fff"), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(parse_hex_color("#1F77b4"), Some(Rgba([31, 119, 180, 255])));
        assert_eq!(parse_hex_color("#00000080"), Some(Rgba([0, 0, 0, 128])));
        assert_eq!(parse_hex_color("1f77b4"), None);
        assert_eq!(parse_hex_color("#12345"), None);
        assert_eq!(parse_hex_color("#gg0000"), None);
    }

    #[test]
    fn colormaps_resolve_by_key_or_display_name() {
        assert_eq!(find_colormap("Sunset").map(|c| c.key), Some("RdYlBu"));
        assert_eq!(find_colormap("rdylbu").map(|c| c.key), Some("RdYlBu"));
        assert!(find_colormap("jet").is_none());
        for info in COLORMAPS {
            assert!(ColorSpec::Colormap(info.key.to_string()).palette().is_ok());
        }
    }

    #[test]
    fn gradient_endpoints_match_stops() {
        let palette = ColorSpec::gradient_from_hex(&["#000000", "#ffffff"])
            .unwrap()
            .palette()
            .unwrap();
        assert_eq!(palette.sample(0.0), Rgb([0, 0, 0]));
        assert_eq!(palette.sample(1.0), Rgb([255, 255, 255]));
        assert_eq!(palette.sample(0.5), Rgb([128, 128, 128]));
    }

    #[test]
    fn discrete_maps_return_exact_stops() {
        let palette = ColorSpec::Colormap("Dark".into()).palette().unwrap();
        assert_eq!(palette.sample(0.0), Rgb([0x1b, 0x9e, 0x77]));
        assert_eq!(palette.sample(1.0), Rgb([0x66, 0x66, 0x66]));
    }

    #[test]
    fn invalid_specs_are_rejected() {
        assert_eq!(
            ColorSpec::Colormap("nope".into()).palette(),
            Err(ColorError::UnknownColormap("nope".into()))
        );
        assert_eq!(
            ColorSpec::Gradient(vec![Rgb([1, 2, 3])]).palette(),
            Err(ColorError::GradientTooShort(1))
        );
        assert!(ColorSpec::solid_from_hex("red").is_err());
    }
}
