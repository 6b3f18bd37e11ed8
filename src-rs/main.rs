mod colors;
mod config;
mod draw;
mod filter;
mod fonts;
mod generate;
mod layout;
mod logging;
mod mask;
mod sources;
mod stopwords;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::colors::COLORMAPS;
use crate::config::{default_config_path, AppConfig, ColorMode, MaskMode};
use crate::filter::{filter_text, filter_words, parse_exclusion_list};
use crate::fonts::{FontLocator, FontRequest};
use crate::generate::{GenerationRequest, Generator, MaskSource};
use crate::mask::{render_text_mask, MaskBitmap};
use crate::sources::{list_documents, load_documents, read_stdin, LoadReport};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(
    name = "wordcloud-magic",
    version,
    about = "Word clouds from documents: filter text, shape it with image or text masks, export PNG/JPG/SVG"
)]
struct Cli {
    /// Write a detailed, timestamped log file (see WCM_LOG_DIR)
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    debug: bool,
    /// Settings file (default: per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a word cloud and save it as PNG, JPG or SVG
    Generate(GenerateArgs),
    /// Print the filtered word stream (or its statistics)
    Filter(FilterArgs),
    /// Rasterize text into a placement mask PNG
    Mask(MaskArgs),
    /// Show the font candidate chain and which face resolves
    Fonts(FontsArgs),
    /// List the named colormaps
    Colormaps(ColormapsArgs),
    /// Inspect or create the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective settings as JSON
    Show,
    /// Write default settings to the config path
    Init {
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Print the config path
    Path,
}

#[derive(Args, Debug, Default)]
struct InputArgs {
    /// Input documents (.txt, .pdf, .docx, .pptx); "-" reads stdin
    inputs: Vec<PathBuf>,
    /// Load every supported document in a folder
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Literal text, used in addition to any documents
    #[arg(long)]
    text: Option<String>,
}

#[derive(Args, Debug, Default)]
struct FilterOverrides {
    #[arg(long)]
    min_length: Option<usize>,
    #[arg(long)]
    max_length: Option<usize>,
    /// Extra word to exclude (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<String>,
    /// File with one excluded word per line
    #[arg(long)]
    exclude_file: Option<PathBuf>,
    /// Only exclude the user-provided words
    #[arg(long, action = ArgAction::SetTrue)]
    no_default_stopwords: bool,
}

#[derive(Args, Debug, Default)]
struct GenerateArgs {
    #[command(flatten)]
    input: InputArgs,
    #[command(flatten)]
    filter: FilterOverrides,
    /// Output image path; the extension picks the format
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    max_words: Option<usize>,
    #[arg(long)]
    min_font_size: Option<f32>,
    #[arg(long)]
    max_font_size: Option<f32>,
    #[arg(long)]
    relative_scaling: Option<f32>,
    #[arg(long)]
    prefer_horizontal: Option<f32>,
    #[arg(long)]
    margin: Option<u32>,
    /// Named colormap (see `colormaps`)
    #[arg(long, conflicts_with_all = ["color", "gradient"])]
    colormap: Option<String>,
    /// Single word color, e.g. #1f77b4
    #[arg(long, conflicts_with = "gradient")]
    color: Option<String>,
    /// Custom gradient stops, comma separated
    #[arg(long, value_delimiter = ',')]
    gradient: Vec<String>,
    #[arg(long)]
    background: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    transparent: bool,
    /// Word font family or file (repeatable, tried in order)
    #[arg(long = "font")]
    font: Vec<String>,
    /// Extra font directory to index (repeatable)
    #[arg(long = "font-dir")]
    font_dir: Vec<PathBuf>,
    /// Shape the cloud with an image; white or transparent areas stay empty
    #[arg(long, conflicts_with = "mask_text")]
    mask_image: Option<PathBuf>,
    /// Shape the cloud with rendered text
    #[arg(long)]
    mask_text: Option<String>,
    #[command(flatten)]
    mask_style: MaskStyleArgs,
    #[arg(long)]
    contour_width: Option<u32>,
    #[arg(long)]
    contour_color: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    /// Persist the effective settings back to the config file
    #[arg(long, action = ArgAction::SetTrue)]
    save_config: bool,
    /// Print a JSON summary to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug, Default)]
struct MaskStyleArgs {
    #[arg(long)]
    mask_font: Vec<String>,
    #[arg(long)]
    mask_font_size: Option<u32>,
    #[arg(long, action = ArgAction::SetTrue)]
    mask_bold: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    mask_italic: bool,
    #[arg(long)]
    words_per_line: Option<usize>,
    #[arg(long)]
    stroke_width: Option<u32>,
    #[arg(long)]
    letter_spacing: Option<u32>,
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[command(flatten)]
    input: InputArgs,
    #[command(flatten)]
    filter: FilterOverrides,
    /// Print statistics JSON instead of the filtered text
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug, Default)]
struct MaskArgs {
    /// Text to rasterize
    text: String,
    #[arg(long, default_value = "mask.png")]
    out: PathBuf,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[command(flatten)]
    style: MaskStyleArgs,
    #[arg(long = "font-dir")]
    font_dir: Vec<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug, Default)]
struct FontsArgs {
    /// Family name or font file (repeatable)
    #[arg(long = "family")]
    family: Vec<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    bold: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    italic: bool,
    #[arg(long = "font-dir")]
    font_dir: Vec<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug, Default)]
struct ColormapsArgs {
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let _logger = match logging::init_logging(cli.debug) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("warning: {err:#}");
            None
        }
    };
    if let Err(err) = run(cli) {
        log::error!("{err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().or_else(default_config_path);
    let load_config = || match &config_path {
        Some(path) => AppConfig::load_or_default(path),
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Generate(args) => command_generate(args, load_config(), config_path.as_deref()),
        Commands::Filter(args) => command_filter(args, load_config()),
        Commands::Mask(args) => command_mask(args, load_config()),
        Commands::Fonts(args) => command_fonts(args, load_config()),
        Commands::Colormaps(args) => command_colormaps(args),
        Commands::Config { action } => command_config(action, config_path.as_deref()),
    }
}

fn apply_filter_overrides(config: &mut AppConfig, args: &FilterOverrides) -> Result<()> {
    if let Some(min) = args.min_length {
        config.min_word_length = min;
    }
    if let Some(max) = args.max_length {
        config.max_word_length = max;
    }
    if args.no_default_stopwords {
        config.use_default_stopwords = false;
    }
    config
        .forbidden_words
        .extend(args.exclude.iter().map(|w| w.trim().to_lowercase()).filter(|w| !w.is_empty()));
    if let Some(path) = &args.exclude_file {
        let block = fs::read_to_string(path)
            .with_context(|| format!("failed to read exclusion list: {}", path.display()))?;
        config.forbidden_words.extend(parse_exclusion_list(&block));
    }
    config.forbidden_words.sort();
    config.forbidden_words.dedup();
    Ok(())
}

fn apply_mask_style(config: &mut AppConfig, style: &MaskStyleArgs) {
    if !style.mask_font.is_empty() {
        config.mask_font = style.mask_font.clone();
    }
    if let Some(size) = style.mask_font_size {
        config.mask_font_size = size;
    }
    config.mask_bold |= style.mask_bold;
    config.mask_italic |= style.mask_italic;
    if let Some(n) = style.words_per_line {
        config.mask_words_per_line = n;
    }
    if let Some(w) = style.stroke_width {
        config.mask_stroke_width = w;
    }
    if let Some(s) = style.letter_spacing {
        config.mask_letter_spacing = s;
    }
}

fn apply_generate_overrides(config: &mut AppConfig, args: &GenerateArgs) -> Result<()> {
    apply_filter_overrides(config, &args.filter)?;

    macro_rules! set {
        ($field:ident, $value:expr) => {
            if let Some(v) = $value {
                config.$field = v;
            }
        };
    }
    set!(canvas_width, args.width);
    set!(canvas_height, args.height);
    set!(max_words, args.max_words);
    set!(min_font_size, args.min_font_size);
    set!(relative_scaling, args.relative_scaling);
    set!(prefer_horizontal, args.prefer_horizontal);
    set!(word_margin, args.margin);
    set!(contour_width, args.contour_width);
    set!(contour_color, args.contour_color.clone());
    set!(bg_color, args.background.clone());
    if args.max_font_size.is_some() {
        config.max_font_size = args.max_font_size;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.transparent {
        config.transparent_background = true;
    }

    if let Some(name) = &args.colormap {
        config.color_mode = ColorMode::Colormap;
        config.colormap = name.clone();
    } else if let Some(color) = &args.color {
        config.color_mode = ColorMode::Solid;
        config.solid_color = color.clone();
    } else if !args.gradient.is_empty() {
        config.color_mode = ColorMode::Gradient;
        config.gradient_colors = args.gradient.clone();
    }

    if !args.font.is_empty() {
        config.word_font = args.font.clone();
    }
    for dir in &args.font_dir {
        if !config.font_dirs.contains(dir) {
            config.font_dirs.push(dir.clone());
        }
    }

    if let Some(path) = &args.mask_image {
        config.mask_mode = MaskMode::Image;
        config.mask_image = Some(path.clone());
    } else if let Some(text) = &args.mask_text {
        config.mask_mode = MaskMode::Text;
        config.mask_text = text.clone();
    }
    apply_mask_style(config, &args.mask_style);
    Ok(())
}

/// Gathers text from documents, a folder, stdin and `--text`, in that order.
fn load_input_text(args: &InputArgs, config: &mut AppConfig) -> Result<(String, LoadReport)> {
    let mut stdin_text = None;
    let mut paths = Vec::new();
    for input in &args.inputs {
        if input.as_os_str() == "-" {
            stdin_text = Some(read_stdin()?);
        } else {
            paths.push(input.clone());
        }
    }
    if let Some(folder) = &args.folder {
        let found = list_documents(folder)?;
        info!("found {} documents in {}", found.len(), folder.display());
        paths.extend(found);
        config.last_folder = Some(folder.clone());
    }

    let report = load_documents(&paths);
    for failure in &report.failures {
        warn!("skipped {}: {}", failure.path.display(), failure.error);
    }
    let mut text = report.text.clone();
    for extra in [stdin_text.as_deref(), args.text.as_deref()].into_iter().flatten() {
        text.push_str(extra);
        text.push('\n');
    }
    debug!("loaded approximately {} words", report.approx_words);
    Ok((text, report))
}

fn build_request(text: String, config: &AppConfig) -> Result<GenerationRequest> {
    let layout = config.layout_options()?;
    let mask = match config.mask_mode {
        MaskMode::None => MaskSource::None,
        MaskMode::Image => {
            let Some(path) = &config.mask_image else {
                bail!("mask mode is 'image' but no mask image is set");
            };
            MaskSource::Bitmap(MaskBitmap::open(path, None)?)
        }
        MaskMode::Text => {
            if config.mask_text.trim().is_empty() {
                bail!("mask mode is 'text' but the mask text is empty");
            }
            MaskSource::Text(config.mask_spec())
        }
    };
    Ok(GenerationRequest {
        filter: config.filter_config(),
        layout,
        colors: config.color_spec()?,
        mask,
        font_families: config.word_font.clone(),
        ..GenerationRequest::new(text)
    })
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!("wordcloud-{}.png", timestamp_compact()))
}

fn command_generate(args: GenerateArgs, mut config: AppConfig, config_path: Option<&Path>) -> Result<()> {
    apply_generate_overrides(&mut config, &args)?;
    let (text, report) = load_input_text(&args.input, &mut config)?;
    let request = build_request(text, &config)?;
    let out = args.out.clone().unwrap_or_else(default_output_path);

    let started = Instant::now();
    let generator = Generator::new(FontLocator::scan(&config.font_dirs));
    let handle = generator.start(request)?;
    let output = loop {
        if let Some(result) = handle.try_result() {
            break result?;
        }
        thread::sleep(POLL_INTERVAL);
    };
    for notice in &output.notices {
        warn!("{notice}");
    }
    output.cloud.save(&out)?;
    info!(
        "saved {} in {} ms",
        out.display(),
        started.elapsed().as_millis()
    );

    if args.save_config {
        let Some(path) = config_path else {
            bail!("no config path available; pass --config");
        };
        config.save(path)?;
    }

    let summary = json!({
        "ok": true,
        "output": out,
        "generated_at": timestamp_iso(),
        "width": output.cloud.width,
        "height": output.cloud.height,
        "font": output.cloud.font_family,
        "kept_words": output.kept_words,
        "filter": output.stats,
        "documents": report,
        "notices": output.notices.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "words": output.cloud.words,
    });
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} ({} words placed, {}x{})",
            out.display(),
            output.cloud.words.len(),
            output.cloud.width,
            output.cloud.height
        );
    }
    Ok(())
}

fn command_filter(args: FilterArgs, mut config: AppConfig) -> Result<()> {
    apply_filter_overrides(&mut config, &args.filter)?;
    let (text, report) = load_input_text(&args.input, &mut config)?;
    if config.min_word_length > config.max_word_length {
        bail!(
            "minimum word length ({}) is larger than maximum ({})",
            config.min_word_length,
            config.max_word_length
        );
    }
    let filter = config.filter_config();
    if !args.json {
        println!("{}", filter_words(&text, &filter));
        return Ok(());
    }
    let outcome = filter_text(&text, &filter);
    let payload = json!({
        "stats": outcome.stats,
        "documents": report,
        "text": outcome.text,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn command_mask(args: MaskArgs, mut config: AppConfig) -> Result<()> {
    if args.text.trim().is_empty() {
        bail!("mask text is empty");
    }
    config.mask_text = args.text.clone();
    if let Some(w) = args.width {
        config.canvas_width = w;
    }
    if let Some(h) = args.height {
        config.canvas_height = h;
    }
    apply_mask_style(&mut config, &args.style);
    if config.canvas_width == 0 || config.canvas_height == 0 {
        bail!(
            "invalid mask size {}x{}",
            config.canvas_width,
            config.canvas_height
        );
    }

    let locator = FontLocator::scan(&[config.font_dirs.clone(), args.font_dir.clone()].concat());
    let render = render_text_mask(&config.mask_spec(), &locator);
    render.bitmap.save(&args.out)?;

    let (h, w, c) = render.bitmap.shape();
    let payload = json!({
        "output": args.out,
        "shape": [h, w, c],
        "font": render.font.to_string(),
        "dark_pixels": render.bitmap.dark_pixels(),
        "block": {
            "x": render.block.x,
            "y": render.block.y,
            "width": render.block.width,
            "height": render.block.height,
            "lines": render.block.lines.len(),
        },
    });
    if args.json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{} ({}x{}, font {})", args.out.display(), w, h, render.font);
    }
    Ok(())
}

#[derive(Serialize)]
struct CandidateRow {
    file: String,
    found: Option<PathBuf>,
}

fn command_fonts(args: FontsArgs, config: AppConfig) -> Result<()> {
    let families = if args.family.is_empty() {
        config.word_font.clone()
    } else {
        args.family.clone()
    };
    let locator = FontLocator::scan(&[config.font_dirs.clone(), args.font_dir.clone()].concat());
    let request = FontRequest::new(families, args.bold, args.italic);
    let rows: Vec<CandidateRow> = request
        .candidates()
        .iter()
        .map(|candidate| CandidateRow {
            file: candidate.file_name(),
            found: locator.locate(candidate),
        })
        .collect();
    let resolved = locator.resolve(&request, 32.0);

    if args.json {
        let payload = json!({
            "indexed_fonts": locator.len(),
            "candidates": rows,
            "resolved": resolved.origin.to_string(),
            "family": resolved.face.family_name(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    for row in &rows {
        match &row.found {
            Some(path) => println!("  {:<28} {}", row.file, path.display()),
            None => println!("  {:<28} -", row.file),
        }
    }
    println!("resolved: {} ({})", resolved.origin, resolved.face.family_name());
    Ok(())
}

fn command_colormaps(args: ColormapsArgs) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(&json!({ "colormaps": COLORMAPS }))?);
        return Ok(());
    }
    for info in COLORMAPS {
        let kind = if info.discrete { "discrete" } else { "continuous" };
        println!("{:<10} {:<10} {kind}", info.display_name, info.key);
    }
    Ok(())
}

fn command_config(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Path => {
            let Some(path) = config_path else {
                bail!("no config directory available on this platform");
            };
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let config = match config_path {
                Some(path) => AppConfig::load(path)?,
                None => AppConfig::default(),
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            let Some(path) = config_path else {
                bail!("no config directory available on this platform");
            };
            if path.exists() && !force {
                bail!("config already exists: {} (use --force)", path.display());
            }
            AppConfig::default().save(path)?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn timestamp_compact() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_json_pretty() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b.json");
        write_json_pretty(&target, &json!({"ok": true})).unwrap();
        assert!(fs::read_to_string(&target).unwrap().contains("\"ok\": true"));
    }

    #[test]
    fn default_output_is_timestamped_png() {
        let name = default_output_path().to_string_lossy().into_owned();
        assert!(name.starts_with("wordcloud-"));
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), "wordcloud-YYYYmmdd-HHMMSS.png".len());
    }

    #[test]
    fn parses_generate_flags() {
        let cli = Cli::try_parse_from([
            "wordcloud-magic",
            "--debug",
            "generate",
            "a.txt",
            "--gradient",
            "#000000,#ffffff",
            "--mask-text",
            "HI",
            "--exclude",
            "Foo",
        ])
        .unwrap();
        assert!(cli.debug);
        let Commands::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.input.inputs, vec![PathBuf::from("a.txt")]);
        assert_eq!(args.gradient.len(), 2);

        let mut config = AppConfig::default();
        apply_generate_overrides(&mut config, &args).unwrap();
        assert_eq!(config.color_mode, ColorMode::Gradient);
        assert_eq!(config.mask_mode, MaskMode::Text);
        assert_eq!(config.forbidden_words, vec!["foo".to_string()]);
    }

    #[test]
    fn conflicting_color_flags_are_rejected() {
        assert!(Cli::try_parse_from([
            "wordcloud-magic",
            "generate",
            "--colormap",
            "viridis",
            "--color",
            "#ff0000",
        ])
        .is_err());
    }

    #[test]
    fn loads_folder_and_literal_text() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("one.txt"), "alpha beta").unwrap();
        fs::write(dir.path().join("skip.md"), "ignored").unwrap();
        let args = InputArgs {
            inputs: Vec::new(),
            folder: Some(dir.path().to_path_buf()),
            text: Some("gamma".to_string()),
        };
        let mut config = AppConfig::default();
        let (text, report) = load_input_text(&args, &mut config).unwrap();
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(text.split_whitespace().collect::<Vec<_>>(), ["alpha", "beta", "gamma"]);
        assert_eq!(config.last_folder.as_deref(), Some(dir.path()));
    }

    #[test]
    fn exclusion_file_extends_forbidden_words() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("exclude.txt");
        fs::write(&list, "Lorem\n\n  ipsum \n").unwrap();
        let mut config = AppConfig::default();
        let overrides = FilterOverrides {
            exclude_file: Some(list),
            ..FilterOverrides::default()
        };
        apply_filter_overrides(&mut config, &overrides).unwrap();
        assert_eq!(config.forbidden_words, vec!["ipsum", "lorem"]);
    }

    #[test]
    fn request_requires_mask_input_for_mask_modes() {
        let config = AppConfig {
            mask_mode: MaskMode::Text,
            ..AppConfig::default()
        };
        assert!(build_request("words".into(), &config).is_err());
        let config = AppConfig {
            mask_mode: MaskMode::Image,
            ..AppConfig::default()
        };
        assert!(build_request("words".into(), &config).is_err());
        let request = build_request("words".into(), &AppConfig::default()).unwrap();
        assert_eq!(request.mask, MaskSource::None);
    }
}
