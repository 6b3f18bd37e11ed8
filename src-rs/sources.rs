use anyhow::{bail, Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::filter::approx_word_count;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "pdf", "docx", "pptx"];

static PARAGRAPH_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</(?:w|a):p>").expect("paragraph pattern"));
static RUN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:w|a):t(?:\s[^>]*)?>([^<]*)</(?:w|a):t>").expect("run text pattern")
});
static XML_ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#([0-9]+)|#[xX]([0-9a-fA-F]+)|(lt|gt|quot|apos|amp));").expect("entity pattern")
});
static SLIDE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").expect("slide pattern"));

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn is_supported(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

pub fn list_documents(folder: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(folder)
        .with_context(|| format!("failed to read folder: {}", folder.display()))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_supported(path))
        .collect();
    files.sort();
    Ok(files)
}

/// One pass, so `&amp;lt;` stays `&lt;`. Unknown or invalid references are kept verbatim.
fn unescape_xml(s: &str) -> String {
    XML_ENTITY
        .replace_all(s, |caps: &Captures| {
            let decoded = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32)
            } else {
                match caps.get(3).map(|m| m.as_str()) {
                    Some("lt") => Some('<'),
                    Some("gt") => Some('>'),
                    Some("quot") => Some('"'),
                    Some("apos") => Some('\''),
                    Some("amp") => Some('&'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Concatenates `<w:t>`/`<a:t>` runs, one output line per paragraph.
fn xml_paragraph_text(xml: &str) -> String {
    PARAGRAPH_END
        .split(xml)
        .map(|para| {
            RUN_TEXT
                .captures_iter(para)
                .filter_map(|c| c.get(1))
                .map(|m| unescape_xml(m.as_str()))
                .collect::<String>()
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_zip_entry<R: Read + io::Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("missing archive entry: {name}"))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .with_context(|| format!("failed to read archive entry: {name}"))?;
    Ok(xml)
}

fn read_docx(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("not a valid DOCX archive: {}", path.display()))?;
    let xml = read_zip_entry(&mut archive, "word/document.xml")?;
    Ok(xml_paragraph_text(&xml))
}

fn read_pptx(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("not a valid PPTX archive: {}", path.display()))?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = SLIDE_NAME.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut parts = Vec::with_capacity(slides.len());
    for (_, name) in slides {
        let xml = read_zip_entry(&mut archive, &name)?;
        parts.push(xml_paragraph_text(&xml));
    }
    Ok(parts.join("\n"))
}

fn read_pdf(path: &Path) -> Result<String> {
    let doc = lopdf::Document::load(path)
        .with_context(|| format!("failed to open PDF: {}", path.display()))?;
    let mut out = String::new();
    for page in doc.get_pages().keys() {
        match doc.extract_text(&[*page]) {
            Ok(text) => {
                out.push_str(&text);
                out.push('\n');
            }
            Err(err) => debug!("page {page} of {} has no extractable text: {err}", path.display()),
        }
    }
    Ok(out)
}

pub fn read_document(path: &Path) -> Result<String> {
    match extension_of(path).as_deref() {
        Some("txt") => {
            let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            Ok(String::from_utf8_lossy(&raw).into_owned())
        }
        Some("pdf") => read_pdf(path),
        Some("docx") => read_docx(path),
        Some("pptx") => read_pptx(path),
        _ => bail!("unsupported document type: {}", path.display()),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    #[serde(skip)]
    pub text: String,
    pub loaded: Vec<PathBuf>,
    pub failures: Vec<LoadFailure>,
    pub approx_words: usize,
}

/// Reads every path; a failing file is recorded and the rest still load.
pub fn load_documents(paths: &[PathBuf]) -> LoadReport {
    let mut report = LoadReport::default();
    for path in paths {
        match read_document(path) {
            Ok(text) => {
                report.text.push_str(&text);
                report.text.push('\n');
                report.loaded.push(path.clone());
            }
            Err(err) => {
                warn!("error reading {}: {err:#}", path.display());
                report.failures.push(LoadFailure {
                    path: path.clone(),
                    error: format!("{err:#}"),
                });
            }
        }
    }
    report.approx_words = approx_word_count(&report.text);
    report
}

pub fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read text from stdin")?;
    Ok(buf)
}
