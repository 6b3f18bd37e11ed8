use log::{debug, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

use crate::colors::{ColorError, ColorSpec};
use crate::filter::{filter_text, FilterConfig, FilterStats};
use crate::fonts::{FontLocator, FontOrigin, FontRequest};
use crate::layout::{build_cloud, count_words, LayoutError, LayoutOptions, WordCloud};
use crate::mask::{render_text_mask, MaskBitmap, MaskSpec};

/// Load scale for the word face; glyphs are rasterized per size at layout time.
const WORD_FACE_PX: f32 = 100.0;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no text loaded; add documents or paste text first")]
    NoText,
    #[error("minimum word length ({min}) is larger than maximum ({max})")]
    InvalidLengthRange { min: usize, max: usize },
    #[error("no words left after filtering; relax the length range or exclusion list")]
    NoWordsAfterFilter,
    #[error("a generation is already running")]
    Busy,
    #[error(transparent)]
    Color(#[from] ColorError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("failed to start worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("worker stopped without a result")]
    WorkerLost,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MaskSource {
    #[default]
    None,
    Bitmap(MaskBitmap),
    Text(MaskSpec),
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub text: String,
    pub filter: FilterConfig,
    pub layout: LayoutOptions,
    pub colors: ColorSpec,
    pub mask: MaskSource,
    pub font_families: Vec<String>,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filter: FilterConfig::default(),
            layout: LayoutOptions::default(),
            colors: ColorSpec::Colormap("viridis".to_string()),
            mask: MaskSource::None,
            font_families: Vec::new(),
        }
    }

    /// Checks that run before any work is scheduled.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.text.trim().is_empty() {
            return Err(GenerationError::NoText);
        }
        if self.filter.min_length > self.filter.max_length {
            return Err(GenerationError::InvalidLengthRange {
                min: self.filter.min_length,
                max: self.filter.max_length,
            });
        }
        Ok(())
    }
}

/// Degraded-but-successful conditions worth surfacing to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    BuiltinFont { purpose: &'static str },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::BuiltinFont { purpose } => {
                write!(f, "no requested {purpose} font was found; using the built-in font")
            }
        }
    }
}

pub struct GenerationOutput {
    pub cloud: WordCloud,
    pub kept_words: usize,
    pub stats: FilterStats,
    pub notices: Vec<Notice>,
}

pub fn run_generation(
    request: &GenerationRequest,
    locator: &FontLocator,
) -> Result<GenerationOutput, GenerationError> {
    request.validate()?;

    let filtered = filter_text(&request.text, &request.filter);
    if filtered.is_empty() {
        return Err(GenerationError::NoWordsAfterFilter);
    }
    debug!(
        "filter kept {} of {} tokens",
        filtered.stats.kept, filtered.stats.total
    );

    let mut notices = Vec::new();
    let mask = match &request.mask {
        MaskSource::None => None,
        MaskSource::Bitmap(bitmap) => Some(bitmap.clone()),
        MaskSource::Text(spec) => {
            let render = render_text_mask(spec, locator);
            if render.font == FontOrigin::Builtin {
                notices.push(Notice::BuiltinFont { purpose: "mask" });
            }
            Some(render.bitmap)
        }
    };

    let palette = request.colors.palette()?;
    let font = locator.resolve(
        &FontRequest::new(request.font_families.clone(), false, false),
        WORD_FACE_PX,
    );
    if font.is_builtin() {
        notices.push(Notice::BuiltinFont { purpose: "word" });
    }

    let frequencies = count_words(&filtered.text);
    let cloud = build_cloud(&frequencies, &request.layout, mask.as_ref(), &palette, &font)?;
    info!(
        "placed {} of {} distinct words on {}x{}",
        cloud.words.len(),
        frequencies.len(),
        cloud.width,
        cloud.height
    );

    Ok(GenerationOutput {
        cloud,
        kept_words: filtered.stats.kept,
        stats: filtered.stats,
        notices,
    })
}

/// Clears the busy flag when the worker finishes, including by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct GenerationHandle {
    rx: Receiver<Result<GenerationOutput, GenerationError>>,
}

impl GenerationHandle {
    /// Non-blocking poll; `None` while the worker is still running.
    pub fn try_result(&self) -> Option<Result<GenerationOutput, GenerationError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(GenerationError::WorkerLost)),
        }
    }

    #[cfg(test)]
    pub fn wait(self) -> Result<GenerationOutput, GenerationError> {
        self.rx.recv().unwrap_or(Err(GenerationError::WorkerLost))
    }
}

/// Runs one generation at a time off the calling thread.
#[derive(Clone)]
pub struct Generator {
    busy: Arc<AtomicBool>,
    locator: Arc<FontLocator>,
}

impl Generator {
    pub fn new(locator: FontLocator) -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            locator: Arc::new(locator),
        }
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn start(&self, request: GenerationRequest) -> Result<GenerationHandle, GenerationError> {
        request.validate()?;
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(GenerationError::Busy);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let busy = Arc::clone(&self.busy);
        let locator = Arc::clone(&self.locator);
        let spawned = thread::Builder::new()
            .name("wordcloud-worker".to_string())
            .spawn(move || {
                let guard = BusyGuard(busy);
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_generation(&request, &locator)
                }))
                .unwrap_or_else(|_| {
                    warn!("word cloud worker panicked");
                    Err(GenerationError::WorkerLost)
                });
                drop(guard);
                if tx.send(result).is_err() {
                    debug!("generation result dropped; handle already gone");
                }
            });

        match spawned {
            Ok(_) => Ok(GenerationHandle { rx }),
            Err(err) => {
                self.busy.store(false, Ordering::SeqCst);
                Err(GenerationError::Spawn(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;
    use std::time::{Duration, Instant};

    fn request(text: &str) -> GenerationRequest {
        let mut req = GenerationRequest::new(text);
        req.layout = LayoutOptions {
            width: 240,
            height: 160,
            max_font_size: Some(40.0),
            seed: Some(7),
            ..LayoutOptions::default()
        };
        req
    }

    #[test]
    fn validation_rejects_empty_text_and_inverted_range() {
        assert!(matches!(request("   ").validate(), Err(GenerationError::NoText)));
        let mut req = request("words here");
        req.filter = FilterConfig::new(8, 4);
        assert!(matches!(
            req.validate(),
            Err(GenerationError::InvalidLengthRange { min: 8, max: 4 })
        ));
    }

    #[test]
    fn everything_filtered_out_is_an_error() {
        let err = run_generation(&request("the and of 123 42"), &FontLocator::empty());
        assert!(matches!(err, Err(GenerationError::NoWordsAfterFilter)));
    }

    #[test]
    fn builtin_font_is_reported_as_notice() {
        let out = run_generation(
            &request("rust rust rust cloud cloud words"),
            &FontLocator::empty(),
        )
        .unwrap();
        assert_eq!(out.kept_words, 6);
        assert!(!out.cloud.words.is_empty());
        assert_eq!(out.cloud.words[0].text, "rust");
        assert_eq!(out.notices, vec![Notice::BuiltinFont { purpose: "word" }]);
    }

    #[test]
    fn text_mask_sets_canvas_size() {
        let mut req = request("alpha beta gamma delta alpha beta alpha");
        req.mask = MaskSource::Text(MaskSpec::new("O", 120, 90));
        let out = run_generation(&req, &FontLocator::empty()).unwrap();
        assert_eq!((out.cloud.width, out.cloud.height), (120, 90));
        assert_eq!(out.notices.len(), 2);
    }

    #[test]
    fn fully_blocked_mask_places_nothing() {
        let mut req = request("alpha beta gamma");
        req.mask = MaskSource::Bitmap(MaskBitmap::from_gray(GrayImage::from_pixel(
            50,
            50,
            image::Luma([255]),
        )));
        let err = run_generation(&req, &FontLocator::empty());
        assert!(matches!(
            err,
            Err(GenerationError::Layout(LayoutError::NothingPlaced { .. }))
        ));
    }

    #[test]
    fn worker_returns_cloud_and_clears_busy() {
        let generator = Generator::new(FontLocator::empty());
        let handle = generator
            .start(request("worker worker thread thread thread"))
            .unwrap();
        let out = handle.wait().unwrap();
        assert_eq!(out.cloud.words[0].text, "thread");
        let deadline = Instant::now() + Duration::from_secs(5);
        while generator.is_busy() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!generator.is_busy());
    }

    #[test]
    fn second_start_while_running_is_busy() {
        let generator = Generator::new(FontLocator::empty());
        generator.busy.store(true, Ordering::SeqCst);
        assert!(matches!(
            generator.start(request("some words here")),
            Err(GenerationError::Busy)
        ));
        generator.busy.store(false, Ordering::SeqCst);
        let handle = generator.start(request("some words here")).unwrap();
        let mut polled = None;
        let deadline = Instant::now() + Duration::from_secs(30);
        while polled.is_none() && Instant::now() < deadline {
            polled = handle.try_result();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(polled.unwrap().is_ok());
    }

    #[test]
    fn invalid_request_never_marks_busy() {
        let generator = Generator::new(FontLocator::empty());
        assert!(generator.start(request("")).is_err());
        assert!(!generator.is_busy());
    }
}
