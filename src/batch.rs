//! Folder-level standardization: discovery, proxy pairing, per-slide
//! processing and the pre/post batch reports.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, StandardizeError};
use crate::report::{write_batch_info, POST_REPORT_NAME, PRE_REPORT_NAME};
use crate::slide::{slide_id, Slide, StandardizationRequest};
use crate::source::{open_flat, SourceOpener};

/// Extension of standardized outputs.
pub const OUTPUT_EXTENSION: &str = "tiff";

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub slides_dir: PathBuf,
    pub objective_powers: Vec<f64>,
    pub output_dir: PathBuf,
    pub proxies_dir: Option<PathBuf>,
    pub blur: bool,
    pub reports: bool,
    pub slide_ext: String,
    pub proxy_suffix: String,
}

impl BatchConfig {
    /// `<output>/<slide_id>/<power>x/<slide_id>.tiff`
    pub fn output_path(&self, slide_id: &str, power: f64) -> PathBuf {
        self.output_dir
            .join(slide_id)
            .join(format!("{}x", power))
            .join(format!("{}.{}", slide_id, OUTPUT_EXTENSION))
    }

    pub fn pre_report_path(&self) -> PathBuf {
        self.output_dir.join(PRE_REPORT_NAME)
    }

    pub fn post_report_path(&self) -> PathBuf {
        self.output_dir.join(POST_REPORT_NAME)
    }
}

/// Cooperative cancellation flag shared between the batch and whoever handles interrupts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub slides: usize,
    pub outputs: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Recursively list files under `root` accepted by `keep`, sorted by path.
pub fn discover_files(root: &Path, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| keep(p))
        .collect();
    files.sort();
    files
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext.trim_start_matches('.')))
        .unwrap_or(false)
}

pub fn discover_slides(dir: &Path, ext: &str) -> Vec<PathBuf> {
    discover_files(dir, |p| has_extension(p, ext))
}

pub fn discover_proxies(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    discover_files(dir, |p| {
        p.file_name()
            .map(|n| n.to_string_lossy().ends_with(suffix))
            .unwrap_or(false)
    })
}

/// Slide id of a proxy file: its name without `suffix` (or without extension
/// when the suffix does not match).
pub fn proxy_slide_id(path: &Path, suffix: &str) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(suffix) {
        Some(id) => id.to_string(),
        None => slide_id(path),
    }
}

/// Pair sorted slides with sorted proxies by position.
pub fn pair_proxies(slides: Vec<PathBuf>, proxies: Option<Vec<PathBuf>>) -> Result<Vec<(PathBuf, Option<PathBuf>)>> {
    match proxies {
        None => Ok(slides.into_iter().map(|s| (s, None)).collect()),
        Some(proxies) => {
            if proxies.len() != slides.len() {
                return Err(StandardizeError::ProxyCountMismatch {
                    slides: slides.len(),
                    proxies: proxies.len(),
                });
            }
            Ok(slides.into_iter().zip(proxies.into_iter().map(Some)).collect())
        }
    }
}

/// Standardize one slide to every configured power. Returns the number of files written.
pub fn process_slide(
    config: &BatchConfig,
    slide_path: &Path,
    proxy: Option<&Path>,
    open: &SourceOpener,
    cancel: &CancelToken,
) -> Result<usize> {
    let id = slide_id(slide_path);
    if let Some(proxy) = proxy {
        let proxy_id = proxy_slide_id(proxy, &config.proxy_suffix);
        if proxy_id != id {
            return Err(StandardizeError::SlideIdMismatch {
                original: id,
                proxy: proxy_id,
            });
        }
    }

    let mut slide = Slide::new(slide_path, open(slide_path)?)?;
    if let Some(proxy) = proxy {
        slide.add_proxy(proxy)?;
    }

    let mut written = 0;
    for &power in &config.objective_powers {
        if cancel.is_cancelled() {
            break;
        }
        let output_path = config.output_path(&id, power);
        if let Some(folder) = output_path.parent() {
            fs::create_dir_all(folder).map_err(|e| StandardizeError::io(folder, e))?;
        }
        let request = StandardizationRequest::new(power, &output_path)
            .with_proxy(proxy.is_some())
            .with_blur(config.blur);
        let outcome = slide.save_downsampled(&request)?;
        info!(
            "Wrote {} ({}x from {} at {}x, step {})",
            output_path.display(),
            power,
            outcome.source,
            outcome.original_power,
            outcome.step
        );
        written += 1;
    }
    Ok(written)
}

/// Run the whole batch. Stops starting new work once `cancel` is raised.
///
/// One slide's failure never aborts the others: recoverable problems are
/// counted as skipped, everything else as failed.
pub fn run_batch(config: &BatchConfig, open: &SourceOpener, cancel: &CancelToken) -> Result<BatchSummary> {
    let start = Instant::now();
    let slides = discover_slides(&config.slides_dir, &config.slide_ext);
    let proxies = config
        .proxies_dir
        .as_deref()
        .map(|dir| discover_proxies(dir, &config.proxy_suffix));
    let pairs = pair_proxies(slides, proxies)?;
    info!(
        "Found {} slides in {}, target powers {:?}",
        pairs.len(),
        config.slides_dir.display(),
        config.objective_powers
    );

    fs::create_dir_all(&config.output_dir).map_err(|e| StandardizeError::io(&config.output_dir, e))?;
    if config.reports {
        let paths: Vec<PathBuf> = pairs.iter().map(|(s, _)| s.clone()).collect();
        write_batch_info(&paths, open, &config.pre_report_path())?;
    }

    let mut summary = BatchSummary {
        slides: pairs.len(),
        ..Default::default()
    };
    for (idx, (slide_path, proxy)) in pairs.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        info!("[{}/{}] {}", idx + 1, pairs.len(), slide_path.display());
        match process_slide(config, slide_path, proxy.as_deref(), open, cancel) {
            Ok(n) => summary.outputs += n,
            Err(e) if e.is_recoverable() => {
                warn!("Skipping {}: {}", slide_path.display(), e);
                summary.skipped += 1;
            }
            Err(e) => {
                error!("Failed {}: {}", slide_path.display(), e);
                summary.failed += 1;
            }
        }
    }
    summary.cancelled = cancel.is_cancelled();

    if config.reports && !summary.cancelled {
        write_post_report(config)?;
    }

    info!(
        "Batch complete: {} slides, {} outputs, {} skipped, {} failed{}, {:.1}s",
        summary.slides,
        summary.outputs,
        summary.skipped,
        summary.failed,
        if summary.cancelled { " (cancelled)" } else { "" },
        start.elapsed().as_secs_f64()
    );
    Ok(summary)
}

/// Standardized outputs currently present under the output folder.
pub fn output_files(output_dir: &Path) -> Vec<PathBuf> {
    discover_files(output_dir, |p| has_extension(p, OUTPUT_EXTENSION))
}

/// Describe whatever outputs exist now.
pub fn write_post_report(config: &BatchConfig) -> Result<PathBuf> {
    let path = config.post_report_path();
    fs::create_dir_all(&config.output_dir).map_err(|e| StandardizeError::io(&config.output_dir, e))?;
    write_batch_info(&output_files(&config.output_dir), &open_flat, &path)?;
    Ok(path)
}
