use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use wsi_standardize::batch::{discover_files, discover_slides, run_batch, write_post_report, BatchConfig, BatchSummary, CancelToken};
use wsi_standardize::report::write_batch_info;
use wsi_standardize::source::open_pyramid;
use wsi_standardize::{PyramidSource, StandardizeError};

/// Exit status after an interrupt (128 + SIGINT).
const INTERRUPTED_EXIT_CODE: i32 = 130;

type Opener = fn(&Path) -> wsi_standardize::Result<Box<dyn PyramidSource>>;

#[derive(Parser)]
#[command(name = "wsi-standardize", about = "Objective power standardization for whole-slide images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resample every slide in a folder to one or more objective powers
    Standardize(StandardizeArgs),

    /// Write a TSV summary of slide metadata and estimated magnifications
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct StandardizeArgs {
    /// Folder with OpenSlide-supported files (searched recursively)
    #[arg(short = 's', long)]
    slides: PathBuf,

    /// Objective powers to resample to
    #[arg(long, num_args = 1.., required = true)]
    objective_powers: Vec<f64>,

    /// Output directory: one subfolder per slide, one folder per objective power inside it
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Flat proxy images with the same dimensions as each slide's base level,
    /// used instead of the slide pixels (e.g. annotated copies)
    #[arg(short = 'p', long)]
    proxies: Option<PathBuf>,

    /// Gaussian blur (sigma 1.5) before decimation
    #[arg(long)]
    blur: bool,

    /// Write pre- and post-standardization batch reports into the output directory
    #[arg(long)]
    reports: bool,

    /// Slide file extension
    #[arg(long, default_value = "svs")]
    slide_ext: String,

    /// File name suffix identifying proxy images
    #[arg(long, default_value = "_overlay.tiff")]
    proxy_suffix: String,
}

impl StandardizeArgs {
    fn into_config(self) -> Result<BatchConfig> {
        if let Some(bad) = self.objective_powers.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
            bail!("objective powers must be positive, got {}", bad);
        }
        Ok(BatchConfig {
            slides_dir: self.slides,
            objective_powers: self.objective_powers,
            output_dir: self.output,
            proxies_dir: self.proxies,
            blur: self.blur,
            reports: self.reports,
            slide_ext: self.slide_ext,
            proxy_suffix: self.proxy_suffix,
        })
    }
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Folder with slides
    #[arg(short = 'i', long)]
    input_path: PathBuf,

    /// TSV file to create
    #[arg(short = 'o', long)]
    output_tsv: PathBuf,

    /// Only include files with this extension (default: every file)
    #[arg(long)]
    slide_ext: Option<String>,
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standardize(args) => {
            let config = args.into_config()?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()?;
            let exit = runtime.block_on(standardize_until(config, open_pyramid, tokio::signal::ctrl_c()))?;
            match exit {
                BatchExit::Completed(summary) => {
                    if summary.failed > 0 {
                        warn!("{} slides failed, see errors above", summary.failed);
                    }
                    Ok(())
                }
                BatchExit::Interrupted(report) => {
                    info!("Wrote {}", report.display());
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            }
        }
        Command::Info(args) => {
            let paths = match &args.slide_ext {
                Some(ext) => discover_slides(&args.input_path, ext),
                None => discover_files(&args.input_path, |_| true),
            };
            write_batch_info(&paths, &open_pyramid, &args.output_tsv)
                .with_context(|| format!("failed to write {}", args.output_tsv.display()))?;
            Ok(())
        }
    }
}

/// How a standardization run ended.
#[derive(Debug)]
enum BatchExit {
    Completed(BatchSummary),
    /// Interrupted; holds the path of the post-standardization report.
    Interrupted(PathBuf),
}

/// Run the batch on a blocking thread until it finishes or `interrupt`
/// resolves. On interrupt the cancel token is raised and the
/// post-standardization report is written over the outputs present so far.
async fn standardize_until<F>(config: BatchConfig, open: Opener, interrupt: F) -> Result<BatchExit>
where
    F: Future<Output = std::io::Result<()>>,
{
    let cancel = CancelToken::new();
    let mut batch: JoinHandle<Result<BatchSummary, StandardizeError>> = {
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || run_batch(&config, &open, &cancel))
    };

    tokio::select! {
        biased;
        signal = interrupt => match signal {
            Ok(()) => {
                warn!("Interrupt received, writing post-standardization report");
                cancel.cancel();
                let path = tokio::task::block_in_place(|| write_post_report(&config))?;
                Ok(BatchExit::Interrupted(path))
            }
            Err(e) => {
                warn!("Cannot listen for interrupts: {}", e);
                finish(batch.await)
            }
        },
        joined = &mut batch => finish(joined),
    }
}

fn finish(joined: Result<Result<BatchSummary, StandardizeError>, tokio::task::JoinError>) -> Result<BatchExit> {
    let summary = joined.context("batch task panicked")??;
    Ok(BatchExit::Completed(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use wsi_standardize::{MemoryPyramid, Slide, StandardizationRequest};

    fn open_memory(_path: &Path) -> wsi_standardize::Result<Box<dyn PyramidSource>> {
        Ok(Box::new(
            MemoryPyramid::uniform((80, 80), &[1.0, 4.0]).with_objective("40", "0.25"),
        ))
    }

    fn config(tmp: &Path) -> BatchConfig {
        BatchConfig {
            slides_dir: tmp.join("slides"),
            objective_powers: vec![10.0],
            output_dir: tmp.join("out"),
            proxies_dir: None,
            blur: false,
            reports: false,
            slide_ext: "svs".to_string(),
            proxy_suffix: "_overlay.tiff".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_interrupt_writes_post_report() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        fs::create_dir_all(&cfg.slides_dir).unwrap();

        // An output left by earlier work
        let existing = cfg.output_path("prior", 10.0);
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        let slide = Slide::new("prior.svs", open_memory(Path::new("prior.svs")).unwrap()).unwrap();
        slide.save_downsampled(&StandardizationRequest::new(10.0, &existing)).unwrap();

        let exit = standardize_until(cfg.clone(), open_memory, std::future::ready(Ok(())))
            .await
            .unwrap();
        match exit {
            BatchExit::Interrupted(report) => {
                assert_eq!(report, cfg.post_report_path());
                let text = fs::read_to_string(&report).unwrap();
                let lines: Vec<&str> = text.lines().collect();
                assert_eq!(lines.len(), 2);
                assert!(lines[1].starts_with("prior.tiff\t"));
            }
            other => panic!("expected Interrupted, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_batch_completes_without_interrupt() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        fs::create_dir_all(&cfg.slides_dir).unwrap();
        fs::write(cfg.slides_dir.join("a.svs"), b"").unwrap();

        let exit = standardize_until(cfg.clone(), open_memory, std::future::pending())
            .await
            .unwrap();
        match exit {
            BatchExit::Completed(summary) => {
                assert_eq!(summary.outputs, 1);
                assert!(!summary.cancelled);
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert!(cfg.output_path("a", 10.0).exists());
        assert!(!cfg.post_report_path().exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_failed_signal_listener_awaits_batch() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        fs::create_dir_all(&cfg.slides_dir).unwrap();

        let unavailable = std::future::ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "no signals")));
        let exit = standardize_until(cfg, open_memory, unavailable).await.unwrap();
        assert!(matches!(exit, BatchExit::Completed(BatchSummary { slides: 0, .. })));
    }
}
