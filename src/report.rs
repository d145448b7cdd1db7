//! Tab-separated batch summary of slide metadata.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::core::magnification::{extract, SlideMetadata};
use crate::core::resample::select_level_in;
use crate::error::{Result, StandardizeError};
use crate::source::SourceOpener;

pub const PRE_REPORT_NAME: &str = "pre_standardization_batch_info.tsv";
pub const POST_REPORT_NAME: &str = "post_standardization_batch_info.tsv";

/// Downsample of the level reported in the `selected_level` columns.
pub const REPORT_TARGET_DOWNSAMPLE: f64 = 4.0;

pub const REPORT_HEADER: [&str; 14] = [
    "PID",
    "wsi_path",
    "objective-power",
    "mpp-x",
    "mpp-y",
    "correct-power-dims",
    "height",
    "width",
    "level_count",
    "selected_level",
    "selected_level_height",
    "selected_level_width",
    "magnifications",
    "level_dims",
];

/// One report line.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub pid: String,
    pub wsi_path: PathBuf,
    pub objective_power: String,
    pub mpp_x: f64,
    pub mpp_y: f64,
    pub correct_power_dims: bool,
    pub width: u32,
    pub height: u32,
    pub level_count: u32,
    pub selected_level: Option<u32>,
    pub selected_level_dims: Option<(u32, u32)>,
    pub magnifications: Vec<f64>,
    pub level_dims: Vec<(u32, u32)>,
}

impl ReportRow {
    pub fn from_metadata(path: &Path, meta: &SlideMetadata) -> Self {
        let selected_level = select_level_in(&meta.downsamples(), REPORT_TARGET_DOWNSAMPLE);
        let selected_level_dims = selected_level.map(|l| meta.levels[l as usize].dimensions);
        Self {
            pid: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            wsi_path: path.to_path_buf(),
            objective_power: meta.declared_objective_power.clone(),
            mpp_x: meta.mpp_x,
            mpp_y: meta.mpp_y,
            correct_power_dims: meta.correct_power_dims,
            width: meta.dimensions.0,
            height: meta.dimensions.1,
            level_count: meta.level_count,
            selected_level,
            selected_level_dims,
            magnifications: meta.magnifications(),
            level_dims: meta.levels.iter().map(|l| l.dimensions).collect(),
        }
    }

    pub fn to_tsv(&self) -> String {
        let (selected, sel_h, sel_w) = match (self.selected_level, self.selected_level_dims) {
            (Some(level), Some((w, h))) => (level.to_string(), h.to_string(), w.to_string()),
            _ => ("-1".to_string(), "NA".to_string(), "NA".to_string()),
        };
        [
            self.pid.clone(),
            self.wsi_path.display().to_string(),
            self.objective_power.clone(),
            format!("{:?}", self.mpp_x),
            format!("{:?}", self.mpp_y),
            if self.correct_power_dims { "True" } else { "False" }.to_string(),
            self.height.to_string(),
            self.width.to_string(),
            self.level_count.to_string(),
            selected,
            sel_h,
            sel_w,
            format!("{:?}", self.magnifications),
            format_level_dims(&self.level_dims),
        ]
        .join("\t")
    }
}

/// `((w, h), (w, h))`, with a trailing comma for a single level.
pub fn format_level_dims(dims: &[(u32, u32)]) -> String {
    let parts: Vec<String> = dims.iter().map(|(w, h)| format!("({}, {})", w, h)).collect();
    if parts.len() == 1 {
        format!("({},)", parts[0])
    } else {
        format!("({})", parts.join(", "))
    }
}

/// Open and describe each slide. Slides that fail to open, lack metadata or
/// fail validation are logged and left out.
pub fn gather_rows(paths: &[PathBuf], open: &SourceOpener) -> Vec<ReportRow> {
    let mut rows = Vec::with_capacity(paths.len());
    for path in paths {
        info!("{}", path.display());
        match open(path).and_then(|source| extract(&source)) {
            Ok(meta) => rows.push(ReportRow::from_metadata(path, &meta)),
            Err(e @ StandardizeError::MissingProperty { .. }) => {
                warn!("{}: error in one of the keys: {}", path.display(), e);
            }
            Err(e) if e.is_recoverable() => warn!("Skipping {}: {}", path.display(), e),
            Err(e) => error!("Skipping {}: {}", path.display(), e),
        }
    }
    rows
}

pub fn write_report(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let io_err = |e| StandardizeError::io(path, e);
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
    writeln!(out, "{}", REPORT_HEADER.join("\t")).map_err(io_err)?;
    for row in rows {
        writeln!(out, "{}", row.to_tsv()).map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}

/// Gather rows for `paths` and write them to `output`. Returns the row count.
pub fn write_batch_info(paths: &[PathBuf], open: &SourceOpener, output: &Path) -> Result<usize> {
    info!("===== Writing batch info: {} =====", output.display());
    let rows = gather_rows(paths, open);
    write_report(output, &rows)?;
    info!("===== Wrote {} of {} slides to {} =====", rows.len(), paths.len(), output.display());
    Ok(rows.len())
}
