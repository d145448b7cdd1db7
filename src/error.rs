use std::path::PathBuf;

/// Errors raised while reading, validating or standardizing a slide.
#[derive(thiserror::Error, Debug)]
pub enum StandardizeError {
    #[error("failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("region read failed at level {level}: {reason}")]
    Read { level: u32, reason: String },

    #[error("missing required slide properties: {}", keys.join(", "))]
    MissingProperty { keys: Vec<String> },

    #[error("property {key} has non-numeric value {value:?}")]
    InvalidProperty { key: String, value: String },

    #[error("dimensions at level {level} mismatched from base")]
    GeometryMismatch { level: u32 },

    #[error("mismatched downsample factor at level {level}: calculated {computed} vs. metadata {declared}")]
    DownsampleMismatch { level: u32, computed: f64, declared: f64 },

    #[error("downsample factor decreases at level {level}")]
    NonMonotonicDownsample { level: u32 },

    #[error("no proxy bound but use_proxy requested")]
    NoProxyBound,

    #[error("proxy file not found (or is a directory): {}", .0.display())]
    ProxyNotFound(PathBuf),

    #[error("failed to decode proxy {path}: {source}")]
    ProxyDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("target objective power must be positive and finite, got {0}")]
    InvalidTargetPower(f64),

    #[error("upsampling from {from}x to {to}x is not supported")]
    UpsampleUnsupported { from: f64, to: f64 },

    #[error("could not save image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("slide IDs not matching for {original} and {proxy}")]
    SlideIdMismatch { original: String, proxy: String },

    #[error("{slides} original slide files found, but {proxies} proxies found")]
    ProxyCountMismatch { slides: usize, proxies: usize },
}

impl StandardizeError {
    /// Per-item failures that a batch should log and skip rather than count as a slide failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StandardizeError::Open { .. }
                | StandardizeError::MissingProperty { .. }
                | StandardizeError::InvalidProperty { .. }
                | StandardizeError::SlideIdMismatch { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StandardizeError::Io { path: path.into(), source }
    }
}

pub type Result<T, E = StandardizeError> = std::result::Result<T, E>;
