// Typed errors for configuration time and for the renderer seam
use thiserror::Error;

/// Setup/configuration failures. Steady-state streaming never produces these.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChartError {
    #[error("series key must not be empty")]
    EmptyKey,
    #[error("duplicate series key `{0}`")]
    DuplicateKey(String),
    #[error("duplicate series display name `{0}`")]
    DuplicateDisplayName(String),
    #[error("series `{key}` declares a normal band colour but only {count} threshold line(s); at least two are required")]
    NormalBandRequiresThresholds { key: String, count: usize },
    #[error("series `{key}` has a non-finite threshold value")]
    InvalidThreshold { key: String },
    #[error("series `{key}` colour segment #{index} has an empty or inverted range")]
    InvalidSegment { key: String, index: usize },
    #[error("series `{key}` colour segments #{first} and #{second} overlap or are out of order")]
    OverlappingSegments {
        key: String,
        first: usize,
        second: usize,
    },
    #[error("max points must be greater than zero")]
    InvalidMaxPoints,
    #[error("time window must be at least one minute")]
    ZeroWindow,
    #[error("time window of {minutes} minutes is not one of {allowed:?}")]
    WindowNotAllowed { minutes: u32, allowed: Vec<u32> },
    #[error("no time windows are allowed")]
    NoAllowedWindows,
    #[error("unknown legend group `{0}`")]
    UnknownGroup(String),
    #[error("unknown chart instance `{0}`")]
    UnknownChart(String),
    #[error("chart instance `{0}` is already open")]
    DuplicateChart(String),
}

/// Failures reported by a renderer. Always recoverable from the pipeline's view.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("renderer is not ready")]
    NotReady,
    #[error("renderer has been disposed")]
    Disposed,
    #[error("series index {index} out of range ({len} series)")]
    SeriesOutOfRange { index: usize, len: usize },
    #[error("renderer backend error: {0}")]
    Backend(String),
}
