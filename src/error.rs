//! Error types for the alignment core and the conversion pipeline
//!
//! Each component owns its error enum. The session and dataset drivers wrap
//! them in `anyhow::Error`, so callers can still `downcast_ref` to the
//! component that failed.

use std::path::PathBuf;
use thiserror::Error;

/// Failures converting between Unix seconds, calendar time and session-relative seconds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClockError {
    #[error("Timestamp {index} is not finite ({value})")]
    NonFinite { index: usize, value: f64 },

    #[error("Timestamp {index} ({value}) is outside the representable calendar range")]
    OutOfRange { index: usize, value: f64 },

    #[error("Timestamp {index} lies {offset:.6}s before the reference start time. Ensure that the start time is correct")]
    NegativeOffset { index: usize, offset: f64 },

    #[error("Invalid UTC offset: {0}s")]
    InvalidUtcOffset(i32),
}

/// Failures reconciling the software clock with the hardware event clock
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("No trials to align")]
    NoTrials,

    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Trial {trial} has no hardware event with trial start code {code}")]
    NoTrialStartEvent { trial: usize, code: u16 },

    #[error("Trial {trial} has a non-finite software timestamp ({value})")]
    NonFiniteSoftTimestamp { trial: usize, value: f64 },

    #[error("Aligned start of trial {trial} ({current:.6}) precedes the previous trial ({previous:.6})")]
    NonMonotonic {
        trial: usize,
        previous: f64,
        current: f64,
    },

    #[error("Aligned start of trial {trial} lies {offset:.6}s before the session start time")]
    BeforeSessionStart { trial: usize, offset: f64 },

    #[error(transparent)]
    Clock(#[from] ClockError),
}

/// Failures stitching per-trial segments into one continuous timeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimelineError {
    #[error("Invalid sampling frequency: {0} Hz")]
    InvalidSamplingFrequency(f64),

    #[error("Invalid time offset: {0}")]
    InvalidTimeOffset(f64),

    #[error("Got {starts} start times for {segments} segments")]
    StartCountMismatch { starts: usize, segments: usize },

    #[error("Segment {segment} of channel {channel} has {actual} samples, expected {expected}")]
    SegmentLength {
        channel: usize,
        segment: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Channel {channel} has {actual} segments, expected {expected}")]
    ChannelSegmentCount {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Start time of segment {segment} is not finite ({value})")]
    NonFiniteStart { segment: usize, value: f64 },

    #[error("Timestamps are not strictly increasing at sample {index} ({previous:.6} -> {current:.6}). Check the segment start times for inconsistencies")]
    NotStrictlyIncreasing {
        index: usize,
        previous: f64,
        current: f64,
    },
}

/// Failures re-timing a secondary stream against trial anchors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpolationError {
    #[error("At least one anchor pair is required")]
    NoAnchors,

    #[error("Got {native} native anchors but {aligned} aligned anchors")]
    AnchorLengthMismatch { native: usize, aligned: usize },

    #[error("Anchor {index} is not finite")]
    NonFiniteAnchor { index: usize },

    #[error("Native anchor times must be strictly increasing (anchor {index}: {previous:.6} -> {current:.6})")]
    AnchorsNotIncreasing {
        index: usize,
        previous: f64,
        current: f64,
    },

    #[error("Native sample {index} is not finite ({value})")]
    NonFiniteSample { index: usize, value: f64 },
}

/// Required mappings or settings missing for the streams a session declares
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("TTL code to event name mapping is required when '{}' is specified", path.display())]
    MissingEventCodeMap { path: PathBuf },

    #[error("Subject '{key}' is not found in the metadata. Add an entry for this subject under the 'Subjects' section")]
    MissingSubject { key: String },

    #[error("'fscv_channel_ids_to_brain_area' must be provided when 'raw_fscv_recording_folder_path' is specified")]
    MissingFscvChannelMap,

    #[error("Invalid FSCV channel id '{0}' (expected a column index)")]
    InvalidFscvChannelId(String),

    #[error("Raw FSCV retiming requires 'tsfscv' in the trial list")]
    MissingFscvAnchors,

    #[error("{stream} requires a trial list ('behavior_trlist_file_path')")]
    StreamRequiresTrials { stream: String },

    #[error("No session start time: set 'session_start_time' or provide a trial list")]
    MissingSessionStartTime,

    #[error("Invalid TTL code '{0}' in event code mapping")]
    InvalidEventCode(String),

    #[error("Invalid setting '{name}': {reason}")]
    InvalidSetting { name: String, reason: String },
}

/// Failures at the read boundary, before any typed record reaches the core
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported file format: '{}'. Only .json exports are supported", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Invalid JSON in '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Key '{key}' not found in '{}'", path.display())]
    MissingKey { path: PathBuf, key: String },

    #[error("Malformed '{key}' in '{}': {reason}", path.display())]
    Schema {
        path: PathBuf,
        key: String,
        reason: String,
    },
}

impl ParseError {
    pub(crate) fn schema(path: &std::path::Path, key: &str, reason: impl Into<String>) -> Self {
        ParseError::Schema {
            path: path.to_path_buf(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Any failure of a single session conversion
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub type Result<T, E = ConversionError> = std::result::Result<T, E>;
