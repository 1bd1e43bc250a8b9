//! Fast-scan cyclic voltammetry streams
//!
//! Raw FSCV arrives as recording chunks on the FSCV acquisition clock and is
//! re-timed onto the aligned timeline through the per-trial `tsfscv` anchors.
//! Trial-aligned FSCV arrives already cut per trial and is stitched back into
//! continuous series with the segment reconstructor.

use ndarray::Array2;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ParseError, TimelineError};
use crate::records::{RawFscvChunk, TrialAlignedFscv};
use crate::reconstruct::{ContinuousChannels, SegmentedSignalReconstructor};

/// Columns of a raw row that precede the channels
const TIME_COLUMN: usize = 0;
const VOLTAGE_COLUMN: usize = 1;

/// Raw FSCV concatenated across chunks, still on the native clock
#[derive(Debug, Clone, PartialEq)]
pub struct RawFscvRecording {
    pub native_timestamps: Vec<f64>,
    /// Applied voltage (V)
    pub excitation: Vec<f64>,
    /// Response current (A), `[channels × samples]`
    pub response: Array2<f64>,
    pub channels: Vec<(usize, String)>,
    pub files: Vec<PathBuf>,
    pub conversion_factor: f64,
}

impl RawFscvRecording {
    pub fn len(&self) -> usize {
        self.native_timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.native_timestamps.is_empty()
    }
}

/// Concatenate chunks in order. Measured voltage is divided by
/// `conversion_factor` to give the response current.
pub fn assemble_raw_fscv(
    chunks: &[RawFscvChunk],
    channels: &[(usize, String)],
    conversion_factor: f64,
) -> Result<RawFscvRecording, ParseError> {
    let mut native_timestamps = Vec::new();
    let mut excitation = Vec::new();
    let mut per_channel: Vec<Vec<f64>> = vec![Vec::new(); channels.len()];

    for chunk in chunks {
        let width = chunk.width();
        for (column, _) in channels {
            if *column == TIME_COLUMN || *column == VOLTAGE_COLUMN || (width > 0 && *column >= width) {
                return Err(ParseError::schema(
                    &chunk.path,
                    "recordedData",
                    format!("channel column {column} is not a channel column (row width {width})"),
                ));
            }
        }
        for row in &chunk.rows {
            native_timestamps.push(row[TIME_COLUMN]);
            excitation.push(row[VOLTAGE_COLUMN]);
            for (samples, (column, _)) in per_channel.iter_mut().zip(channels) {
                samples.push(row[*column] / conversion_factor);
            }
        }
    }

    let n = native_timestamps.len();
    let flat: Vec<f64> = per_channel.into_iter().flatten().collect();
    let response = Array2::from_shape_vec((channels.len(), n), flat).map_err(|e| {
        ParseError::schema(
            chunks.first().map_or(Path::new(""), |c| c.path.as_path()),
            "recordedData",
            e.to_string(),
        )
    })?;

    Ok(RawFscvRecording {
        native_timestamps,
        excitation,
        response,
        channels: channels.to_vec(),
        files: chunks.iter().map(|c| c.path.clone()).collect(),
        conversion_factor,
    })
}

/// `*{brain_area}*.json` files in `folder`, naturally sorted by file name
pub fn discover_raw_fscv_files(folder: &Path, brain_area: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().contains(brain_area))
        })
        .collect();
    files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(files)
}

/// Compare strings with embedded digit runs ordered by numeric value
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left = take_digits(&mut a);
                let right = take_digits(&mut b);
                let left_trimmed = left.trim_start_matches('0');
                let right_trimmed = right.trim_start_matches('0');
                let ordering = left_trimmed
                    .len()
                    .cmp(&right_trimmed.len())
                    .then_with(|| left_trimmed.cmp(right_trimmed))
                    .then_with(|| left.len().cmp(&right.len()));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// Trial-aligned FSCV restricted to the converted trials, plus continuous
/// series reconstructed from the per-trial segments
#[derive(Debug, Clone, PartialEq)]
pub struct TrialAlignedFscvTable {
    pub columns: BTreeMap<String, Vec<Vec<f64>>>,
    pub good: Option<Vec<bool>>,
    pub continuous: ContinuousChannels,
    /// Column name for each row of `continuous.data`
    pub continuous_columns: Vec<String>,
    pub sampling_frequency: f64,
}

impl TrialAlignedFscvTable {
    pub fn trial_count(&self) -> usize {
        self.columns.values().map(Vec::len).min().unwrap_or(0)
    }
}

/// Keep the first `trial_count` trials and stitch every column over the
/// aligned, session-relative trial starts
pub fn build_trial_aligned_table(
    data: TrialAlignedFscv,
    aligned_starts: &[f64],
    reconstructor: &SegmentedSignalReconstructor,
) -> Result<TrialAlignedFscvTable, TimelineError> {
    let trial_count = data.trial_count().min(aligned_starts.len());
    if data.trial_count() != aligned_starts.len() {
        tracing::warn!(
            "Trial-aligned FSCV has {} trials, {} aligned starts. Keeping {}",
            data.trial_count(),
            aligned_starts.len(),
            trial_count
        );
    }

    let columns: BTreeMap<String, Vec<Vec<f64>>> = data
        .columns
        .into_iter()
        .map(|(name, mut segments)| {
            segments.truncate(trial_count);
            (name, segments)
        })
        .collect();
    let good = data.good.map(|mut flags| {
        flags.truncate(trial_count);
        flags
    });

    let continuous_columns: Vec<String> = columns.keys().cloned().collect();
    let channels: Vec<Vec<Vec<f64>>> = columns.values().cloned().collect();
    let continuous =
        reconstructor.reconstruct_channels(&aligned_starts[..trial_count], &channels)?;

    Ok(TrialAlignedFscvTable {
        columns,
        good,
        continuous,
        continuous_columns,
        sampling_frequency: reconstructor.sampling_frequency(),
    })
}
