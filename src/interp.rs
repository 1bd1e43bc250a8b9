//! Cross-stream re-timing
//!
//! A secondary stream recorded on its own clock is mapped onto the aligned
//! session timeline through anchor pairs `(native, aligned)`, one per trial.
//! Between anchors the mapping is piecewise linear; outside the anchor range
//! it extends the nearest anchor segment.

use serde::{Deserialize, Serialize};

use crate::error::InterpolationError;

/// One trial's start seen on the stream's own clock and on the aligned timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorPair {
    pub native: f64,
    pub aligned: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossStreamInterpolator {
    anchors: Vec<AnchorPair>,
}

impl CrossStreamInterpolator {
    pub fn new(anchors: Vec<AnchorPair>) -> Result<Self, InterpolationError> {
        if anchors.is_empty() {
            return Err(InterpolationError::NoAnchors);
        }
        for (index, anchor) in anchors.iter().enumerate() {
            if !anchor.native.is_finite() || !anchor.aligned.is_finite() {
                return Err(InterpolationError::NonFiniteAnchor { index });
            }
        }
        for (index, pair) in anchors.windows(2).enumerate() {
            if pair[1].native <= pair[0].native {
                return Err(InterpolationError::AnchorsNotIncreasing {
                    index: index + 1,
                    previous: pair[0].native,
                    current: pair[1].native,
                });
            }
        }
        Ok(Self { anchors })
    }

    pub fn from_parts(native: &[f64], aligned: &[f64]) -> Result<Self, InterpolationError> {
        if native.len() != aligned.len() {
            return Err(InterpolationError::AnchorLengthMismatch {
                native: native.len(),
                aligned: aligned.len(),
            });
        }
        Self::new(
            native
                .iter()
                .zip(aligned)
                .map(|(&native, &aligned)| AnchorPair { native, aligned })
                .collect(),
        )
    }

    pub fn anchors(&self) -> &[AnchorPair] {
        &self.anchors
    }

    /// Map one native time onto the aligned timeline
    pub fn map(&self, t: f64) -> f64 {
        let anchors = &self.anchors;
        if let Ok(i) = anchors.binary_search_by(|a| a.native.total_cmp(&t)) {
            return anchors[i].aligned;
        }
        if anchors.len() == 1 {
            return t + (anchors[0].aligned - anchors[0].native);
        }

        // Index of the segment's right anchor, clamped so times outside the
        // range use the first or last segment
        let right = anchors
            .partition_point(|a| a.native < t)
            .clamp(1, anchors.len() - 1);
        let (a, b) = (anchors[right - 1], anchors[right]);
        let slope = (b.aligned - a.aligned) / (b.native - a.native);
        a.aligned + (t - a.native) * slope
    }

    pub fn interpolate(&self, native_timestamps: &[f64]) -> Result<Vec<f64>, InterpolationError> {
        native_timestamps
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                if value.is_finite() {
                    Ok(self.map(value))
                } else {
                    Err(InterpolationError::NonFiniteSample { index, value })
                }
            })
            .collect()
    }

    /// Re-time a stream with the strategy declared for it
    pub fn retime_stream(
        &self,
        native_timestamps: &[f64],
        strategy: RetimingStrategy,
    ) -> Result<RetimedStream, InterpolationError> {
        let interpolated = self.interpolate(native_timestamps)?;
        let starting_time = interpolated.first().copied().unwrap_or(0.0);

        let timestamps = match strategy {
            RetimingStrategy::Interpolated => interpolated,
            RetimingStrategy::StartingTimeShift => {
                shift_to_starting_time(native_timestamps, starting_time)
            }
        };

        Ok(RetimedStream {
            timestamps,
            strategy,
            starting_time,
        })
    }
}

/// Shift every timestamp by one constant so the first lands on `aligned_start`
pub fn shift_to_starting_time(native_timestamps: &[f64], aligned_start: f64) -> Vec<f64> {
    let Some(&first) = native_timestamps.first() else {
        return Vec::new();
    };
    let delta = aligned_start - first;
    native_timestamps.iter().map(|t| t + delta).collect()
}

/// How a secondary stream is placed on the aligned timeline.
/// Declared once per stream; never mixed within one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetimingStrategy {
    /// Every sample mapped through the anchor table
    #[default]
    Interpolated,
    /// Native spacing kept, whole stream shifted to its interpolated first sample
    StartingTimeShift,
}

impl RetimingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetimingStrategy::Interpolated => "interpolated",
            RetimingStrategy::StartingTimeShift => "starting-time-shift",
        }
    }
}

impl std::fmt::Display for RetimingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetimedStream {
    pub timestamps: Vec<f64>,
    pub strategy: RetimingStrategy,
    pub starting_time: f64,
}
