//! Continuous signal reconstruction from per-trial segments
//!
//! Every trial contributes a fixed-length segment whose nominal start time is
//! `start - time_offset`. Segments are stitched in trial order against the
//! last emitted timestamp `T_last`:
//!
//! - `gap = t[0] - T_last - 1/fs`. When `gap > 1/fs`, `round(gap * fs)` NaN
//!   samples are emitted at `T_last + j/fs` before the segment.
//! - Samples of the segment at or before `T_last` are dropped (overlap).
//!
//! The resulting axis must be strictly increasing. A violation is returned as
//! [`TimelineError::NotStrictlyIncreasing`] and never repaired by sorting.

use ndarray::{Array1, Array2};

use crate::error::TimelineError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentedSignalReconstructor {
    sampling_frequency: f64,
    time_offset: f64,
    max_segments: Option<usize>,
}

/// One reconstructed channel and its time axis
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousSignal {
    pub timestamps: Array1<f64>,
    pub data: Array1<f64>,
}

/// Several channels stitched over one shared time axis, `[channels × samples]`
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousChannels {
    pub timestamps: Array1<f64>,
    pub data: Array2<f64>,
}

impl ContinuousSignal {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn gap_samples(&self) -> usize {
        self.data.iter().filter(|v| v.is_nan()).count()
    }
}

#[derive(Debug, Clone, Copy)]
enum Piece {
    Gap(usize),
    Segment { index: usize, skip: usize },
}

#[derive(Debug)]
struct StitchPlan {
    timestamps: Vec<f64>,
    pieces: Vec<Piece>,
}

impl SegmentedSignalReconstructor {
    pub fn new(sampling_frequency: f64) -> Result<Self, TimelineError> {
        if !sampling_frequency.is_finite() || sampling_frequency <= 0.0 {
            return Err(TimelineError::InvalidSamplingFrequency(sampling_frequency));
        }
        Ok(Self {
            sampling_frequency,
            time_offset: 0.0,
            max_segments: None,
        })
    }

    /// Seconds subtracted from each start time, for start times that refer to
    /// a point inside the segment rather than its first sample
    pub fn with_time_offset(mut self, time_offset: f64) -> Result<Self, TimelineError> {
        if !time_offset.is_finite() {
            return Err(TimelineError::InvalidTimeOffset(time_offset));
        }
        self.time_offset = time_offset;
        Ok(self)
    }

    /// Only stitch the first `n` segments. Applied before stitching so the
    /// gap accounting only ever sees the kept prefix.
    pub fn with_max_segments(mut self, n: usize) -> Self {
        self.max_segments = Some(n);
        self
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    pub fn reconstruct(
        &self,
        start_times: &[f64],
        segments: &[Vec<f64>],
    ) -> Result<ContinuousSignal, TimelineError> {
        let count = self.segment_count(start_times.len(), segments.len())?;
        let segment_len = segment_length(0, &segments[..count])?;
        let plan = self.plan(&start_times[..count], segment_len)?;
        let data = fill(&plan, &segments[..count]);

        Ok(ContinuousSignal {
            timestamps: Array1::from(plan.timestamps),
            data: Array1::from(data),
        })
    }

    /// Stitch several channels that share trial boundaries.
    /// `channels[c][trial]` is the segment of channel `c` for that trial.
    pub fn reconstruct_channels(
        &self,
        start_times: &[f64],
        channels: &[Vec<Vec<f64>>],
    ) -> Result<ContinuousChannels, TimelineError> {
        let Some(first) = channels.first() else {
            return Ok(ContinuousChannels {
                timestamps: Array1::zeros(0),
                data: Array2::zeros((0, 0)),
            });
        };
        let count = self.segment_count(start_times.len(), first.len())?;

        let mut segment_len = None;
        for (channel, segments) in channels.iter().enumerate() {
            if segments.len() < count {
                return Err(TimelineError::ChannelSegmentCount {
                    channel,
                    expected: count,
                    actual: segments.len(),
                });
            }
            let len = segment_length(channel, &segments[..count])?;
            match segment_len {
                None => segment_len = Some(len),
                Some(expected) if expected != len => {
                    return Err(TimelineError::SegmentLength {
                        channel,
                        segment: 0,
                        expected,
                        actual: len,
                    });
                }
                Some(_) => {}
            }
        }

        let plan = self.plan(&start_times[..count], segment_len.unwrap_or(0))?;
        let mut data = Array2::from_elem((channels.len(), plan.timestamps.len()), f64::NAN);
        for (channel, segments) in channels.iter().enumerate() {
            let row = fill(&plan, &segments[..count]);
            data.row_mut(channel).assign(&Array1::from(row));
        }

        Ok(ContinuousChannels {
            timestamps: Array1::from(plan.timestamps),
            data,
        })
    }

    fn segment_count(&self, starts: usize, segments: usize) -> Result<usize, TimelineError> {
        let count = self.max_segments.map_or(segments, |n| n.min(segments));
        if starts < count {
            return Err(TimelineError::StartCountMismatch {
                starts,
                segments: count,
            });
        }
        Ok(count)
    }

    fn plan(&self, start_times: &[f64], segment_len: usize) -> Result<StitchPlan, TimelineError> {
        let fs = self.sampling_frequency;
        let period = 1.0 / fs;
        let mut timestamps: Vec<f64> = Vec::with_capacity(start_times.len() * segment_len);
        let mut pieces = Vec::with_capacity(start_times.len());

        for (index, &start) in start_times.iter().enumerate() {
            if !start.is_finite() {
                return Err(TimelineError::NonFiniteStart {
                    segment: index,
                    value: start,
                });
            }
            let segment_start = start - self.time_offset;
            let segment_time = |k: usize| segment_start + k as f64 / fs;

            let Some(&last) = timestamps.last() else {
                timestamps.extend((0..segment_len).map(segment_time));
                pieces.push(Piece::Segment { index, skip: 0 });
                continue;
            };

            let gap = segment_time(0) - last - period;
            if gap > period {
                let n_gap = (gap * fs).round() as usize;
                timestamps.extend((1..=n_gap).map(|j| last + j as f64 / fs));
                pieces.push(Piece::Gap(n_gap));
            }

            // Overlap is judged against the last sample emitted before the gap
            let skip = (0..segment_len)
                .position(|k| segment_time(k) > last)
                .unwrap_or(segment_len);
            if skip > 0 {
                tracing::debug!("Segment {}: dropping {} overlapping samples", index, skip);
            }
            timestamps.extend((skip..segment_len).map(segment_time));
            pieces.push(Piece::Segment { index, skip });
        }

        check_strictly_increasing(&timestamps)?;
        Ok(StitchPlan { timestamps, pieces })
    }
}

fn segment_length(channel: usize, segments: &[Vec<f64>]) -> Result<usize, TimelineError> {
    let Some(expected) = segments.first().map(Vec::len) else {
        return Ok(0);
    };
    for (segment, samples) in segments.iter().enumerate() {
        if samples.len() != expected {
            return Err(TimelineError::SegmentLength {
                channel,
                segment,
                expected,
                actual: samples.len(),
            });
        }
    }
    Ok(expected)
}

fn fill(plan: &StitchPlan, segments: &[Vec<f64>]) -> Vec<f64> {
    let mut data = Vec::with_capacity(plan.timestamps.len());
    for piece in &plan.pieces {
        match *piece {
            Piece::Gap(n) => data.extend(std::iter::repeat_n(f64::NAN, n)),
            Piece::Segment { index, skip } => data.extend_from_slice(&segments[index][skip..]),
        }
    }
    data
}

/// Fails on the first pair that is not strictly increasing (NaN included)
pub fn check_strictly_increasing(timestamps: &[f64]) -> Result<(), TimelineError> {
    for (index, pair) in timestamps.windows(2).enumerate() {
        if !(pair[1] > pair[0]) {
            return Err(TimelineError::NotStrictlyIncreasing {
                index: index + 1,
                previous: pair[0],
                current: pair[1],
            });
        }
    }
    Ok(())
}
