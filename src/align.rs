//! Trial clock alignment
//!
//! Each trial carries one software ("soft") Unix timestamp and a list of
//! hardware ("hard") event timestamps tagged with TTL codes. The aligned start
//! of a trial is the hard timestamp carrying the trial start code that lies
//! closest to the soft timestamp.

use chrono::NaiveDateTime;

use crate::clock::ClockConverter;
use crate::error::{AlignmentError, ClockError};

/// TTL code written by the task controller at the start of every trial
pub const DEFAULT_TRIAL_START_CODE: u16 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialClockAligner {
    trial_start_code: u16,
}

impl Default for TrialClockAligner {
    fn default() -> Self {
        Self::new(DEFAULT_TRIAL_START_CODE)
    }
}

impl TrialClockAligner {
    pub fn new(trial_start_code: u16) -> Self {
        Self { trial_start_code }
    }

    pub fn trial_start_code(&self) -> u16 {
        self.trial_start_code
    }

    /// Align every trial. Any unalignable trial fails the whole call, since
    /// downstream streams are indexed by trial.
    pub fn align(
        &self,
        soft_timestamps: &[f64],
        hard_codes: &[Vec<u16>],
        hard_timestamps: &[Vec<f64>],
    ) -> Result<AlignedTrialStarts, AlignmentError> {
        if soft_timestamps.is_empty() {
            return Err(AlignmentError::NoTrials);
        }
        check_len("hard event codes", soft_timestamps.len(), hard_codes.len())?;
        check_len("hard event timestamps", soft_timestamps.len(), hard_timestamps.len())?;

        let mut starts = Vec::with_capacity(soft_timestamps.len());
        for (trial, ((&soft, codes), times)) in soft_timestamps
            .iter()
            .zip(hard_codes)
            .zip(hard_timestamps)
            .enumerate()
        {
            if !soft.is_finite() {
                return Err(AlignmentError::NonFiniteSoftTimestamp { trial, value: soft });
            }
            check_len(&format!("trial {trial} event timestamps"), codes.len(), times.len())?;

            let start = self
                .nearest_trial_start(soft, codes, times)
                .ok_or(AlignmentError::NoTrialStartEvent {
                    trial,
                    code: self.trial_start_code,
                })?;

            if let Some(&previous) = starts.last()
                && start < previous
            {
                return Err(AlignmentError::NonMonotonic {
                    trial,
                    previous,
                    current: start,
                });
            }
            tracing::debug!("Trial {}: soft {:.6} -> hard {:.6}", trial, soft, start);
            starts.push(start);
        }

        Ok(AlignedTrialStarts { epoch_seconds: starts })
    }

    /// Hard timestamp with the trial start code closest to `soft`.
    /// Ties keep the first candidate in recorded order.
    pub fn nearest_trial_start(&self, soft: f64, codes: &[u16], times: &[f64]) -> Option<f64> {
        let mut best: Option<(f64, f64)> = None;
        for (&code, &time) in codes.iter().zip(times) {
            if code != self.trial_start_code || !time.is_finite() {
                continue;
            }
            let distance = (time - soft).abs();
            match best {
                Some((best_distance, _)) if distance >= best_distance => {}
                _ => best = Some((distance, time)),
            }
        }
        best.map(|(_, time)| time)
    }
}

fn check_len(what: &str, expected: usize, actual: usize) -> Result<(), AlignmentError> {
    if expected != actual {
        return Err(AlignmentError::LengthMismatch {
            what: what.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Aligned trial starts in Unix seconds, one per trial, non-decreasing.
///
/// Immutable once built; the reconstructor and the interpolator receive it
/// as an argument.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedTrialStarts {
    epoch_seconds: Vec<f64>,
}

impl AlignedTrialStarts {
    pub fn epoch_seconds(&self) -> &[f64] {
        &self.epoch_seconds
    }

    pub fn len(&self) -> usize {
        self.epoch_seconds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epoch_seconds.is_empty()
    }

    /// Keep only the first `n` trials. Truncation happens after alignment so
    /// the nearest-match search always sees each trial's full event list.
    pub fn truncated(mut self, n: usize) -> Self {
        self.epoch_seconds.truncate(n);
        self
    }

    /// Express the aligned starts in seconds relative to the session start
    pub fn to_session_relative(
        &self,
        clock: &ClockConverter,
        reference: Option<NaiveDateTime>,
    ) -> Result<Vec<f64>, AlignmentError> {
        clock
            .epoch_to_relative(&self.epoch_seconds, reference)
            .map_err(|err| match err {
                ClockError::NegativeOffset { index, offset } => {
                    AlignmentError::BeforeSessionStart { trial: index, offset }
                }
                other => AlignmentError::Clock(other),
            })
    }
}
