//! Clock conversion between Unix epoch seconds, calendar time and
//! session-relative seconds.
//!
//! All cross-stream comparisons in this crate happen on session-relative
//! `f64` seconds. Calendar instants are naive wall-clock times: a zone-aware
//! session start time is reduced to its local wall clock before subtracting,
//! and Unix timestamps are rendered as wall clock in the converter's UTC
//! offset. Both sides of every subtraction are therefore in the same zone.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeDelta, Utc};

use crate::error::ClockError;

/// Converts raw Unix seconds to naive calendar instants in a fixed UTC offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConverter {
    offset: FixedOffset,
}

impl Default for ClockConverter {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }
}

impl ClockConverter {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build a converter from a UTC offset in seconds (e.g. -18000 for UTC-5)
    pub fn from_offset_seconds(seconds: i32) -> Result<Self, ClockError> {
        FixedOffset::east_opt(seconds)
            .map(Self::new)
            .ok_or(ClockError::InvalidUtcOffset(seconds))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Convert Unix epoch seconds to naive wall-clock instants.
    ///
    /// Fails on the first non-finite or unrepresentable value rather than
    /// producing an invalid instant.
    pub fn to_calendar(&self, epoch_seconds: &[f64]) -> Result<Vec<NaiveDateTime>, ClockError> {
        epoch_seconds
            .iter()
            .enumerate()
            .map(|(index, &value)| self.instant(index, value))
            .collect()
    }

    fn instant(&self, index: usize, value: f64) -> Result<NaiveDateTime, ClockError> {
        if !value.is_finite() {
            return Err(ClockError::NonFinite { index, value });
        }
        let mut secs = value.floor();
        let mut nanos = ((value - secs) * 1e9).round();
        if nanos >= 1e9 {
            secs += 1.0;
            nanos = 0.0;
        }
        if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
            return Err(ClockError::OutOfRange { index, value });
        }
        DateTime::from_timestamp(secs as i64, nanos as u32)
            .map(|utc| utc.with_timezone(&self.offset).naive_local())
            .ok_or(ClockError::OutOfRange { index, value })
    }

    /// Unix seconds straight to session-relative seconds
    pub fn epoch_to_relative(
        &self,
        epoch_seconds: &[f64],
        reference: Option<NaiveDateTime>,
    ) -> Result<Vec<f64>, ClockError> {
        let instants = self.to_calendar(epoch_seconds)?;
        to_relative(&instants, reference)
    }

    /// Signed seconds from `reference` for samples of a foreign clock.
    ///
    /// Unlike [`Self::epoch_to_relative`], samples before the reference are
    /// kept as negative offsets. Only finiteness and range are checked.
    pub fn epoch_offsets(&self, epoch_seconds: &[f64], reference: NaiveDateTime) -> Result<Vec<f64>, ClockError> {
        let instants = self.to_calendar(epoch_seconds)?;
        Ok(instants
            .into_iter()
            .map(|instant| delta_seconds(instant - reference))
            .collect())
    }
}

/// Reduce a zone-aware session start time to the naive wall clock used for
/// every subtraction in this crate.
pub fn session_reference(start: &DateTime<FixedOffset>) -> NaiveDateTime {
    start.naive_local()
}

/// Seconds elapsed from `reference` (or from `instants[0]` when `None`).
///
/// A negative offset means the reference belongs to another session or the
/// stream is misordered, so it is an error rather than a warning.
pub fn to_relative(
    instants: &[NaiveDateTime],
    reference: Option<NaiveDateTime>,
) -> Result<Vec<f64>, ClockError> {
    let Some(reference) = reference.or_else(|| instants.first().copied()) else {
        return Ok(Vec::new());
    };

    let mut relative = Vec::with_capacity(instants.len());
    for (index, instant) in instants.iter().enumerate() {
        let offset = delta_seconds(*instant - reference);
        if offset < 0.0 {
            return Err(ClockError::NegativeOffset { index, offset });
        }
        relative.push(offset);
    }
    Ok(relative)
}

fn delta_seconds(delta: TimeDelta) -> f64 {
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 * 1e-9,
        None => delta.num_milliseconds() as f64 * 1e-3,
    }
}
