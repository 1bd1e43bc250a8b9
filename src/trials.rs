//! Trials table
//!
//! Aligned trial starts mark the trial midpoint on the session timeline. Each
//! trial spans a fixed window on either side of it.

/// Seconds on either side of the aligned start covered by one trial
pub const DEFAULT_HALF_WINDOW: f64 = 30.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TrialsTable {
    pub start_time: Vec<f64>,
    pub stop_time: Vec<f64>,
    pub midpoint_time: Vec<f64>,
    pub tags: Vec<String>,
}

impl TrialsTable {
    pub fn len(&self) -> usize {
        self.midpoint_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.midpoint_time.is_empty()
    }
}

/// `midpoints` and `tags` are zipped; the shorter one bounds the table
pub fn build_trials_table(midpoints: &[f64], tags: &[String], half_window: f64) -> TrialsTable {
    let n = midpoints.len().min(tags.len());
    if midpoints.len() != tags.len() {
        tracing::warn!(
            "Trial count mismatch: {} aligned starts, {} tags. Keeping {}",
            midpoints.len(),
            tags.len(),
            n
        );
    }
    let midpoint_time = midpoints[..n].to_vec();
    TrialsTable {
        start_time: midpoint_time.iter().map(|m| m - half_window).collect(),
        stop_time: midpoint_time.iter().map(|m| m + half_window).collect(),
        midpoint_time,
        tags: tags[..n].to_vec(),
    }
}
