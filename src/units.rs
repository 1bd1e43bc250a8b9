//! Thresholded units table
//!
//! Spikes captured at one recording site are grouped by unit id. Each unit
//! keeps its spike times and the detected waveforms as a
//! `[spikes × samples]` array.

use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::records::SpikeWaveforms;

/// Unit id of spikes the sorter flagged as poor quality
pub const POOR_QUALITY_UNIT: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub unit_id: i64,
    pub name: String,
    pub spike_times: Vec<f64>,
    pub waveforms: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdedUnits {
    pub recording_site: Option<String>,
    /// Ephys channels recorded at the site
    pub electrodes: Vec<String>,
    pub waveform_rate: f64,
    pub waveform_samples: usize,
    /// Ascending unit id
    pub units: Vec<Unit>,
}

impl ThresholdedUnits {
    pub fn spike_count(&self) -> usize {
        self.units.iter().map(|u| u.spike_times.len()).sum()
    }

    pub fn unit_names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name.clone()).collect()
    }

    pub fn description(&self) -> String {
        let site = self.recording_site.as_deref().unwrap_or("unknown");
        format!(
            "Captured and thresholded spikes from site {site}. Unit -1 holds poor-quality spikes. \
             Waveforms are {} samples long at {} Hz.",
            self.waveform_samples, self.waveform_rate
        )
    }
}

/// Channels of `brain_areas` located at `recording_site`, sorted by name
pub fn site_electrodes(
    recording_site: Option<&str>,
    brain_areas: Option<&BTreeMap<String, String>>,
) -> Vec<String> {
    let electrodes: Vec<String> = match (recording_site, brain_areas) {
        (Some(site), Some(areas)) => areas
            .iter()
            .filter(|(_, area)| area.as_str() == site)
            .map(|(channel, _)| channel.clone())
            .collect(),
        _ => Vec::new(),
    };
    if electrodes.is_empty() {
        warn!(
            "No electrodes found for recording site '{}', units carry no electrode reference",
            recording_site.unwrap_or("")
        );
    }
    electrodes
}

/// Group spikes by unit id. `spike_times` replaces the file's times and must
/// have one entry per spike.
pub fn build_thresholded_units(
    spikes: &SpikeWaveforms,
    spike_times: &[f64],
    recording_site: Option<String>,
    electrodes: Vec<String>,
    waveform_rate: f64,
) -> ThresholdedUnits {
    let n = spikes.len().min(spike_times.len());
    let samples = spikes.waveform_samples();
    let ids: BTreeSet<i64> = spikes.unit_ids[..n].iter().copied().collect();

    let units = ids
        .into_iter()
        .map(|unit_id| {
            let rows: Vec<usize> = (0..n).filter(|&i| spikes.unit_ids[i] == unit_id).collect();
            let mut waveforms = Array2::zeros((rows.len(), samples));
            for (row, &spike) in rows.iter().enumerate() {
                for (k, &value) in spikes.waveforms[spike].iter().enumerate() {
                    waveforms[[row, k]] = value;
                }
            }
            Unit {
                unit_id,
                name: unit_id.to_string(),
                spike_times: rows.iter().map(|&i| spike_times[i]).collect(),
                waveforms,
            }
        })
        .collect();

    ThresholdedUnits {
        recording_site,
        electrodes,
        waveform_rate,
        waveform_samples: samples,
        units,
    }
}
