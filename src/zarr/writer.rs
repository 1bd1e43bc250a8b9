use anyhow::Result;
use ndarray::Array2;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zarrs::filesystem::FilesystemStore;

use super::{create_group, create_session_store, write_bool_1d, write_f64_1d, write_f64_2d, write_group_attributes};
use crate::events::GroupedEvents;
use crate::fscv::{RawFscvRecording, TrialAlignedFscvTable};
use crate::interp::RetimedStream;
use crate::reconstruct::ContinuousSignal;
use crate::trials::TrialsTable;
use crate::units::ThresholdedUnits;

pub const TRIALS_GROUP: &str = "/trials";
pub const EVENTS_GROUP: &str = "/events";
pub const LFP_GROUP: &str = "/ecephys/lfp";
pub const THRESHOLDED_UNITS_GROUP: &str = "/ecephys/thresholded_units";
pub const TRIAL_ALIGNED_FSCV_GROUP: &str = "/fscv/trial_aligned";
pub const RAW_FSCV_GROUP: &str = "/fscv/raw";
pub const EYE_TRACKING_GROUP: &str = "/behavior/eye_tracking";

/// Writes the products of one session conversion into a fresh store
pub struct SessionStoreWriter {
    store: Arc<FilesystemStore>,
    store_path: PathBuf,
}

impl SessionStoreWriter {
    pub fn create(store_path: &Path) -> Result<Self> {
        Ok(Self {
            store: create_session_store(store_path)?,
            store_path: store_path.to_path_buf(),
        })
    }

    pub fn store(&self) -> &Arc<FilesystemStore> {
        &self.store
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    fn group(&self, path: &str, attrs: Map<String, Value>) -> Result<()> {
        create_group(&self.store, path)?;
        if !attrs.is_empty() {
            write_group_attributes(&self.store, path, attrs)?;
        }
        Ok(())
    }

    pub fn write_root_attributes(&self, attrs: Map<String, Value>) -> Result<()> {
        write_group_attributes(&self.store, "/", attrs)
    }

    pub fn write_trials(&self, trials: &TrialsTable) -> Result<()> {
        let mut attrs = Map::new();
        attrs.insert("tags".to_string(), json!(trials.tags));
        attrs.insert("trial_count".to_string(), json!(trials.len()));
        attrs.insert(
            "description".to_string(),
            json!("Trials centred on the aligned trial start, start and stop in seconds from session start"),
        );
        self.group(TRIALS_GROUP, attrs)?;

        write_f64_1d(&self.store, &format!("{TRIALS_GROUP}/start_time"), &trials.start_time)?;
        write_f64_1d(&self.store, &format!("{TRIALS_GROUP}/stop_time"), &trials.stop_time)?;
        write_f64_1d(&self.store, &format!("{TRIALS_GROUP}/midpoint_time"), &trials.midpoint_time)?;
        Ok(())
    }

    pub fn write_events(&self, events: &GroupedEvents) -> Result<()> {
        let mut attrs = Map::new();
        attrs.insert("skipped_codes".to_string(), json!(events.skipped_codes));
        attrs.insert(
            "labels".to_string(),
            json!(events.series.iter().map(|s| s.label.clone()).collect::<Vec<_>>()),
        );
        self.group(EVENTS_GROUP, attrs)?;

        for series in &events.series {
            let path = format!("{}/{}", EVENTS_GROUP, group_name(&series.label));
            let mut attrs = Map::new();
            attrs.insert("code".to_string(), json!(series.code));
            attrs.insert("label".to_string(), json!(series.label));
            attrs.insert("description".to_string(), json!(series.description()));
            self.group(&path, attrs)?;
            write_f64_1d(&self.store, &format!("{path}/times"), &series.times)?;
        }
        Ok(())
    }

    pub fn write_lfp(&self, lfp: &ContinuousSignal, attrs: Map<String, Value>) -> Result<()> {
        self.group(LFP_GROUP, attrs)?;
        write_f64_1d(&self.store, &format!("{LFP_GROUP}/timestamps"), &lfp.timestamps.to_vec())?;
        write_f64_1d(&self.store, &format!("{LFP_GROUP}/data"), &lfp.data.to_vec())?;
        Ok(())
    }

    /// One `unit_<id>` group per unit, waveforms as `[spikes × samples]`
    pub fn write_thresholded_units(&self, units: &ThresholdedUnits) -> Result<()> {
        let mut attrs = Map::new();
        attrs.insert("description".to_string(), json!(units.description()));
        attrs.insert("recording_site".to_string(), json!(units.recording_site));
        attrs.insert("electrodes".to_string(), json!(units.electrodes));
        attrs.insert("waveform_rate".to_string(), json!(units.waveform_rate));
        attrs.insert("waveform_samples".to_string(), json!(units.waveform_samples));
        attrs.insert("unit_names".to_string(), json!(units.unit_names()));
        self.group(THRESHOLDED_UNITS_GROUP, attrs)?;

        for unit in &units.units {
            let path = format!("{}/{}", THRESHOLDED_UNITS_GROUP, unit_group_name(unit.unit_id));
            let mut attrs = Map::new();
            attrs.insert("unit_name".to_string(), json!(unit.name));
            attrs.insert("spike_count".to_string(), json!(unit.spike_times.len()));
            self.group(&path, attrs)?;
            write_f64_1d(&self.store, &format!("{path}/spike_times"), &unit.spike_times)?;
            write_f64_2d(&self.store, &format!("{path}/waveforms"), &unit.waveforms, ["spikes", "samples"])?;
        }
        Ok(())
    }

    pub fn write_trial_aligned_fscv(
        &self,
        table: &TrialAlignedFscvTable,
        trials: &TrialsTable,
        mut attrs: Map<String, Value>,
    ) -> Result<()> {
        let n = table.trial_count().min(trials.len());
        attrs.insert("rate".to_string(), json!(table.sampling_frequency));
        attrs.insert("columns".to_string(), json!(table.continuous_columns));
        attrs.insert("trial_count".to_string(), json!(n));
        self.group(TRIAL_ALIGNED_FSCV_GROUP, attrs)?;

        let group = TRIAL_ALIGNED_FSCV_GROUP;
        write_f64_1d(&self.store, &format!("{group}/start_time"), &trials.start_time[..n])?;
        write_f64_1d(&self.store, &format!("{group}/stop_time"), &trials.stop_time[..n])?;
        if let Some(good) = &table.good {
            write_bool_1d(&self.store, &format!("{group}/good"), &good[..n.min(good.len())])?;
        }

        for (name, segments) in &table.columns {
            let width = segments.first().map_or(0, Vec::len);
            let flat: Vec<f64> = segments[..n].iter().flatten().copied().collect();
            let per_trial = Array2::from_shape_vec((n, width), flat)?;
            write_f64_2d(&self.store, &format!("{group}/{}", group_name(name)), &per_trial, ["trials", "samples"])?;
        }

        let timestamps = table.continuous.timestamps.to_vec();
        write_f64_1d(&self.store, &format!("{group}/timestamps"), &timestamps)?;
        for (name, row) in table.continuous_columns.iter().zip(table.continuous.data.rows()) {
            write_f64_1d(&self.store, &format!("{group}/{}_continuous", group_name(name)), &row.to_vec())?;
        }
        Ok(())
    }

    pub fn write_raw_fscv(&self, recording: &RawFscvRecording, retimed: &RetimedStream) -> Result<()> {
        let mut attrs = Map::new();
        attrs.insert("retiming".to_string(), json!(retimed.strategy.as_str()));
        attrs.insert("starting_time".to_string(), json!(retimed.starting_time));
        attrs.insert("conversion_factor".to_string(), json!(recording.conversion_factor));
        attrs.insert("current_to_voltage_factor".to_string(), json!(1.0 / recording.conversion_factor));
        attrs.insert(
            "channels".to_string(),
            json!(recording
                .channels
                .iter()
                .map(|(column, area)| json!({ "column": column, "brain_area": area }))
                .collect::<Vec<_>>()),
        );
        attrs.insert(
            "files".to_string(),
            json!(recording
                .files
                .iter()
                .map(|f| f.to_string_lossy().into_owned())
                .collect::<Vec<_>>()),
        );
        attrs.insert("excitation_unit".to_string(), json!("volts"));
        attrs.insert("response_unit".to_string(), json!("amperes"));
        self.group(RAW_FSCV_GROUP, attrs)?;

        write_f64_1d(&self.store, &format!("{RAW_FSCV_GROUP}/timestamps"), &retimed.timestamps)?;
        write_f64_1d(&self.store, &format!("{RAW_FSCV_GROUP}/excitation"), &recording.excitation)?;
        write_f64_2d(
            &self.store,
            &format!("{RAW_FSCV_GROUP}/response"),
            &recording.response,
            ["channels", "samples"],
        )?;
        Ok(())
    }

    pub fn write_eye_tracking(&self, xy: &Array2<f64>, rate: f64, starting_time: f64) -> Result<()> {
        let mut attrs = Map::new();
        attrs.insert("rate".to_string(), json!(rate));
        attrs.insert("starting_time".to_string(), json!(starting_time));
        attrs.insert("columns".to_string(), json!(["x", "y"]));
        self.group(EYE_TRACKING_GROUP, attrs)?;
        write_f64_2d(&self.store, &format!("{EYE_TRACKING_GROUP}/data"), xy, ["axes", "samples"])
    }
}

/// Event labels are free text; keep them usable as node names
pub fn group_name(label: &str) -> String {
    let name: String = label
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    if name.is_empty() { "unnamed".to_string() } else { name }
}

/// `unit_-1` for poor-quality spikes, `unit_<id>` otherwise
pub fn unit_group_name(unit_id: i64) -> String {
    group_name(&format!("unit_{unit_id}"))
}
