//! Single-session conversion
//!
//! Reads every configured stream of one session, aligns the trials, re-times
//! the secondary streams onto the aligned timeline and writes one Zarr store.
//! Configuration problems are reported before any alignment work, and nothing
//! is written until every stream has been converted in memory.

use anyhow::Context;
use chrono::{NaiveDateTime, SecondsFormat};
use ndarray::Array2;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::align::TrialClockAligner;
use crate::clock::{ClockConverter, session_reference};
use crate::config::{ConversionSettings, MetadataDocument, NativeClock, SessionEntry};
use crate::error::{ConfigurationError, ParseError, Result};
use crate::events::{EventCodeMap, GroupedEvents, group_events};
use crate::fscv::{
    RawFscvRecording, TrialAlignedFscvTable, assemble_raw_fscv, build_trial_aligned_table,
    discover_raw_fscv_files,
};
use crate::interp::{CrossStreamInterpolator, RetimedStream};
use crate::records::{self, EyeTracking, SpikeWaveforms, TrialList};
use crate::reconstruct::{ContinuousSignal, SegmentedSignalReconstructor};
use crate::trials::{TrialsTable, build_trials_table};
use crate::units::{ThresholdedUnits, build_thresholded_units, site_electrodes};
use crate::zarr::writer::SessionStoreWriter;

/// Outcome of one converted session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub subject_id: String,
    pub store_path: PathBuf,
    pub trial_count: usize,
    pub event_series: usize,
    pub skipped_codes: Vec<u16>,
    pub streams: Vec<String>,
}

/// Everything derived from one session, ready to be written
#[derive(Debug, Clone)]
pub struct SessionProducts {
    pub session_id: String,
    pub subject_id: String,
    pub subject: Value,
    pub session_start_time: String,
    pub trials: Option<TrialsTable>,
    pub events: Option<GroupedEvents>,
    pub lfp: Option<ContinuousSignal>,
    pub ephys_brain_areas: Option<BTreeMap<String, String>>,
    pub thresholded_units: Option<ThresholdedUnits>,
    pub trial_aligned_fscv: Option<TrialAlignedFscvTable>,
    pub raw_fscv: Option<(RawFscvRecording, RetimedStream)>,
    /// `[x, y] × samples`, rate, starting time
    pub eye_tracking: Option<(Array2<f64>, f64, f64)>,
}

impl SessionProducts {
    pub fn stream_names(&self) -> Vec<String> {
        let mut streams = Vec::new();
        if self.trials.is_some() {
            streams.push("trials".to_string());
        }
        if self.events.is_some() {
            streams.push("events".to_string());
        }
        if self.lfp.is_some() {
            streams.push("lfp".to_string());
        }
        if self.thresholded_units.is_some() {
            streams.push("thresholded_units".to_string());
        }
        if self.trial_aligned_fscv.is_some() {
            streams.push("trial_aligned_fscv".to_string());
        }
        if self.raw_fscv.is_some() {
            streams.push("raw_fscv".to_string());
        }
        if self.eye_tracking.is_some() {
            streams.push("eye_tracking".to_string());
        }
        streams
    }
}

/// `<output>[/nwb_stub]/sub-<subject>_ses-<session>.zarr`
pub fn output_store_path(output_dir: &Path, subject_id: &str, session_id: &str, stub_test: bool) -> PathBuf {
    let folder = if stub_test {
        output_dir.join("nwb_stub")
    } else {
        output_dir.to_path_buf()
    };
    folder.join(format!("sub-{}_ses-{}.zarr", subject_id.replace(' ', "-"), session_id))
}

/// Convert one session and write its store
pub fn session_to_store(
    entry: &SessionEntry,
    metadata: &MetadataDocument,
    output_dir: &Path,
    stub_test: bool,
) -> anyhow::Result<SessionReport> {
    let products = convert_session(entry, metadata, stub_test)?;

    let store_path = output_store_path(output_dir, &products.subject_id, &products.session_id, stub_test);
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output folder {:?}", parent))?;
    }
    write_products(&store_path, &products, metadata, stub_test)
        .with_context(|| format!("Failed to write {:?}", store_path))?;
    info!("Session {} written to {:?}", products.session_id, store_path);

    Ok(SessionReport {
        session_id: products.session_id.clone(),
        subject_id: products.subject_id.clone(),
        store_path,
        trial_count: products.trials.as_ref().map_or(0, TrialsTable::len),
        event_series: products.events.as_ref().map_or(0, |e| e.series.len()),
        skipped_codes: products
            .events
            .as_ref()
            .map(|e| e.skipped_codes.clone())
            .unwrap_or_default(),
        streams: products.stream_names(),
    })
}

/// Inputs that passed the configuration checks
struct CheckedInputs {
    session_id: String,
    subject: Value,
    subject_id: String,
    trial_list: Option<TrialList>,
    event_map: Option<EventCodeMap>,
    fscv_channels: Option<Vec<(usize, String)>>,
}

fn check_configuration(
    entry: &SessionEntry,
    metadata: &MetadataDocument,
    settings: &ConversionSettings,
) -> Result<CheckedInputs> {
    let session_id = entry.session_id().ok_or_else(|| ConfigurationError::InvalidSetting {
        name: "session_id".to_string(),
        reason: "set 'session_id' or 'neuralynx_folder_path'".to_string(),
    })?;
    let subject_key = entry.subject_key().ok_or_else(|| ConfigurationError::InvalidSetting {
        name: "subject_metadata_key".to_string(),
        reason: "set 'subject_metadata_key' or 'neuralynx_folder_path'".to_string(),
    })?;
    let subject = metadata.subject(&subject_key)?;
    let subject_id = subject
        .get("subject_id")
        .and_then(Value::as_str)
        .unwrap_or(&subject_key)
        .replace(' ', "-");

    let fscv_channels = match &entry.raw_fscv_recording_folder_path {
        Some(_) => Some(entry.fscv_channels()?),
        None => None,
    };

    if entry.behavior_trlist_file_path.is_none() {
        for (stream, configured) in [
            ("LFP", entry.lfp_file_path.is_some()),
            ("Trial-aligned FSCV", entry.trial_aligned_fscv_file_path.is_some()),
            ("Raw FSCV", entry.raw_fscv_recording_folder_path.is_some()),
        ] {
            if configured {
                return Err(ConfigurationError::StreamRequiresTrials {
                    stream: stream.to_string(),
                }
                .into());
            }
        }
    }

    let (trial_list, event_map) = match &entry.behavior_trlist_file_path {
        Some(path) => {
            let trial_list = records::read_trial_list(path, &entry.behavior_trlist_key)?;
            let Some(names) = trial_list.event_names.clone() else {
                return Err(ConfigurationError::MissingEventCodeMap { path: path.clone() }.into());
            };
            let event_map = EventCodeMap::from_entries(
                names,
                &settings.event_renames()?,
                &settings.event_codes_to_skip,
            );
            if fscv_channels.is_some() && trial_list.fscv_timestamps.is_none() {
                return Err(ConfigurationError::MissingFscvAnchors.into());
            }
            (Some(trial_list), Some(event_map))
        }
        None => (None, None),
    };

    Ok(CheckedInputs {
        session_id,
        subject,
        subject_id,
        trial_list,
        event_map,
        fscv_channels,
    })
}

/// Run every conversion step in memory
pub fn convert_session(
    entry: &SessionEntry,
    metadata: &MetadataDocument,
    stub_test: bool,
) -> Result<SessionProducts> {
    let settings = metadata.conversion()?;
    let inputs = check_configuration(entry, metadata, &settings)?;
    info!("Converting session {} (subject {})", inputs.session_id, inputs.subject_id);

    let clock = ClockConverter::from_offset_seconds(settings.utc_offset_seconds)?;

    let explicit_start = match entry.parsed_start_time()? {
        Some(start) => Some(start),
        None => metadata.session_start_time()?,
    };
    let (reference, session_start_time) = match (explicit_start, &inputs.trial_list) {
        (Some(start), _) => (
            session_reference(&start),
            start.to_rfc3339_opts(SecondsFormat::Micros, false),
        ),
        (None, Some(trial_list)) if !trial_list.is_empty() => {
            let earliest = first_trial_epoch(trial_list);
            let first = clock.to_calendar(&[earliest])?[0];
            info!("No session start time configured, using the first trial timestamp");
            (first, format_reference(&clock, first))
        }
        _ => return Err(ConfigurationError::MissingSessionStartTime.into()),
    };

    let mut products = SessionProducts {
        session_id: inputs.session_id.clone(),
        subject_id: inputs.subject_id.clone(),
        subject: inputs.subject.clone(),
        session_start_time,
        trials: None,
        events: None,
        lfp: None,
        ephys_brain_areas: entry.ephys_channel_name_to_brain_area.clone(),
        thresholded_units: None,
        trial_aligned_fscv: None,
        raw_fscv: None,
        eye_tracking: None,
    };

    if let (Some(trial_list), Some(event_map)) = (&inputs.trial_list, &inputs.event_map) {
        convert_trial_streams(
            entry,
            &settings,
            &clock,
            reference,
            trial_list,
            event_map,
            inputs.fscv_channels.as_deref(),
            stub_test,
            &mut products,
        )?;
    }

    if let Some(path) = &entry.eye_tracking_file_path {
        if path.exists() {
            products.eye_tracking = Some(eye_tracking_series(records::read_eye_tracking(path)?, &settings, stub_test));
        } else {
            warn!("Eye tracking file {:?} not found, skipping eye tracking", path);
        }
    }

    if let Some(path) = &entry.spike_waveforms_file_path {
        if path.exists() {
            let spikes = records::read_spike_waveforms(path, &entry.spike_waveforms_key)?;
            products.thresholded_units = Some(thresholded_units(entry, &settings, &clock, reference, &spikes, stub_test)?);
        } else {
            warn!("Spike waveform file {:?} not found, skipping thresholded units", path);
        }
    }

    Ok(products)
}

fn thresholded_units(
    entry: &SessionEntry,
    settings: &ConversionSettings,
    clock: &ClockConverter,
    reference: NaiveDateTime,
    spikes: &SpikeWaveforms,
    stub_test: bool,
) -> Result<ThresholdedUnits> {
    let mut spike_times = match entry.spike_clock {
        NativeClock::SessionRelative => spikes.spike_times.clone(),
        NativeClock::Unix => clock.epoch_offsets(&spikes.spike_times, reference)?,
    };
    if stub_test && let Some(&first) = spike_times.first() {
        let keep = spike_times
            .iter()
            .take_while(|&&t| t - first <= settings.stub_seconds)
            .count();
        spike_times.truncate(keep);
    }

    let site = entry.spike_recording_site.clone();
    let electrodes = site_electrodes(site.as_deref(), entry.ephys_channel_name_to_brain_area.as_ref());
    let units = build_thresholded_units(
        spikes,
        &spike_times,
        site,
        electrodes,
        settings.waveform_sampling_frequency,
    );
    info!(
        "Thresholded units: {} spikes in {} units",
        units.spike_count(),
        units.units.len()
    );
    Ok(units)
}

/// Earliest soft or hard timestamp of the first trial
fn first_trial_epoch(trial_list: &TrialList) -> f64 {
    let soft = trial_list.soft_timestamps[0];
    trial_list
        .event_timestamps
        .first()
        .into_iter()
        .flatten()
        .copied()
        .filter(|t| t.is_finite())
        .fold(soft, f64::min)
}

fn format_reference(clock: &ClockConverter, reference: NaiveDateTime) -> String {
    reference
        .and_local_timezone(clock.offset())
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, false))
        .unwrap_or_else(|| reference.to_string())
}

#[allow(clippy::too_many_arguments)]
fn convert_trial_streams(
    entry: &SessionEntry,
    settings: &ConversionSettings,
    clock: &ClockConverter,
    reference: NaiveDateTime,
    trial_list: &TrialList,
    event_map: &EventCodeMap,
    fscv_channels: Option<&[(usize, String)]>,
    stub_test: bool,
    products: &mut SessionProducts,
) -> Result<()> {
    let aligner = TrialClockAligner::new(settings.trial_start_code);
    let mut aligned = aligner.align(
        &trial_list.soft_timestamps,
        &trial_list.event_codes,
        &trial_list.event_timestamps,
    )?;
    if stub_test {
        aligned = aligned.truncated(settings.stub_trials);
    }
    let n = aligned.len();
    info!("Aligned {} trials on TTL code {}", n, aligner.trial_start_code());

    let relative_starts = aligned.to_session_relative(clock, Some(reference))?;
    products.trials = Some(build_trials_table(
        &relative_starts,
        &trial_list.tags[..n],
        settings.trial_half_window,
    ));

    let mut relative_event_times = Vec::with_capacity(n);
    for times in &trial_list.event_timestamps[..n] {
        relative_event_times.push(clock.epoch_to_relative(times, Some(reference))?);
    }
    let events = group_events(event_map, &trial_list.event_codes[..n], &relative_event_times);
    info!(
        "Grouped {} events into {} series ({} unknown codes)",
        events.event_count(),
        events.series.len(),
        events.skipped_codes.len()
    );
    products.events = Some(events);

    if let Some(path) = &entry.lfp_file_path {
        if path.exists() {
            let lfp = records::read_lfp_trials(path, &entry.lfp_data_key)?;
            warn_count_mismatch("LFP", lfp.segments.len(), n);
            let reconstructor = SegmentedSignalReconstructor::new(settings.lfp_sampling_frequency)?
                .with_time_offset(settings.time_offset)?
                .with_max_segments(n);
            let signal = reconstructor.reconstruct(&relative_starts, &lfp.segments)?;
            info!("LFP: {} samples ({} gap samples)", signal.len(), signal.gap_samples());
            products.lfp = Some(signal);
        } else {
            warn!("LFP file {:?} not found, skipping LFP", path);
        }
    }

    if let Some(path) = &entry.trial_aligned_fscv_file_path {
        if path.exists() {
            let data = records::read_trial_aligned_fscv(path, &entry.trial_aligned_fscv_key)?;
            let reconstructor = SegmentedSignalReconstructor::new(settings.trial_aligned_sampling_frequency)?
                .with_time_offset(settings.time_offset)?;
            let table = build_trial_aligned_table(data, &relative_starts, &reconstructor)?;
            info!(
                "Trial-aligned FSCV: {} columns over {} trials",
                table.columns.len(),
                table.trial_count()
            );
            products.trial_aligned_fscv = Some(table);
        } else {
            warn!("Trial-aligned FSCV file {:?} not found, skipping", path);
        }
    }

    if let (Some(folder), Some(channels)) = (&entry.raw_fscv_recording_folder_path, fscv_channels) {
        products.raw_fscv = raw_fscv_stream(
            entry,
            settings,
            clock,
            reference,
            trial_list,
            &relative_starts,
            folder,
            channels,
            stub_test,
        )?;
    }

    Ok(())
}

fn warn_count_mismatch(stream: &str, actual: usize, expected: usize) {
    if actual != expected {
        warn!(
            "{} has {} trial segments, {} aligned trials. Keeping {}",
            stream,
            actual,
            expected,
            actual.min(expected)
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn raw_fscv_stream(
    entry: &SessionEntry,
    settings: &ConversionSettings,
    clock: &ClockConverter,
    reference: NaiveDateTime,
    trial_list: &TrialList,
    relative_starts: &[f64],
    folder: &Path,
    channels: &[(usize, String)],
    stub_test: bool,
) -> Result<Option<(RawFscvRecording, RetimedStream)>> {
    let Some((_, brain_area)) = channels.first() else {
        return Err(ConfigurationError::MissingFscvChannelMap.into());
    };
    if let Some((column, other)) = channels.iter().find(|(_, area)| area != brain_area) {
        return Err(ConfigurationError::InvalidSetting {
            name: "fscv_channel_ids_to_brain_area".to_string(),
            reason: format!(
                "all channels must share one brain area, column {column} is '{other}' but expected '{brain_area}'"
            ),
        }
        .into());
    }

    if !folder.is_dir() {
        warn!("Raw FSCV folder {:?} not found, skipping raw FSCV", folder);
        return Ok(None);
    }
    let mut files = discover_raw_fscv_files(folder, brain_area).map_err(|source| ParseError::Io {
        path: folder.to_path_buf(),
        source,
    })?;
    if files.is_empty() {
        warn!(
            "No raw FSCV recording files found for brain area '{}' in {:?}",
            brain_area, folder
        );
        return Ok(None);
    }
    if stub_test {
        files.truncate(1);
    }

    let chunks = files
        .iter()
        .map(|file| records::read_raw_fscv_chunk(file, &entry.raw_fscv_data_key))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let recording = assemble_raw_fscv(&chunks, channels, settings.fscv_conversion_factor)?;

    let native_timestamps = match entry.raw_fscv_clock {
        NativeClock::SessionRelative => recording.native_timestamps.clone(),
        NativeClock::Unix => clock.epoch_offsets(&recording.native_timestamps, reference)?,
    };

    let Some(fscv_starts) = &trial_list.fscv_timestamps else {
        return Err(ConfigurationError::MissingFscvAnchors.into());
    };
    let anchors = fscv_starts.len().min(relative_starts.len());
    // The FSCV clock may lag the reference, so its anchors can be negative too
    let native_anchors = clock.epoch_offsets(&fscv_starts[..anchors], reference)?;
    let interpolator = CrossStreamInterpolator::from_parts(&native_anchors, &relative_starts[..anchors])?;
    let retimed = interpolator.retime_stream(&native_timestamps, entry.fscv_retiming)?;
    info!(
        "Raw FSCV: {} samples from {} files, {} retiming starting at {:.6}s",
        recording.len(),
        recording.files.len(),
        retimed.strategy,
        retimed.starting_time
    );

    Ok(Some((recording, retimed)))
}

/// Gaze as `[x, y] × samples`; stub runs keep the first `stub_seconds`
fn eye_tracking_series(eye: EyeTracking, settings: &ConversionSettings, stub_test: bool) -> (Array2<f64>, f64, f64) {
    let mut samples = eye.samples;
    if stub_test {
        samples.truncate((settings.stub_seconds * eye.rate).round() as usize);
    }
    let n = samples.len();
    let mut xy = Array2::zeros((2, n));
    for (i, [y, x]) in samples.into_iter().enumerate() {
        xy[[0, i]] = x;
        xy[[1, i]] = y;
    }
    (xy, eye.rate, eye.starting_time)
}

fn write_products(
    store_path: &Path,
    products: &SessionProducts,
    metadata: &MetadataDocument,
    stub_test: bool,
) -> anyhow::Result<()> {
    let settings = metadata.conversion()?;
    let writer = SessionStoreWriter::create(store_path)?;

    let mut nwbfile = metadata.nwbfile();
    if let Value::Object(fields) = &mut nwbfile {
        fields.insert("session_id".to_string(), json!(products.session_id));
        fields.insert("session_start_time".to_string(), json!(products.session_start_time));
        fields.insert("identifier".to_string(), json!(uuid::Uuid::new_v4().to_string()));
    }
    let mut root = Map::new();
    root.insert("NWBFile".to_string(), nwbfile);
    root.insert("Subject".to_string(), products.subject.clone());
    root.insert(
        "Conversion".to_string(),
        metadata.section("Conversion").cloned().unwrap_or_else(|| json!({})),
    );
    root.insert("streams".to_string(), json!(products.stream_names()));
    root.insert("stub_test".to_string(), json!(stub_test));
    root.insert("converted_at".to_string(), json!(chrono::Utc::now().to_rfc3339()));
    root.insert("toolbox_version".to_string(), json!(env!("CARGO_PKG_VERSION")));
    writer.write_root_attributes(root)?;

    if let Some(trials) = &products.trials {
        writer.write_trials(trials)?;
    }
    if let Some(events) = &products.events {
        writer.write_events(events)?;
    }
    if let Some(lfp) = &products.lfp {
        let mut attrs = section_attributes(metadata, "Ecephys", "lfp_series");
        attrs.insert("rate".to_string(), json!(settings.lfp_sampling_frequency));
        attrs.insert("time_offset".to_string(), json!(settings.time_offset));
        attrs.insert("gap_samples".to_string(), json!(lfp.gap_samples()));
        if let Some(areas) = &products.ephys_brain_areas {
            attrs.insert("brain_areas".to_string(), json!(areas));
        }
        writer.write_lfp(lfp, attrs)?;
    }
    if let Some(units) = &products.thresholded_units {
        writer.write_thresholded_units(units)?;
    }
    if let (Some(table), Some(trials)) = (&products.trial_aligned_fscv, &products.trials) {
        let attrs = match metadata.section("TrialAlignedFSCV") {
            Some(Value::Object(fields)) => fields.clone(),
            _ => Map::new(),
        };
        writer.write_trial_aligned_fscv(table, trials, attrs)?;
    }
    if let Some((recording, retimed)) = &products.raw_fscv {
        writer.write_raw_fscv(recording, retimed)?;
    }
    if let Some((xy, rate, starting_time)) = &products.eye_tracking {
        writer.write_eye_tracking(xy, *rate, *starting_time)?;
    }
    Ok(())
}

fn section_attributes(metadata: &MetadataDocument, section: &str, key: &str) -> Map<String, Value> {
    match metadata.section(section).and_then(|s| s.get(key)) {
        Some(Value::Object(fields)) => fields.clone(),
        _ => Map::new(),
    }
}
