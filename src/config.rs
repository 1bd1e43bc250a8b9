//! Session map and metadata document
//!
//! The session map lists one `[[sessions]]` table per recording session. The
//! metadata document carries NWB-style descriptive metadata plus a
//! `[Conversion]` section with the pipeline constants. User metadata is
//! deep-merged over the built-in defaults.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigurationError;
use crate::interp::RetimingStrategy;

/// List of sessions to convert
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMap {
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

impl SessionMap {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session map {:?}", path))?;
        let map: SessionMap = toml::from_str(&content)
            .with_context(|| format!("Failed to parse session map {:?}", path))?;
        Ok(map)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Look a session up by its resolved id
    pub fn find(&self, session_id: &str) -> Option<&SessionEntry> {
        self.sessions
            .iter()
            .find(|entry| entry.session_id().as_deref() == Some(session_id))
    }
}

/// Clock that a stream's native time column is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NativeClock {
    /// Seconds since the session start, on the stream's clock
    #[default]
    SessionRelative,
    /// Unix seconds on the stream's clock
    Unix,
}

fn default_trlist_key() -> String {
    "trlist".to_string()
}

fn default_lfp_key() -> String {
    "tr_nlx".to_string()
}

fn default_trial_aligned_fscv_key() -> String {
    "c8ds_fscv".to_string()
}

fn default_raw_fscv_key() -> String {
    "recordedData".to_string()
}

fn default_spike_waveforms_key() -> String {
    "spikes".to_string()
}

/// Inputs of one session. Every stream is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Session folder; its name is the default session id and its parent's
    /// name the default subject key
    #[serde(default)]
    pub neuralynx_folder_path: Option<PathBuf>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub subject_metadata_key: Option<String>,
    /// RFC 3339, e.g. `2024-09-26T10:15:00-04:00`
    #[serde(default)]
    pub session_start_time: Option<String>,

    #[serde(default)]
    pub behavior_trlist_file_path: Option<PathBuf>,
    #[serde(default = "default_trlist_key")]
    pub behavior_trlist_key: String,

    #[serde(default)]
    pub lfp_file_path: Option<PathBuf>,
    #[serde(default = "default_lfp_key")]
    pub lfp_data_key: String,
    #[serde(default)]
    pub ephys_channel_name_to_brain_area: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub trial_aligned_fscv_file_path: Option<PathBuf>,
    #[serde(default = "default_trial_aligned_fscv_key")]
    pub trial_aligned_fscv_key: String,

    #[serde(default)]
    pub raw_fscv_recording_folder_path: Option<PathBuf>,
    #[serde(default = "default_raw_fscv_key")]
    pub raw_fscv_data_key: String,
    /// Row column index -> brain area
    #[serde(default)]
    pub fscv_channel_ids_to_brain_area: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub fscv_retiming: RetimingStrategy,
    #[serde(default)]
    pub raw_fscv_clock: NativeClock,

    #[serde(default)]
    pub eye_tracking_file_path: Option<PathBuf>,

    /// Thresholded spikes of one recording site
    #[serde(default)]
    pub spike_waveforms_file_path: Option<PathBuf>,
    #[serde(default = "default_spike_waveforms_key")]
    pub spike_waveforms_key: String,
    /// Brain area of the spikes, matched against the ephys channel map
    #[serde(default)]
    pub spike_recording_site: Option<String>,
    #[serde(default)]
    pub spike_clock: NativeClock,
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self {
            neuralynx_folder_path: None,
            session_id: None,
            subject_metadata_key: None,
            session_start_time: None,
            behavior_trlist_file_path: None,
            behavior_trlist_key: default_trlist_key(),
            lfp_file_path: None,
            lfp_data_key: default_lfp_key(),
            ephys_channel_name_to_brain_area: None,
            trial_aligned_fscv_file_path: None,
            trial_aligned_fscv_key: default_trial_aligned_fscv_key(),
            raw_fscv_recording_folder_path: None,
            raw_fscv_data_key: default_raw_fscv_key(),
            fscv_channel_ids_to_brain_area: None,
            fscv_retiming: RetimingStrategy::default(),
            raw_fscv_clock: NativeClock::default(),
            eye_tracking_file_path: None,
            spike_waveforms_file_path: None,
            spike_waveforms_key: default_spike_waveforms_key(),
            spike_recording_site: None,
            spike_clock: NativeClock::default(),
        }
    }
}

impl SessionEntry {
    pub fn session_id(&self) -> Option<String> {
        self.session_id.clone().or_else(|| {
            self.neuralynx_folder_path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|name| name.to_string_lossy().into_owned())
        })
    }

    pub fn subject_key(&self) -> Option<String> {
        self.subject_metadata_key.clone().or_else(|| {
            self.neuralynx_folder_path
                .as_ref()
                .and_then(|p| p.parent())
                .and_then(|p| p.file_name())
                .map(|name| name.to_string_lossy().into_owned())
        })
    }

    pub fn parsed_start_time(&self) -> Result<Option<DateTime<FixedOffset>>, ConfigurationError> {
        self.session_start_time
            .as_deref()
            .map(|s| parse_start_time("session_start_time", s))
            .transpose()
    }

    /// FSCV row columns, sorted, with their brain areas
    pub fn fscv_channels(&self) -> Result<Vec<(usize, String)>, ConfigurationError> {
        let Some(map) = &self.fscv_channel_ids_to_brain_area else {
            return Err(ConfigurationError::MissingFscvChannelMap);
        };
        let mut channels = map
            .iter()
            .map(|(id, area)| {
                id.trim()
                    .parse::<usize>()
                    .map(|column| (column, area.clone()))
                    .map_err(|_| ConfigurationError::InvalidFscvChannelId(id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        channels.sort_by_key(|(column, _)| *column);
        Ok(channels)
    }
}

fn parse_start_time(name: &str, value: &str) -> Result<DateTime<FixedOffset>, ConfigurationError> {
    DateTime::parse_from_rfc3339(value).map_err(|e| ConfigurationError::InvalidSetting {
        name: name.to_string(),
        reason: format!("'{value}' is not an RFC 3339 timestamp ({e})"),
    })
}

/// Pipeline constants, read from the `[Conversion]` metadata section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
    pub trial_start_code: u16,
    /// Seconds between a trial segment's first sample and its aligned start
    pub time_offset: f64,
    /// Seconds on either side of the aligned start spanned by a trial
    pub trial_half_window: f64,
    pub lfp_sampling_frequency: f64,
    pub trial_aligned_sampling_frequency: f64,
    pub stub_trials: usize,
    pub stub_seconds: f64,
    /// UTC offset used to render Unix timestamps as wall-clock time
    pub utc_offset_seconds: i32,
    /// Raw FSCV signal (V) to current (A) divisor
    pub fscv_conversion_factor: f64,
    pub waveform_sampling_frequency: f64,
    pub event_code_renames: BTreeMap<String, String>,
    pub event_codes_to_skip: Vec<u16>,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            trial_start_code: crate::align::DEFAULT_TRIAL_START_CODE,
            time_offset: 30.0,
            trial_half_window: crate::trials::DEFAULT_HALF_WINDOW,
            lfp_sampling_frequency: 1000.0,
            trial_aligned_sampling_frequency: 10.0,
            stub_trials: 100,
            stub_seconds: 100.0,
            utc_offset_seconds: 0,
            fscv_conversion_factor: 1e9 / 4.99e6,
            waveform_sampling_frequency: 32_000.0,
            event_code_renames: BTreeMap::from([(
                "128".to_string(),
                "intended trial start".to_string(),
            )]),
            event_codes_to_skip: vec![0, 9, 40, 41],
        }
    }
}

impl ConversionSettings {
    pub fn event_renames(&self) -> Result<BTreeMap<u16, String>, ConfigurationError> {
        self.event_code_renames
            .iter()
            .map(|(code, name)| {
                code.trim()
                    .parse::<u16>()
                    .map(|c| (c, name.clone()))
                    .map_err(|_| ConfigurationError::InvalidEventCode(code.clone()))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let positive = [
            ("lfp_sampling_frequency", self.lfp_sampling_frequency),
            ("trial_aligned_sampling_frequency", self.trial_aligned_sampling_frequency),
            ("fscv_conversion_factor", self.fscv_conversion_factor),
            ("waveform_sampling_frequency", self.waveform_sampling_frequency),
            ("stub_seconds", self.stub_seconds),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigurationError::InvalidSetting {
                    name: name.to_string(),
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        for (name, value) in [
            ("time_offset", self.time_offset),
            ("trial_half_window", self.trial_half_window),
        ] {
            if !value.is_finite() {
                return Err(ConfigurationError::InvalidSetting {
                    name: name.to_string(),
                    reason: format!("must be finite, got {value}"),
                });
            }
        }
        self.event_renames()?;
        Ok(())
    }
}

/// Descriptive metadata plus conversion settings, as one JSON tree
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataDocument {
    root: Value,
}

impl Default for MetadataDocument {
    fn default() -> Self {
        let conversion = serde_json::to_value(ConversionSettings::default())
            .unwrap_or_else(|_| json!({}));
        Self {
            root: json!({
                "NWBFile": {
                    "session_description": "Multi-stream recording session with trial-aligned behavior, LFP and FSCV.",
                    "institution": "",
                    "lab": "",
                },
                "Subjects": {},
                "Ecephys": {
                    "lfp_series": {
                        "name": "differential_lfp_series",
                        "description": "Differential LFP reconstructed from trial-aligned segments.",
                    }
                },
                "TrialAlignedFSCV": {},
                "Events": {
                    "name": "events",
                    "description": "Hardware events grouped by TTL code.",
                },
                "Conversion": conversion,
            }),
        }
    }
}

impl MetadataDocument {
    /// Defaults with the TOML document at `path` merged on top
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read metadata {:?}", path))?;
        let editable: Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse metadata {:?}", path))?;
        let mut document = Self::default();
        document.merge(editable);
        Ok(document)
    }

    pub fn from_value(editable: Value) -> Self {
        let mut document = Self::default();
        document.merge(editable);
        document
    }

    pub fn merge(&mut self, editable: Value) {
        deep_update(&mut self.root, editable);
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    pub fn nwbfile(&self) -> Value {
        self.section("NWBFile").cloned().unwrap_or_else(|| json!({}))
    }

    pub fn conversion(&self) -> Result<ConversionSettings, ConfigurationError> {
        let settings = match self.section("Conversion") {
            Some(section) => ConversionSettings::deserialize(section).map_err(|e| {
                ConfigurationError::InvalidSetting {
                    name: "Conversion".to_string(),
                    reason: e.to_string(),
                }
            })?,
            None => ConversionSettings::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn subject(&self, key: &str) -> Result<Value, ConfigurationError> {
        self.section("Subjects")
            .and_then(|subjects| subjects.get(key))
            .cloned()
            .ok_or_else(|| ConfigurationError::MissingSubject {
                key: key.to_string(),
            })
    }

    /// `[NWBFile] session_start_time`, when the document carries one
    pub fn session_start_time(&self) -> Result<Option<DateTime<FixedOffset>>, ConfigurationError> {
        self.section("NWBFile")
            .and_then(|nwbfile| nwbfile.get("session_start_time"))
            .and_then(Value::as_str)
            .map(|s| parse_start_time("NWBFile.session_start_time", s))
            .transpose()
    }
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other value in `overlay` replaces the one in `base`.
pub fn deep_update(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_update(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
