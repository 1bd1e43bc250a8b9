//! Typed input records and the JSON read boundary
//!
//! Every input file is a JSON export of the lab's acquisition structs. Each
//! reader validates shape and required fields here, so the alignment core only
//! ever receives well-formed vectors. Failures name the file and the field.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ParseError;

/// Key of the optional container wrapping the trial list and its siblings
pub const TRIAL_LISTS_CONTAINER: &str = "trlists";

/// Single-element arrays are often exported as bare scalars. `Many` is tried
/// first so a flat list of scalars reads as one element per entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TrialTag {
    Number(f64),
    Text(String),
}

impl TrialTag {
    fn into_string(self) -> String {
        match self {
            TrialTag::Number(n) if n.fract() == 0.0 => format!("{}", n as i64),
            TrialTag::Number(n) => n.to_string(),
            TrialTag::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTrialList {
    ts: OneOrMany<f64>,
    #[serde(rename = "type")]
    trial_type: OneOrMany<TrialTag>,
    #[serde(rename = "NlxEventTS")]
    nlx_event_ts: OneOrMany<OneOrMany<f64>>,
    #[serde(rename = "NlxEventTTL")]
    nlx_event_ttl: OneOrMany<OneOrMany<f64>>,
    #[serde(default)]
    tsfscv: Option<OneOrMany<f64>>,
    #[serde(default)]
    eventmap: Option<Value>,
}

/// Per-trial software and hardware clock records
#[derive(Debug, Clone, PartialEq)]
pub struct TrialList {
    pub path: PathBuf,
    /// Software Unix time per trial
    pub soft_timestamps: Vec<f64>,
    /// Condition tag per trial
    pub tags: Vec<String>,
    /// Hardware event Unix times, per trial
    pub event_timestamps: Vec<Vec<f64>>,
    /// TTL code of every hardware event, per trial
    pub event_codes: Vec<Vec<u16>>,
    /// Trial starts seen by the FSCV acquisition clock (Unix seconds)
    pub fscv_timestamps: Option<Vec<f64>>,
    /// `code -> name` entries exported with the trial list
    pub event_names: Option<Vec<(u16, String)>>,
}

impl TrialList {
    pub fn len(&self) -> usize {
        self.soft_timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.soft_timestamps.is_empty()
    }
}

/// LFP samples cut per trial, all segments the same length
#[derive(Debug, Clone, PartialEq)]
pub struct LfpTrials {
    pub segments: Vec<Vec<f64>>,
}

/// FSCV measures cut per trial, one table per named column
#[derive(Debug, Clone, PartialEq)]
pub struct TrialAlignedFscv {
    pub columns: BTreeMap<String, Vec<Vec<f64>>>,
    pub good: Option<Vec<bool>>,
}

impl TrialAlignedFscv {
    pub fn trial_count(&self) -> usize {
        self.columns.values().map(Vec::len).min().unwrap_or(0)
    }
}

/// One raw FSCV recording chunk, rows of `[time, applied_voltage, ch...]`
#[derive(Debug, Clone, PartialEq)]
pub struct RawFscvChunk {
    pub path: PathBuf,
    pub rows: Vec<Vec<f64>>,
}

impl RawFscvChunk {
    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }
}

/// Gaze samples, stored as `(y, x)` pairs by the tracker
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EyeTracking {
    pub rate: f64,
    #[serde(default)]
    pub starting_time: f64,
    pub samples: Vec<[f64; 2]>,
}

/// Thresholded spikes of one recording site, one row per spike
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeWaveforms {
    pub path: PathBuf,
    pub spike_times: Vec<f64>,
    /// `-1` marks a poor-quality spike
    pub unit_ids: Vec<i64>,
    /// Detected waveform per spike, all the same length
    pub waveforms: Vec<Vec<f64>>,
}

impl SpikeWaveforms {
    pub fn len(&self) -> usize {
        self.spike_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spike_times.is_empty()
    }

    pub fn waveform_samples(&self) -> usize {
        self.waveforms.first().map_or(0, Vec::len)
    }
}

fn read_json(path: &Path) -> Result<Value, ParseError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json {
        return Err(ParseError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ParseError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Unwrap the `trlists` container when present
fn trial_lists_root(document: &Value) -> &Value {
    document.get(TRIAL_LISTS_CONTAINER).unwrap_or(document)
}

fn take_key<'a>(document: &'a Value, path: &Path, key: &str) -> Result<&'a Value, ParseError> {
    document.get(key).ok_or_else(|| ParseError::MissingKey {
        path: path.to_path_buf(),
        key: key.to_string(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    value: &Value,
    path: &Path,
    key: &str,
) -> Result<T, ParseError> {
    T::deserialize(value).map_err(|e| ParseError::schema(path, key, e.to_string()))
}

/// TTL codes are exported as doubles; they must be small non-negative integers
fn to_code(value: f64, path: &Path, key: &str) -> Result<u16, ParseError> {
    if value.is_finite() && value.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(&value) {
        Ok(value as u16)
    } else {
        Err(ParseError::schema(path, key, format!("invalid TTL code {value}")))
    }
}

pub fn read_trial_list(path: &Path, key: &str) -> Result<TrialList, ParseError> {
    let document = read_json(path)?;
    let root = trial_lists_root(&document);
    let raw: RawTrialList = decode(take_key(root, path, key)?, path, key)?;

    let soft_timestamps = raw.ts.into_vec();
    let n = soft_timestamps.len();
    let tags: Vec<String> = raw
        .trial_type
        .into_vec()
        .into_iter()
        .map(TrialTag::into_string)
        .collect();
    let event_timestamps: Vec<Vec<f64>> = raw
        .nlx_event_ts
        .into_vec()
        .into_iter()
        .map(OneOrMany::into_vec)
        .collect();
    let raw_codes: Vec<Vec<f64>> = raw
        .nlx_event_ttl
        .into_vec()
        .into_iter()
        .map(OneOrMany::into_vec)
        .collect();

    for (field, len) in [
        ("type", tags.len()),
        ("NlxEventTS", event_timestamps.len()),
        ("NlxEventTTL", raw_codes.len()),
    ] {
        if len != n {
            return Err(ParseError::schema(
                path,
                field,
                format!("{len} entries for {n} trials"),
            ));
        }
    }

    let mut event_codes = Vec::with_capacity(n);
    for (trial, (codes, times)) in raw_codes.iter().zip(&event_timestamps).enumerate() {
        if codes.len() != times.len() {
            return Err(ParseError::schema(
                path,
                "NlxEventTTL",
                format!(
                    "trial {trial} has {} codes but {} timestamps",
                    codes.len(),
                    times.len()
                ),
            ));
        }
        event_codes.push(
            codes
                .iter()
                .map(|&c| to_code(c, path, "NlxEventTTL"))
                .collect::<Result<Vec<_>, _>>()?,
        );
    }

    let fscv_timestamps = raw.tsfscv.map(OneOrMany::into_vec);

    // The event map can sit inside the trial list or next to it
    let eventmap = raw.eventmap.as_ref().or_else(|| root.get("eventmap"));
    let event_names = eventmap
        .map(|value| parse_event_names(value, path))
        .transpose()?;

    Ok(TrialList {
        path: path.to_path_buf(),
        soft_timestamps,
        tags,
        event_timestamps,
        event_codes,
        fscv_timestamps,
        event_names,
    })
}

#[derive(Debug, Deserialize)]
struct EventNameEntry {
    code: f64,
    name: String,
}

/// Accepts `[{code, name}, ...]` or `{"<code>": "<name>", ...}`
fn parse_event_names(value: &Value, path: &Path) -> Result<Vec<(u16, String)>, ParseError> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(code, name)| {
                let code = code
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ParseError::schema(path, "eventmap", format!("invalid code '{code}'")))?;
                let name = name
                    .as_str()
                    .ok_or_else(|| ParseError::schema(path, "eventmap", "names must be strings"))?;
                Ok((to_code(code, path, "eventmap")?, name.to_string()))
            })
            .collect(),
        _ => {
            let entries: Vec<EventNameEntry> = decode(value, path, "eventmap")?;
            entries
                .into_iter()
                .map(|entry| Ok((to_code(entry.code, path, "eventmap")?, entry.name)))
                .collect()
        }
    }
}

fn equal_length_segments(
    segments: Vec<Vec<f64>>,
    path: &Path,
    key: &str,
) -> Result<Vec<Vec<f64>>, ParseError> {
    if let Some(first) = segments.first() {
        let expected = first.len();
        if let Some((trial, segment)) = segments
            .iter()
            .enumerate()
            .find(|(_, s)| s.len() != expected)
        {
            return Err(ParseError::schema(
                path,
                key,
                format!(
                    "trial {trial} has {} samples, expected {expected}",
                    segment.len()
                ),
            ));
        }
    }
    Ok(segments)
}

pub fn read_lfp_trials(path: &Path, key: &str) -> Result<LfpTrials, ParseError> {
    let document = read_json(path)?;
    let segments: Vec<Vec<f64>> = decode(take_key(&document, path, key)?, path, key)?;
    Ok(LfpTrials {
        segments: equal_length_segments(segments, path, key)?,
    })
}

/// Reads the single channel object under `trlists.fscv` when present, else `key`
pub fn read_trial_aligned_fscv(path: &Path, key: &str) -> Result<TrialAlignedFscv, ParseError> {
    let document = read_json(path)?;
    let table = match single_fscv_entry(&document, path)? {
        Some(table) => table,
        None => take_key(&document, path, key)?,
    };
    let Value::Object(fields) = table else {
        return Err(ParseError::schema(path, key, "expected an object of columns"));
    };

    let mut columns = BTreeMap::new();
    let mut good = None;
    for (name, value) in fields {
        if name == "good" {
            let flags: Vec<f64> = decode::<OneOrMany<f64>>(value, path, "good")?.into_vec();
            good = Some(flags.into_iter().map(|flag| flag != 0.0).collect());
            continue;
        }
        match Vec::<Vec<f64>>::deserialize(value) {
            Ok(segments) => {
                columns.insert(name.clone(), equal_length_segments(segments, path, name)?);
            }
            Err(_) => tracing::debug!("Ignoring non-tabular field '{}' in {:?}", name, path),
        }
    }

    if columns.is_empty() {
        return Err(ParseError::schema(path, key, "no per-trial columns found"));
    }
    let counts: Vec<usize> = columns.values().map(Vec::len).collect();
    if counts.iter().any(|&c| c != counts[0]) {
        return Err(ParseError::schema(path, key, format!("columns disagree on trial count: {counts:?}")));
    }
    Ok(TrialAlignedFscv { columns, good })
}

/// `trlists.fscv` holds one entry per FSCV channel; exactly one must be a table
fn single_fscv_entry<'a>(document: &'a Value, path: &Path) -> Result<Option<&'a Value>, ParseError> {
    let Some(entries) = document
        .get(TRIAL_LISTS_CONTAINER)
        .and_then(|lists| lists.get("fscv"))
    else {
        return Ok(None);
    };
    let tables: Vec<&Value> = match entries {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).collect(),
        Value::Object(_) => vec![entries],
        _ => Vec::new(),
    };
    match tables.as_slice() {
        [only] => Ok(Some(*only)),
        other => Err(ParseError::schema(
            path,
            "trlists.fscv",
            format!("expected one FSCV channel, found {}", other.len()),
        )),
    }
}

pub fn read_raw_fscv_chunk(path: &Path, key: &str) -> Result<RawFscvChunk, ParseError> {
    let document = read_json(path)?;
    let rows: Vec<Vec<f64>> = decode(take_key(&document, path, key)?, path, key)?;
    if let Some(first) = rows.first() {
        let width = first.len();
        if width < 3 {
            return Err(ParseError::schema(
                path,
                key,
                format!("rows need time, voltage and at least one channel, got {width} columns"),
            ));
        }
        if let Some(row) = rows.iter().position(|r| r.len() != width) {
            return Err(ParseError::schema(path, key, format!("row {row} is ragged")));
        }
    }
    Ok(RawFscvChunk {
        path: path.to_path_buf(),
        rows,
    })
}

pub fn read_eye_tracking(path: &Path) -> Result<EyeTracking, ParseError> {
    let document = read_json(path)?;
    let eye: EyeTracking = decode(&document, path, "eye_tracking")?;
    if !eye.rate.is_finite() || eye.rate <= 0.0 {
        return Err(ParseError::schema(path, "rate", format!("invalid rate {}", eye.rate)));
    }
    Ok(eye)
}

/// Rows of `[spike_time, unit_id, w0, w1, ...]`
pub fn read_spike_waveforms(path: &Path, key: &str) -> Result<SpikeWaveforms, ParseError> {
    let document = read_json(path)?;
    let rows: Vec<Vec<f64>> = decode(take_key(&document, path, key)?, path, key)?;

    let width = rows.first().map_or(0, Vec::len);
    if !rows.is_empty() && width < 3 {
        return Err(ParseError::schema(
            path,
            key,
            format!("rows need spike time, unit id and at least one waveform sample, got {width} columns"),
        ));
    }

    let mut spikes = SpikeWaveforms {
        path: path.to_path_buf(),
        spike_times: Vec::with_capacity(rows.len()),
        unit_ids: Vec::with_capacity(rows.len()),
        waveforms: Vec::with_capacity(rows.len()),
    };
    for (index, row) in rows.into_iter().enumerate() {
        if row.len() != width {
            return Err(ParseError::schema(path, key, format!("row {index} is ragged")));
        }
        let (time, unit) = (row[0], row[1]);
        if !time.is_finite() {
            return Err(ParseError::schema(path, key, format!("row {index} has spike time {time}")));
        }
        if !unit.is_finite() || unit.fract() != 0.0 || unit < -1.0 {
            return Err(ParseError::schema(path, key, format!("row {index} has unit id {unit}")));
        }
        spikes.spike_times.push(time);
        spikes.unit_ids.push(unit as i64);
        spikes.waveforms.push(row[2..].to_vec());
    }
    Ok(spikes)
}
