//! Session fixtures written as JSON exports into a scratch directory

#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nwb_session_toolbox::config::{MetadataDocument, SessionEntry};

/// 2023-11-14T22:13:20Z
pub const BASE_EPOCH: f64 = 1_700_000_000.0;
pub const SESSION_START: &str = "2023-11-14T22:13:00+00:00";
pub const TRIAL_SPACING: f64 = 100.0;
pub const TRIALS: usize = 3;
/// Aligned start of trial 0 in session-relative seconds
pub const FIRST_ALIGNED: f64 = 19.8;
/// FSCV clock runs this far ahead of the hardware clock
pub const FSCV_LAG: f64 = 0.7;
pub const LFP_RATE: f64 = 10.0;
pub const SEGMENT_SAMPLES: usize = 600;

pub fn write_json(path: &Path, value: &Value) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_string(value).unwrap()).unwrap();
}

fn soft(trial: usize) -> f64 {
    BASE_EPOCH + TRIAL_SPACING * trial as f64
}

/// Per trial: the trial start 0.2 s before the soft time, a late duplicate
/// start, a skipped code, a reward and one code the map does not know.
pub fn trial_list_json(with_eventmap: bool) -> Value {
    let ts: Vec<f64> = (0..TRIALS).map(soft).collect();
    let event_ts: Vec<Vec<f64>> = ts
        .iter()
        .map(|&s| vec![s - 0.2, s + 1.0, s + 2.0, s + 3.0, s + 5.0])
        .collect();
    let event_ttl: Vec<Vec<f64>> = (0..TRIALS)
        .map(|_| vec![128.0, 9.0, 5.0, 77.0, 128.0])
        .collect();
    let tsfscv: Vec<f64> = ts.iter().map(|s| s - 0.2 + FSCV_LAG).collect();
    let tags: Vec<usize> = (1..=TRIALS).collect();

    let mut trlist = json!({
        "ts": ts,
        "type": tags,
        "NlxEventTS": event_ts,
        "NlxEventTTL": event_ttl,
        "tsfscv": tsfscv,
    });
    if with_eventmap {
        trlist["eventmap"] = json!([
            { "code": 128, "name": "trial start" },
            { "code": 5, "name": "reward" },
            { "code": 9, "name": "noise" },
        ]);
    }
    json!({ "trlists": { "trlist": trlist } })
}

pub fn segments(trials: usize, samples: usize, scale: f64) -> Vec<Vec<f64>> {
    (0..trials)
        .map(|t| (0..samples).map(|k| scale * (t * samples + k) as f64).collect())
        .collect()
}

/// `time` column from `start` on the FSCV clock, channel in column 2
pub fn raw_chunk(start: f64, rows: usize) -> Value {
    let rows: Vec<Vec<f64>> = (0..rows)
        .map(|i| {
            let t = start + i as f64 * 0.1;
            vec![t, -0.4 + 0.001 * i as f64, 2.0 * i as f64]
        })
        .collect();
    json!({ "recordedData": rows })
}

/// Inputs of one complete session under `root/<subject>/<session>`
pub struct SessionFixture {
    pub session_dir: PathBuf,
    pub entry: SessionEntry,
}

pub fn session_fixture(root: &Path, subject_folder: &str, session: &str) -> SessionFixture {
    let session_dir = root.join(subject_folder).join(session);
    std::fs::create_dir_all(&session_dir).unwrap();

    let trlist_path = session_dir.join("trlist.json");
    write_json(&trlist_path, &trial_list_json(true));

    let lfp_path = session_dir.join("lfp.json");
    write_json(&lfp_path, &json!({ "tr_nlx": segments(TRIALS, SEGMENT_SAMPLES, 1.0) }));

    let fscv_path = session_dir.join("fscv.json");
    let good = [1.0, 0.0, 1.0];
    write_json(
        &fscv_path,
        &json!({
            "c8ds_fscv": {
                "da": segments(TRIALS, SEGMENT_SAMPLES, 0.5),
                "ph": segments(TRIALS, SEGMENT_SAMPLES, -0.1),
                "good": good,
                "site": "NAc core",
            }
        }),
    );

    let raw_dir = session_dir.join("fscv_raw");
    write_json(&raw_dir.join("rec_NAc_2.json"), &raw_chunk(10.0, 100));
    write_json(&raw_dir.join("rec_NAc_1.json"), &raw_chunk(0.0, 100));
    write_json(&raw_dir.join("rec_DMS_1.json"), &raw_chunk(0.0, 40));

    let eye_path = session_dir.join("eye.json");
    let samples: Vec<[f64; 2]> = (0..50).map(|i| [i as f64, -(i as f64)]).collect();
    write_json(&eye_path, &json!({ "rate": 10.0, "starting_time": 0.0, "samples": samples }));

    let entry = SessionEntry {
        neuralynx_folder_path: Some(session_dir.clone()),
        session_start_time: Some(SESSION_START.to_string()),
        behavior_trlist_file_path: Some(trlist_path),
        lfp_file_path: Some(lfp_path),
        ephys_channel_name_to_brain_area: Some(BTreeMap::from([(
            "CSC1".to_string(),
            "NAc".to_string(),
        )])),
        trial_aligned_fscv_file_path: Some(fscv_path),
        raw_fscv_recording_folder_path: Some(raw_dir),
        fscv_channel_ids_to_brain_area: Some(BTreeMap::from([("2".to_string(), "NAc".to_string())])),
        eye_tracking_file_path: Some(eye_path),
        ..SessionEntry::default()
    };

    SessionFixture { session_dir, entry }
}

pub fn metadata() -> MetadataDocument {
    MetadataDocument::from_value(json!({
        "NWBFile": { "lab": "Test lab" },
        "Subjects": {
            "Monkey T": { "subject_id": "Monkey T", "species": "Macaca mulatta", "sex": "M" }
        },
        "Conversion": {
            "lfp_sampling_frequency": LFP_RATE,
            "stub_trials": 2,
            "stub_seconds": 2.0,
        }
    }))
}
