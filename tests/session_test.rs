mod common;

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use nwb_session_toolbox::config::{NativeClock, SessionEntry};
use nwb_session_toolbox::error::{ConfigurationError, ConversionError};
use nwb_session_toolbox::reconstruct::check_strictly_increasing;
use nwb_session_toolbox::session::{convert_session, output_store_path, session_to_store};
use nwb_session_toolbox::zarr::{array_shape, open_session_store, read_bool, read_f64, read_group_attributes};

use common::{BASE_EPOCH, FIRST_ALIGNED, FSCV_LAG, SEGMENT_SAMPLES, TRIALS, TRIAL_SPACING, metadata, session_fixture};

#[test]
fn test_full_session_store() {
    let dir = TempDir::new().unwrap();
    let fixture = session_fixture(dir.path(), "Monkey T", "09262024");
    let output = dir.path().join("nwbfiles");

    let report = session_to_store(&fixture.entry, &metadata(), &output, false).unwrap();
    assert_eq!(report.session_id, "09262024");
    assert_eq!(report.subject_id, "Monkey-T");
    assert_eq!(report.store_path, output.join("sub-Monkey-T_ses-09262024.zarr"));
    assert_eq!(report.trial_count, TRIALS);
    assert_eq!(report.skipped_codes, vec![77]);
    assert_eq!(
        report.streams,
        vec!["trials", "events", "lfp", "trial_aligned_fscv", "raw_fscv", "eye_tracking"]
    );

    let store = open_session_store(&report.store_path).unwrap();

    let root = read_group_attributes(&store, "/").unwrap();
    assert_eq!(root["NWBFile"]["session_id"], "09262024");
    assert_eq!(root["NWBFile"]["lab"], "Test lab");
    assert!(root["NWBFile"]["identifier"].is_string());
    assert_eq!(root["Subject"]["species"], "Macaca mulatta");
    assert_eq!(root["stub_test"], false);

    // Trials span 30 s on either side of the aligned start
    let start = read_f64(&store, "/trials/start_time").unwrap();
    let stop = read_f64(&store, "/trials/stop_time").unwrap();
    let midpoint = read_f64(&store, "/trials/midpoint_time").unwrap();
    assert_eq!(midpoint.len(), TRIALS);
    for trial in 0..TRIALS {
        let expected = FIRST_ALIGNED + TRIAL_SPACING * trial as f64;
        assert_abs_diff_eq!(midpoint[trial], expected, epsilon = 1e-5);
        assert_abs_diff_eq!(start[trial], expected - 30.0, epsilon = 1e-5);
        assert_abs_diff_eq!(stop[trial], expected + 30.0, epsilon = 1e-5);
    }

    let events = read_group_attributes(&store, "/events").unwrap();
    assert_eq!(events["skipped_codes"], serde_json::json!([77]));
    let starts = read_f64(&store, "/events/intended_trial_start/times").unwrap();
    assert_eq!(starts.len(), 2 * TRIALS);
    assert_eq!(read_f64(&store, "/events/reward/times").unwrap().len(), TRIALS);
    assert!(read_group_attributes(&store, "/events/noise").is_err());
    let reward = read_group_attributes(&store, "/events/reward").unwrap();
    assert_eq!(reward["code"], 5);

    let lfp_t = read_f64(&store, "/ecephys/lfp/timestamps").unwrap();
    let lfp = read_f64(&store, "/ecephys/lfp/data").unwrap();
    assert_eq!(lfp_t.len(), lfp.len());
    assert!(lfp_t.len() >= TRIALS * SEGMENT_SAMPLES);
    check_strictly_increasing(&lfp_t).unwrap();
    assert_abs_diff_eq!(lfp_t[0], FIRST_ALIGNED - 30.0, epsilon = 1e-5);
    let lfp_attrs = read_group_attributes(&store, "/ecephys/lfp").unwrap();
    assert_eq!(lfp_attrs["rate"], common::LFP_RATE);
    assert_eq!(lfp_attrs["name"], "differential_lfp_series");
    assert_eq!(lfp_attrs["brain_areas"]["CSC1"], "NAc");

    assert_eq!(
        array_shape(&store, "/fscv/trial_aligned/da").unwrap(),
        vec![TRIALS as u64, SEGMENT_SAMPLES as u64]
    );
    assert_eq!(read_bool(&store, "/fscv/trial_aligned/good").unwrap(), vec![true, false, true]);
    let fscv_t = read_f64(&store, "/fscv/trial_aligned/timestamps").unwrap();
    assert_eq!(read_f64(&store, "/fscv/trial_aligned/da_continuous").unwrap().len(), fscv_t.len());
    assert_eq!(read_f64(&store, "/fscv/trial_aligned/ph_continuous").unwrap().len(), fscv_t.len());
    assert_eq!(read_f64(&store, "/fscv/trial_aligned/start_time").unwrap().len(), TRIALS);

    // Only the two NAc chunks, re-timed by the constant FSCV clock lag
    let raw_t = read_f64(&store, "/fscv/raw/timestamps").unwrap();
    assert_eq!(raw_t.len(), 200);
    assert_eq!(read_f64(&store, "/fscv/raw/excitation").unwrap().len(), 200);
    assert_eq!(array_shape(&store, "/fscv/raw/response").unwrap(), vec![1, 200]);
    assert_abs_diff_eq!(raw_t[0], -FSCV_LAG, epsilon = 1e-5);
    assert_abs_diff_eq!(raw_t[199], 19.9 - FSCV_LAG, epsilon = 1e-5);
    let raw_attrs = read_group_attributes(&store, "/fscv/raw").unwrap();
    assert_eq!(raw_attrs["retiming"], "interpolated");
    assert_eq!(raw_attrs["files"].as_array().unwrap().len(), 2);
    let response = read_f64(&store, "/fscv/raw/response").unwrap();
    assert_abs_diff_eq!(response[1], 2.0 / (1e9 / 4.99e6), epsilon = 1e-12);

    assert_eq!(array_shape(&store, "/behavior/eye_tracking/data").unwrap(), vec![2, 50]);
    let gaze = read_f64(&store, "/behavior/eye_tracking/data").unwrap();
    assert_eq!(gaze[3], -3.0);
    assert_eq!(gaze[50 + 3], 3.0);
}

#[test]
fn test_unix_fscv_clock_may_start_before_session() {
    let dir = TempDir::new().unwrap();
    let mut fixture = session_fixture(dir.path(), "Monkey T", "09262024");
    let unix_dir = fixture.session_dir.join("fscv_unix");
    // Session starts at BASE_EPOCH - 20, so the recording begins 10 s earlier
    common::write_json(&unix_dir.join("rec_NAc_1.json"), &common::raw_chunk(BASE_EPOCH - 30.0, 100));
    fixture.entry.raw_fscv_recording_folder_path = Some(unix_dir);
    fixture.entry.raw_fscv_clock = NativeClock::Unix;

    let products = convert_session(&fixture.entry, &metadata(), false).unwrap();
    let (recording, retimed) = products.raw_fscv.unwrap();
    assert_eq!(recording.len(), 100);
    assert_abs_diff_eq!(retimed.timestamps[0], -10.0 - FSCV_LAG, epsilon = 1e-4);
    assert_abs_diff_eq!(retimed.timestamps[99], -0.1 - FSCV_LAG, epsilon = 1e-4);
    check_strictly_increasing(&retimed.timestamps).unwrap();
}

fn with_unix_spikes(fixture: &mut common::SessionFixture) {
    let path = fixture.session_dir.join("spikes_NAc.json");
    common::write_json(
        &path,
        &serde_json::json!({
            "spikes": [
                [BASE_EPOCH - 25.0, 4.0, 1.0, 2.0, 3.0],
                [BASE_EPOCH - 24.5, -1.0, 4.0, 5.0, 6.0],
                [BASE_EPOCH - 19.0, 4.0, 7.0, 8.0, 9.0],
            ]
        }),
    );
    fixture.entry.spike_waveforms_file_path = Some(path);
    fixture.entry.spike_recording_site = Some("NAc".to_string());
    fixture.entry.spike_clock = NativeClock::Unix;
}

#[test]
fn test_thresholded_units_written_per_unit() {
    let dir = TempDir::new().unwrap();
    let mut fixture = session_fixture(dir.path(), "Monkey T", "09262024");
    with_unix_spikes(&mut fixture);
    let output = dir.path().join("nwbfiles");

    let report = session_to_store(&fixture.entry, &metadata(), &output, false).unwrap();
    assert!(report.streams.contains(&"thresholded_units".to_string()));

    let store = open_session_store(&report.store_path).unwrap();
    let attrs = read_group_attributes(&store, "/ecephys/thresholded_units").unwrap();
    assert_eq!(attrs["unit_names"], serde_json::json!(["-1", "4"]));
    assert_eq!(attrs["electrodes"], serde_json::json!(["CSC1"]));
    assert_eq!(attrs["recording_site"], "NAc");
    assert_eq!(attrs["waveform_samples"], 3);

    // Session starts at BASE_EPOCH - 20, spikes before it keep negative times
    let unit4 = read_f64(&store, "/ecephys/thresholded_units/unit_4/spike_times").unwrap();
    assert_eq!(unit4.len(), 2);
    assert_abs_diff_eq!(unit4[0], -5.0, epsilon = 1e-6);
    assert_abs_diff_eq!(unit4[1], 1.0, epsilon = 1e-6);
    assert_eq!(
        array_shape(&store, "/ecephys/thresholded_units/unit_4/waveforms").unwrap(),
        vec![2, 3]
    );
    let waveforms = read_f64(&store, "/ecephys/thresholded_units/unit_4/waveforms").unwrap();
    assert_eq!(waveforms, vec![1.0, 2.0, 3.0, 7.0, 8.0, 9.0]);

    let poor = read_f64(&store, "/ecephys/thresholded_units/unit_-1/spike_times").unwrap();
    assert_eq!(poor.len(), 1);
    assert_abs_diff_eq!(poor[0], -4.5, epsilon = 1e-6);
    let poor_attrs = read_group_attributes(&store, "/ecephys/thresholded_units/unit_-1").unwrap();
    assert_eq!(poor_attrs["spike_count"], 1);
}

#[test]
fn test_stub_run_keeps_early_spikes() {
    let dir = TempDir::new().unwrap();
    let mut fixture = session_fixture(dir.path(), "Monkey T", "09262024");
    with_unix_spikes(&mut fixture);

    let products = convert_session(&fixture.entry, &metadata(), true).unwrap();
    let units = products.thresholded_units.unwrap();
    assert_eq!(units.spike_count(), 2);
    assert_eq!(units.unit_names(), vec!["-1", "4"]);
}

#[test]
fn test_stub_run_keeps_first_trials() {
    let dir = TempDir::new().unwrap();
    let fixture = session_fixture(dir.path(), "Monkey T", "09262024");
    let output = dir.path().join("nwbfiles");

    let report = session_to_store(&fixture.entry, &metadata(), &output, true).unwrap();
    assert_eq!(report.store_path, output_store_path(&output, "Monkey T", "09262024", true));
    assert!(report.store_path.starts_with(output.join("nwb_stub")));
    assert_eq!(report.trial_count, 2);

    let store = open_session_store(&report.store_path).unwrap();
    assert_eq!(read_f64(&store, "/trials/start_time").unwrap().len(), 2);
    assert_eq!(
        array_shape(&store, "/fscv/trial_aligned/da").unwrap(),
        vec![2, SEGMENT_SAMPLES as u64]
    );
    assert_eq!(read_f64(&store, "/fscv/raw/timestamps").unwrap().len(), 100);
    assert_eq!(array_shape(&store, "/behavior/eye_tracking/data").unwrap(), vec![2, 20]);
    assert_eq!(read_group_attributes(&store, "/").unwrap()["stub_test"], true);
}

#[test]
fn test_start_time_falls_back_to_first_trial() {
    let dir = TempDir::new().unwrap();
    let mut fixture = session_fixture(dir.path(), "Monkey T", "09262024");
    fixture.entry.session_start_time = None;

    let products = convert_session(&fixture.entry, &metadata(), false).unwrap();
    let trials = products.trials.unwrap();
    assert_eq!(trials.midpoint_time[0], 0.0);
    assert_abs_diff_eq!(trials.midpoint_time[1], TRIAL_SPACING, epsilon = 1e-5);
    assert!(products.session_start_time.starts_with("2023-11-14T22:13:19"));
}

#[test]
fn test_missing_stream_files_are_skipped() {
    let dir = TempDir::new().unwrap();
    let mut fixture = session_fixture(dir.path(), "Monkey T", "09262024");
    fixture.entry.lfp_file_path = Some(dir.path().join("absent.json"));
    fixture.entry.raw_fscv_recording_folder_path = Some(dir.path().join("absent"));

    let products = convert_session(&fixture.entry, &metadata(), false).unwrap();
    assert!(products.lfp.is_none());
    assert!(products.raw_fscv.is_none());
    assert!(products.trial_aligned_fscv.is_some());
    assert!(!products.stream_names().contains(&"lfp".to_string()));
}

fn configuration_error(entry: &SessionEntry) -> ConfigurationError {
    match convert_session(entry, &metadata(), false) {
        Err(ConversionError::Configuration(err)) => err,
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("conversion should fail"),
    }
}

#[test]
fn test_configuration_errors_come_first() {
    let dir = TempDir::new().unwrap();
    let fixture = session_fixture(dir.path(), "Monkey T", "09262024");

    let mut entry = fixture.entry.clone();
    entry.subject_metadata_key = Some("Monkey X".to_string());
    assert!(matches!(configuration_error(&entry), ConfigurationError::MissingSubject { .. }));

    let mut entry = fixture.entry.clone();
    entry.fscv_channel_ids_to_brain_area = None;
    assert_eq!(configuration_error(&entry), ConfigurationError::MissingFscvChannelMap);

    let mut entry = fixture.entry.clone();
    entry.behavior_trlist_file_path = None;
    assert!(matches!(
        configuration_error(&entry),
        ConfigurationError::StreamRequiresTrials { .. }
    ));

    let without_map = dir.path().join("trlist_no_map.json");
    common::write_json(&without_map, &common::trial_list_json(false));
    let mut entry = fixture.entry.clone();
    entry.behavior_trlist_file_path = Some(without_map);
    assert!(matches!(
        configuration_error(&entry),
        ConfigurationError::MissingEventCodeMap { .. }
    ));
}

#[test]
fn test_session_errors_survive_anyhow() {
    let dir = TempDir::new().unwrap();
    let mut fixture = session_fixture(dir.path(), "Monkey T", "09262024");
    fixture.entry.subject_metadata_key = Some("Monkey X".to_string());

    let err = session_to_store(&fixture.entry, &metadata(), &dir.path().join("out"), false).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConversionError>(),
        Some(ConversionError::Configuration(ConfigurationError::MissingSubject { .. }))
    ));
}
