use approx::assert_abs_diff_eq;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::TempDir;

use nwb_session_toolbox::fscv::{
    assemble_raw_fscv, build_trial_aligned_table, discover_raw_fscv_files, natural_cmp,
};
use nwb_session_toolbox::records::{RawFscvChunk, TrialAlignedFscv};
use nwb_session_toolbox::reconstruct::SegmentedSignalReconstructor;

#[test]
fn test_natural_order() {
    assert_eq!(natural_cmp("rec_2", "rec_10"), Ordering::Less);
    assert_eq!(natural_cmp("rec_10", "rec_9"), Ordering::Greater);
    assert_eq!(natural_cmp("a01", "a1"), Ordering::Greater);
    assert_eq!(natural_cmp("a1b", "a1b"), Ordering::Equal);
    assert_eq!(natural_cmp("a", "a1"), Ordering::Less);
}

#[test]
fn test_discovery_filters_by_area_and_sorts_naturally() {
    let dir = TempDir::new().unwrap();
    for name in ["NAc_10.json", "NAc_2.json", "NAc_1.json", "DMS_1.json", "NAc_notes.txt"] {
        std::fs::write(dir.path().join(name), "{}").unwrap();
    }
    std::fs::create_dir(dir.path().join("NAc_old.json")).unwrap();

    let files = discover_raw_fscv_files(dir.path(), "NAc").unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["NAc_1.json", "NAc_2.json", "NAc_10.json"]);
}

fn chunk(name: &str, rows: Vec<Vec<f64>>) -> RawFscvChunk {
    RawFscvChunk {
        path: PathBuf::from(name),
        rows,
    }
}

#[test]
fn test_assembly_concatenates_and_converts_current() {
    let chunks = vec![
        chunk("a.json", vec![vec![0.0, -0.4, 10.0, 20.0], vec![0.1, -0.3, 11.0, 21.0]]),
        chunk("b.json", vec![vec![0.2, -0.2, 12.0, 22.0]]),
    ];
    let channels = vec![(3, "NAc".to_string()), (2, "NAc".to_string())];
    let recording = assemble_raw_fscv(&chunks, &channels, 2.0).unwrap();

    assert_eq!(recording.len(), 3);
    assert_eq!(recording.native_timestamps, vec![0.0, 0.1, 0.2]);
    assert_eq!(recording.excitation, vec![-0.4, -0.3, -0.2]);
    assert_eq!(recording.response.dim(), (2, 3));
    assert_abs_diff_eq!(recording.response[[0, 0]], 10.0);
    assert_abs_diff_eq!(recording.response[[1, 2]], 6.0);
    assert_eq!(recording.files.len(), 2);
}

#[test]
fn test_assembly_rejects_non_channel_columns() {
    let chunks = vec![chunk("a.json", vec![vec![0.0, -0.4, 10.0]])];
    assert!(assemble_raw_fscv(&chunks, &[(1, "NAc".to_string())], 1.0).is_err());
    assert!(assemble_raw_fscv(&chunks, &[(0, "NAc".to_string())], 1.0).is_err());
    assert!(assemble_raw_fscv(&chunks, &[(3, "NAc".to_string())], 1.0).is_err());
}

#[test]
fn test_trial_aligned_table_truncates_to_aligned_trials() {
    let data = TrialAlignedFscv {
        columns: BTreeMap::from([
            ("da".to_string(), vec![vec![1.0; 5], vec![2.0; 5], vec![3.0; 5]]),
            ("ph".to_string(), vec![vec![-1.0; 5], vec![-2.0; 5], vec![-3.0; 5]]),
        ]),
        good: Some(vec![true, false, true]),
    };
    let reconstructor = SegmentedSignalReconstructor::new(1.0).unwrap();
    let table = build_trial_aligned_table(data, &[0.0, 10.0], &reconstructor).unwrap();

    assert_eq!(table.trial_count(), 2);
    assert_eq!(table.good, Some(vec![true, false]));
    assert_eq!(table.continuous_columns, vec!["da", "ph"]);
    assert_eq!(table.sampling_frequency, 1.0);
    // 5 samples, 5 NaNs at t=5..9, 5 samples
    assert_eq!(table.continuous.data.dim(), (2, 15));
    assert!(table.continuous.data[[0, 9]].is_nan());
    assert_eq!(table.continuous.data[[1, 10]], -2.0);
}
