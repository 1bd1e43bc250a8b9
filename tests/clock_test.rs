use approx::assert_abs_diff_eq;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

use nwb_session_toolbox::clock::{ClockConverter, session_reference, to_relative};
use nwb_session_toolbox::error::ClockError;

fn at(h: u32, m: u32, s: u32, milli: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 9, 26)
        .unwrap()
        .and_hms_milli_opt(h, m, s, milli)
        .unwrap()
}

#[test]
fn test_first_instant_is_zero_without_reference() {
    let instants = vec![at(10, 0, 0, 250), at(10, 0, 1, 0), at(10, 1, 0, 0)];
    let relative = to_relative(&instants, None).unwrap();

    assert_eq!(relative[0], 0.0);
    assert_abs_diff_eq!(relative[1], 0.75, epsilon = 1e-9);
    assert_abs_diff_eq!(relative[2], 59.75, epsilon = 1e-9);
}

#[test]
fn test_negative_offset_is_an_error() {
    let instants: Vec<NaiveDateTime> = (0..10).map(|s| at(10, 0, s, 0)).collect();
    let err = to_relative(&instants, Some(instants[5])).unwrap_err();

    match err {
        ClockError::NegativeOffset { index, offset } => {
            assert_eq!(index, 0);
            assert_abs_diff_eq!(offset, -5.0, epsilon = 1e-9);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_empty_input_without_reference() {
    assert!(to_relative(&[], None).unwrap().is_empty());
}

#[test]
fn test_to_calendar_in_utc_and_offset() {
    let utc = ClockConverter::default();
    let instants = utc.to_calendar(&[0.0, 1.5]).unwrap();
    assert_eq!(instants[0].to_string(), "1970-01-01 00:00:00");
    assert_eq!(instants[1].to_string(), "1970-01-01 00:00:01.500");

    let east = ClockConverter::from_offset_seconds(3600).unwrap();
    assert_eq!(east.to_calendar(&[0.0]).unwrap()[0].to_string(), "1970-01-01 01:00:00");
}

#[test]
fn test_to_calendar_rejects_non_finite() {
    let clock = ClockConverter::default();
    let err = clock.to_calendar(&[1.0, f64::NAN]).unwrap_err();
    assert!(matches!(err, ClockError::NonFinite { index: 1, .. }));

    assert!(matches!(
        clock.to_calendar(&[1e30]).unwrap_err(),
        ClockError::OutOfRange { index: 0, .. }
    ));
}

#[test]
fn test_invalid_utc_offset() {
    assert_eq!(
        ClockConverter::from_offset_seconds(90_000).unwrap_err(),
        ClockError::InvalidUtcOffset(90_000)
    );
}

#[test]
fn test_zone_aware_start_reduced_to_wall_clock() {
    // 14:00 wall clock in UTC-4; Unix seconds rendered in UTC-4 as well
    let start = DateTime::parse_from_rfc3339("2024-09-26T14:00:00-04:00").unwrap();
    let reference = session_reference(&start);
    assert_eq!(reference, at(14, 0, 0, 0));

    let clock = ClockConverter::from_offset_seconds(-4 * 3600).unwrap();
    let epoch = start.timestamp() as f64 + 12.5;
    let relative = clock.epoch_to_relative(&[epoch], Some(reference)).unwrap();
    assert_abs_diff_eq!(relative[0], 12.5, epsilon = 1e-6);
}

#[test]
fn test_epoch_offsets_keep_samples_before_reference() {
    let clock = ClockConverter::default();
    let reference = clock.to_calendar(&[1_000.0]).unwrap()[0];

    let offsets = clock.epoch_offsets(&[990.0, 1_000.0, 1_002.5], reference).unwrap();
    assert_abs_diff_eq!(offsets[0], -10.0, epsilon = 1e-9);
    assert_eq!(offsets[1], 0.0);
    assert_abs_diff_eq!(offsets[2], 2.5, epsilon = 1e-9);

    assert!(clock.epoch_to_relative(&[990.0], Some(reference)).is_err());
    assert!(matches!(
        clock.epoch_offsets(&[f64::NAN], reference),
        Err(ClockError::NonFinite { index: 0, .. })
    ));
}
