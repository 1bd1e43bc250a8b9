use approx::assert_abs_diff_eq;

use nwb_session_toolbox::error::InterpolationError;
use nwb_session_toolbox::interp::{
    AnchorPair, CrossStreamInterpolator, RetimingStrategy, shift_to_starting_time,
};

#[test]
fn test_identity_anchors_map_to_themselves() {
    let anchors = [0.0, 1.5, 4.0, 10.0];
    let interpolator = CrossStreamInterpolator::from_parts(&anchors, &anchors).unwrap();
    assert_eq!(interpolator.interpolate(&anchors).unwrap(), anchors.to_vec());
}

#[test]
fn test_piecewise_linear_between_anchors() {
    let interpolator = CrossStreamInterpolator::from_parts(&[0.0, 10.0, 20.0], &[100.0, 120.0, 125.0]).unwrap();
    let mapped = interpolator.interpolate(&[5.0, 10.0, 15.0]).unwrap();
    assert_abs_diff_eq!(mapped[0], 110.0);
    assert_abs_diff_eq!(mapped[1], 120.0);
    assert_abs_diff_eq!(mapped[2], 122.5);
}

#[test]
fn test_extrapolation_follows_edge_segments() {
    let interpolator = CrossStreamInterpolator::from_parts(&[0.0, 10.0, 20.0], &[10.0, 30.0, 35.0]).unwrap();
    // Last segment has slope 0.5, first segment slope 2
    assert_abs_diff_eq!(interpolator.map(30.0), 40.0);
    assert_abs_diff_eq!(interpolator.map(-5.0), 0.0);
}

#[test]
fn test_single_anchor_is_a_shift() {
    let interpolator = CrossStreamInterpolator::new(vec![AnchorPair {
        native: 5.0,
        aligned: 2.0,
    }])
    .unwrap();
    assert_eq!(interpolator.interpolate(&[0.0, 5.0, 7.5]).unwrap(), vec![-3.0, 2.0, 4.5]);
}

#[test]
fn test_starting_time_shift_preserves_spacing() {
    let native = [0.0, 0.1, 0.25, 1.0];
    let interpolator = CrossStreamInterpolator::from_parts(&[0.0, 1.0], &[5.0, 7.0]).unwrap();

    let retimed = interpolator
        .retime_stream(&native, RetimingStrategy::StartingTimeShift)
        .unwrap();
    assert_eq!(retimed.strategy, RetimingStrategy::StartingTimeShift);
    assert_abs_diff_eq!(retimed.starting_time, 5.0);
    for (shifted, original) in retimed.timestamps.windows(2).zip(native.windows(2)) {
        assert_abs_diff_eq!(shifted[1] - shifted[0], original[1] - original[0], epsilon = 1e-12);
    }

    let interpolated = interpolator
        .retime_stream(&native, RetimingStrategy::Interpolated)
        .unwrap();
    assert_abs_diff_eq!(interpolated.timestamps[3], 7.0);
    assert_abs_diff_eq!(retimed.timestamps[3], 6.0);
}

#[test]
fn test_shift_of_empty_stream() {
    assert!(shift_to_starting_time(&[], 3.0).is_empty());
}

#[test]
fn test_anchor_validation() {
    assert_eq!(
        CrossStreamInterpolator::new(Vec::new()).unwrap_err(),
        InterpolationError::NoAnchors
    );
    assert_eq!(
        CrossStreamInterpolator::from_parts(&[0.0, 1.0], &[0.0]).unwrap_err(),
        InterpolationError::AnchorLengthMismatch { native: 2, aligned: 1 }
    );
    assert!(matches!(
        CrossStreamInterpolator::from_parts(&[0.0, 2.0, 2.0], &[0.0, 1.0, 2.0]).unwrap_err(),
        InterpolationError::AnchorsNotIncreasing { index: 2, .. }
    ));
    assert_eq!(
        CrossStreamInterpolator::from_parts(&[0.0, f64::NAN], &[0.0, 1.0]).unwrap_err(),
        InterpolationError::NonFiniteAnchor { index: 1 }
    );

    let interpolator = CrossStreamInterpolator::from_parts(&[0.0, 1.0], &[0.0, 1.0]).unwrap();
    assert!(matches!(
        interpolator.interpolate(&[0.5, f64::NAN]).unwrap_err(),
        InterpolationError::NonFiniteSample { index: 1, .. }
    ));
}

#[test]
fn test_strategy_names() {
    assert_eq!(RetimingStrategy::default(), RetimingStrategy::Interpolated);
    assert_eq!(RetimingStrategy::StartingTimeShift.to_string(), "starting-time-shift");
    let parsed: RetimingStrategy = serde_json::from_str("\"starting-time-shift\"").unwrap();
    assert_eq!(parsed, RetimingStrategy::StartingTimeShift);
}
