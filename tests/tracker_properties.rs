use sewerscan::analyzer::FrameFinding;
use sewerscan::tracker::{DamageTracker, SeverityClass};

fn crack(severity: u8) -> FrameFinding {
    FrameFinding::new("Longitudinal crack", severity)
}

/// Feed `(meter, findings)` per frame at a 2 s step.
fn run(window: u32, frames: &[(f64, Vec<FrameFinding>)]) -> Vec<sewerscan::tracker::Detection> {
    let mut tracker = DamageTracker::new(window);
    for (i, (meter, findings)) in frames.iter().enumerate() {
        tracker.observe(*meter, i as f64 * 2.0, findings);
    }
    tracker.finish()
}

#[test]
fn short_gap_extends_the_same_detection() {
    let detections = run(
        3,
        &[
            (0.0, vec![crack(2)]),
            (2.0, vec![crack(2)]),
            (4.0, vec![crack(2)]),
            (6.0, vec![]),
            (8.0, vec![]),
            (10.0, vec![crack(2)]),
        ],
    );
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].meter_start, 0.0);
    assert_eq!(detections[0].meter_end, 10.0);
    assert_eq!(detections[0].frames_observed, 4);
}

#[test]
fn window_of_misses_closes_and_reappearance_starts_new_detection() {
    let detections = run(
        3,
        &[
            (0.0, vec![crack(2)]),
            (2.0, vec![crack(2)]),
            (4.0, vec![crack(2)]),
            (6.0, vec![]),
            (8.0, vec![]),
            (10.0, vec![]),
            (12.0, vec![crack(3)]),
        ],
    );
    assert_eq!(detections.len(), 2);
    assert_eq!((detections[0].meter_start, detections[0].meter_end), (0.0, 4.0));
    assert_eq!((detections[1].meter_start, detections[1].meter_end), (12.0, 12.0));
    assert_eq!(detections[1].severity_class, SeverityClass::Mid);
}

#[test]
fn severity_class_follows_the_maximum() {
    let detections = run(
        3,
        &[
            (1.0, vec![crack(2)]),
            (2.0, vec![crack(4)]),
            (3.0, vec![crack(3)]),
        ],
    );
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].max_severity, 4);
    assert_eq!(detections[0].severity_class, SeverityClass::High);
}

#[test]
fn meter_range_is_ordered_for_every_detection() {
    let frames: Vec<(f64, Vec<FrameFinding>)> = [12.0, 9.5, 11.0, 3.0, 7.25]
        .iter()
        .map(|m| {
            (
                *m,
                vec![crack(2), FrameFinding::new("Root intrusion", 3)],
            )
        })
        .collect();
    for detection in run(2, &frames) {
        assert!(
            detection.meter_start <= detection.meter_end,
            "{} has {} > {}",
            detection.label,
            detection.meter_start,
            detection.meter_end
        );
    }
}

#[test]
fn finish_flushes_open_findings_sorted_by_meter() {
    let mut tracker = DamageTracker::new(5);
    tracker.observe(30.0, 0.0, &[FrameFinding::new("Deposit", 2)]);
    tracker.observe(5.0, 2.0, &[FrameFinding::new("Joint offset", 3)]);
    assert_eq!(tracker.active_count(), 2);
    assert_eq!(tracker.completed_count(), 0);

    let detections = tracker.finish();
    let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["Joint offset", "Deposit"]);
}

#[test]
fn identical_input_yields_identical_output() {
    let frames = vec![
        (0.0, vec![crack(1), FrameFinding::new("Deposit", 2).with_code_hint("BBC")]),
        (2.0, vec![]),
        (4.0, vec![crack(5)]),
        (6.0, vec![FrameFinding::new("deposit", 3)]),
    ];
    assert_eq!(run(2, &frames), run(2, &frames));
}

#[test]
fn skipped_frames_count_towards_the_window() {
    let mut tracker = DamageTracker::new(2);
    tracker.observe(0.0, 0.0, &[crack(2)]);
    tracker.skip_frame();
    assert_eq!(tracker.active_count(), 1);
    tracker.skip_frame();
    assert_eq!(tracker.active_count(), 0);
    assert_eq!(tracker.completed_count(), 1);

    let detections = tracker.finish();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].meter_end, 0.0);
}

#[test]
fn empty_run_has_no_detections() {
    assert!(DamageTracker::new(3).finish().is_empty());
}
