use scan_progress::{
    catalog::{Catalog, StepDefinition},
    clock::ManualClock,
    display::RecordingSink,
    tracker::{ProgressTracker, TrackerFault},
};

fn mk_tracker() -> (ProgressTracker<ManualClock>, ManualClock, RecordingSink) {
    let catalog = Catalog::new(vec![
        StepDefinition::new("q", "Q", 50.0),
        StepDefinition::new("p", "Parent", 50.0)
            .heavy()
            .with_sub_step("x", "X Check", 1.0)
            .with_sub_step("y", "Y Check", 3.0),
    ])
    .unwrap();
    let clock = ManualClock::new();
    let sink = RecordingSink::new();
    let tracker = ProgressTracker::new(catalog, clock.clone(), Box::new(sink.clone()));
    (tracker, clock, sink)
}

#[test]
fn sub_steps_report_parent_label_without_moving_percent() {
    let (mut t, clock, sink) = mk_tracker();
    t.start("scan");
    t.start("p");
    t.start_sub("p", "x", Some("ignored for known ids"));

    let last = sink.last().unwrap();
    assert_eq!(last.status, "Parent - X Check");
    assert_eq!(last.percent, 50.0);

    clock.advance(8.0);
    assert_eq!(t.end_sub("p", "x"), 8.0);
    let last = sink.last().unwrap();
    assert_eq!(last.status, "Parent (may take longer)");
    assert_eq!(last.percent, 50.0);
    assert_eq!(t.current_progress_percent(), 50.0);
}

#[test]
fn ad_hoc_sub_steps_are_timed() {
    let (mut t, clock, sink) = mk_tracker();
    t.start("scan");
    t.start("p");
    assert_eq!(t.try_start_sub("p", "extra", Some("Extra Work")), Ok(()));
    assert_eq!(sink.last().unwrap().status, "Parent - Extra Work");

    clock.advance(12.0);
    assert_eq!(t.end_sub("p", "extra"), 12.0);

    let record = &t.state().sub_step_timings["p"]["extra"];
    assert!(record.ad_hoc);
    assert_eq!(record.label, "Extra Work");
    assert_eq!(record.end_ms, Some(12.0));

    t.start_sub("p", "bare", None);
    assert_eq!(t.state().sub_step_timings["p"]["bare"].label, "bare");
}

#[test]
fn parent_without_sub_steps_is_ignored() {
    let (mut t, _clock, sink) = mk_tracker();
    t.start("scan");
    t.start("q");
    let before = sink.len();

    assert_eq!(
        t.try_start_sub("q", "x", None),
        Err(TrackerFault::NoSubSteps("q".to_string()))
    );
    t.start_sub("missing", "x", None);
    assert!(t.state().sub_step_timings.is_empty());
    assert_eq!(sink.len(), before);
}

#[test]
fn ending_unknown_sub_step_returns_zero() {
    let (mut t, _clock, _sink) = mk_tracker();
    assert_eq!(t.end_sub("p", "x"), 0.0);

    t.start("scan");
    assert_eq!(
        t.try_end_sub("p", "x"),
        Err(TrackerFault::SubStepNotStarted {
            parent: "p".to_string(),
            sub: "x".to_string()
        })
    );
    assert_eq!(t.end_sub("p", "x"), 0.0);
}

#[test]
fn sub_steps_need_a_running_scan() {
    let (mut t, _clock, _sink) = mk_tracker();
    assert!(matches!(
        t.try_start_sub("p", "x", None),
        Err(TrackerFault::NotRunning { .. })
    ));
    assert!(t.state().sub_step_timings.is_empty());
}

#[test]
fn overlapping_sub_steps_are_reported_raw() {
    let (mut t, clock, _sink) = mk_tracker();
    t.start("scan");
    t.start_sub("p", "x", None);
    clock.advance(10.0);
    t.start("p");
    t.start_sub("p", "y", None);
    clock.advance(30.0);
    assert_eq!(t.end("p"), 30.0);
    clock.advance(5.0);
    assert_eq!(t.end_sub("p", "x"), 45.0);
    assert_eq!(t.end_sub("p", "y"), 35.0);
    t.end("scan");

    let report = t.report();
    let parent = report.step("p").unwrap();
    assert_eq!(parent.duration_ms, 30.0);
    let subs: Vec<(&str, f64)> = parent
        .sub_steps
        .iter()
        .map(|s| (s.sub_step_id.as_str(), s.percent_of_parent))
        .collect();
    assert_eq!(subs, vec![("x", 150.0), ("y", 35.0 * 100.0 / 30.0)]);
}

#[test]
fn sub_step_end_on_non_current_parent_does_not_emit() {
    let (mut t, clock, sink) = mk_tracker();
    t.start("scan");
    t.start("p");
    t.start_sub("p", "x", None);
    t.start("q");
    let before = sink.len();
    clock.advance(2.0);
    assert_eq!(t.end_sub("p", "x"), 2.0);
    assert_eq!(sink.len(), before);
}
