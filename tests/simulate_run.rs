use scan_progress::{
    catalog::Catalog,
    cli::{catalog_json, write_run_artifacts},
    clock::ManualClock,
    config::{Config, ExtraSubStep},
    display::RecordingSink,
    simulate::{ClockSleeper, Pipeline},
    tracker::ProgressTracker,
};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn run_with(cfg: &Config) -> (scan_progress::simulate::RunOutput, RecordingSink) {
    let clock = ManualClock::new();
    let sink = RecordingSink::new();
    let catalog = cfg.catalog().unwrap();
    let mut tracker = ProgressTracker::new(catalog, clock.clone(), Box::new(sink.clone()))
        .with_overhead_threshold_ms(cfg.report.overhead_threshold_ms);
    let pipeline = Pipeline::new(cfg, ClockSleeper::new(clock));
    (pipeline.run_scan(&mut tracker), sink)
}

fn full_scale() -> Config {
    let mut cfg = Config::default();
    cfg.simulate.time_scale = 1.0;
    cfg
}

#[test]
fn simulated_scan_times_every_phase() {
    let cfg = full_scale();
    let (out, sink) = run_with(&cfg);

    assert_eq!(out.phases.len(), 14);
    assert!(out.phases.iter().all(|p| p.ok));
    assert!(out.report.complete);
    assert_eq!(out.report.steps.len(), 14);

    assert_eq!(out.report.steps[0].step_id, "fingerprinting");
    assert!(approx(out.report.step("graphicsInfo").unwrap().duration_ms, 1500.0));
    assert!(approx(out.report.total_ms, 6650.0));
    assert!(approx(out.report.overhead_ms, 0.0));
    assert!(!out.report.overhead_flagged);

    let fp = out.report.step("fingerprinting").unwrap();
    assert_eq!(fp.sub_steps.len(), 5);
    assert_eq!(fp.sub_steps[0].sub_step_id, "fingerprinting-webgl");
    assert!(approx(fp.sub_steps[0].duration_ms, 480.0));

    let percents: Vec<f64> = sink.updates().iter().map(|u| u.percent).collect();
    assert!(percents.windows(2).all(|w| w[1] >= w[0]), "non-monotonic: {percents:?}");
    assert_eq!(sink.last().unwrap().percent, 100.0);
}

#[test]
fn failed_phases_are_still_closed() {
    let mut cfg = full_scale();
    cfg.simulate.fail_steps = vec![
        "networkInfo".to_string(),
        "deviceInfo/deviceInfo-screen".to_string(),
    ];
    let (out, _sink) = run_with(&cfg);

    let failed: Vec<&str> = out.failed_phases().map(|p| p.step_id.as_str()).collect();
    assert_eq!(failed, vec!["deviceInfo", "networkInfo"]);

    let network = out.report.step("networkInfo").unwrap();
    assert!(approx(network.duration_ms, 1000.0));

    let device = out.report.step("deviceInfo").unwrap();
    let subs: Vec<&str> = device.sub_steps.iter().map(|s| s.sub_step_id.as_str()).collect();
    assert_eq!(subs.len(), 3);
    assert!(!subs.contains(&"deviceInfo-memory"));
    assert!(approx(device.duration_ms, 700.0 * 10.0 / 15.0));
    assert!(out.phases.iter().all(|p| p.duration_ms > 0.0));
}

#[test]
fn gaps_between_phases_show_up_as_overhead() {
    let mut cfg = full_scale();
    cfg.simulate.inter_step_gap_ms = 2.0;
    let (out, _sink) = run_with(&cfg);
    assert!(approx(out.report.overhead_ms, 26.0));
    assert!(out.report.overhead_flagged);
}

#[test]
fn extra_sub_steps_take_the_ad_hoc_path() {
    let mut cfg = full_scale();
    cfg.simulate.step_overrides_ms.insert("fingerprinting".to_string(), 100.0);
    cfg.simulate.extra_sub_steps.push(ExtraSubStep {
        parent: "fingerprinting".to_string(),
        id: "fingerprinting-speech".to_string(),
        label: Some("Speech Voices".to_string()),
        ms: 12.0,
    });
    let (out, _sink) = run_with(&cfg);

    let fp = out.report.step("fingerprinting").unwrap();
    assert!(approx(fp.duration_ms, 112.0));
    let speech = fp
        .sub_steps
        .iter()
        .find(|s| s.sub_step_id == "fingerprinting-speech")
        .unwrap();
    assert_eq!(speech.name, "Speech Voices");
    assert!(approx(speech.duration_ms, 12.0));
}

#[test]
fn run_artifacts_are_written() {
    let cfg = Config::default();
    let (out, _sink) = run_with(&cfg);
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("abc123");

    write_run_artifacts(&cfg, &run_dir, "abc123", "2026-01-01T00:00:00Z", &out).unwrap();

    let raw = std::fs::read_to_string(run_dir.join("report.json")).unwrap();
    let report: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(report["report"]["steps"].as_array().unwrap().len(), 14);
    assert_eq!(report["phases"].as_array().unwrap().len(), 14);

    let raw = std::fs::read_to_string(run_dir.join("index.json")).unwrap();
    let index: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(index["run_id"], "abc123");
    assert_eq!(index["report"], "report.json");
}

#[test]
fn catalog_json_spans_zero_to_hundred() {
    let value = catalog_json(&Catalog::default());
    let steps = value["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 14);
    assert_eq!(steps[0]["starts_at_percent"], 0.0);
    assert_eq!(steps[13]["ends_at_percent"], 100.0);
    assert_eq!(value["total_weight"], 135.0);
}
