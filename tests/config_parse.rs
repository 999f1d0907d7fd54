use scan_progress::{
    catalog::Catalog,
    cli::{console_logging, Command},
    config::Config,
    simulate::{Sleeper, ThreadSleeper},
};

#[test]
fn parse_example_config() {
    let raw = include_str!("../scan-progress.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert!(!cfg.paths.out_dir.is_empty());
    assert_eq!(cfg.simulate.fail_steps, vec!["networkInfo".to_string()]);
    assert_eq!(cfg.simulate.extra_sub_steps.len(), 1);
    assert_eq!(cfg.simulate.step_overrides_ms.get("finalization"), Some(&15.0));

    let catalog = cfg.catalog().expect("valid catalog");
    assert_eq!(catalog.total_weight(), 100.0);
    assert_eq!(catalog.steps()[0].id, "scan");
    let device = catalog.step("deviceInfo").unwrap();
    assert_eq!(device.sub_steps.len(), 2);
    assert!(catalog.step("fingerprinting").unwrap().is_heavy);
}

#[test]
fn empty_catalog_section_uses_builtin_steps() {
    let raw = "[global]\nrun_name = \"x\"\nprint_summary = false\nrender_report = false\n";
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.catalog().unwrap(), Catalog::default());
    assert_eq!(cfg.report.overhead_threshold_ms, 10.0);
}

#[test]
fn invalid_catalog_is_rejected() {
    let raw = r#"
[[catalog.steps]]
id = "a"
name = "A"
weight = -1
"#;
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    let err = cfg.catalog().unwrap_err();
    assert!(format!("{err:#}").contains("weight of a"));
}

#[test]
fn effective_config_round_trips_through_toml() {
    let cfg: Config = toml::from_str(include_str!("../scan-progress.example.toml")).unwrap();
    let dumped = cfg.normalized_for_hash();
    assert!(!dumped.is_empty());
    let back: Config = toml::from_str(&dumped).expect("re-parse dumped config");
    assert_eq!(back.catalog().unwrap(), cfg.catalog().unwrap());
}

#[test]
fn non_finite_simulate_values_fail_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(
        &path,
        "[simulate]\ntime_scale = inf\ndefault_phase_ms = 20.0\ninter_step_gap_ms = 0.0\n",
    )
    .unwrap();

    let err = Config::load(&path).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("invalid [simulate] section"));
    assert!(msg.contains("time_scale"));
}

#[test]
fn negative_or_nan_simulate_values_are_rejected() {
    let mut cfg = Config::default();
    assert!(cfg.simulate.validate().is_ok());

    cfg.simulate.step_overrides_ms.insert("networkInfo".into(), -5.0);
    assert!(cfg.simulate.validate().is_err());

    cfg.simulate.step_overrides_ms.clear();
    cfg.simulate.inter_step_gap_ms = f64::NAN;
    assert!(cfg.simulate.validate().is_err());
}

#[test]
fn thread_sleeper_skips_unrepresentable_durations() {
    ThreadSleeper.sleep_ms(f64::INFINITY);
    ThreadSleeper.sleep_ms(f64::NAN);
    ThreadSleeper.sleep_ms(-1.0);
}

#[test]
fn console_logging_is_off_while_the_bar_draws() {
    let run = Command::Run {
        out_dir: None,
        time_scale: None,
    };
    let mut cfg = Config::default();
    assert!(cfg.display.progress_bar);
    assert!(!console_logging(&cfg, &run));
    assert!(console_logging(&cfg, &Command::Catalog {}));

    cfg.display.progress_bar = false;
    assert!(console_logging(&cfg, &run));
}
