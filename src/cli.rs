use crate::{
    catalog::Catalog,
    clock::MonotonicClock,
    config::Config,
    display::{BarSink, LogSink, ProgressSink},
    report::render_text,
    simulate::{Pipeline, RunOutput, ThreadSleeper},
    tracker::ProgressTracker,
    util::{ensure_dir, now_rfc3339, run_id, sha256_hex},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "scan-progress")]
#[command(about = "Weighted step progress tracking and timing reports for multi-phase scans")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./scan-progress.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the step catalog with the percentage each step starts and ends at.
    Catalog {},
    /// Run a simulated scan and write its timing report.
    Run {
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Override simulate.time_scale.
        #[arg(long)]
        time_scale: Option<f64>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref())? {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match &args.cmd {
        Command::Catalog {} => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref(), true)?;
            catalog(&cfg)
        }
        Command::Run {
            out_dir,
            time_scale,
        } => run(&args, &cfg, out_dir.as_deref(), *time_scale),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = user {
        if !p.exists() {
            return Err(anyhow!("config does not exist: {}", p.display()));
        }
        return Ok(Some(p.to_path_buf()));
    }
    for candidate in ["scan-progress.toml", "scan-progress.example.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

// The progress bar owns the terminal while a run draws it.
pub fn console_logging(cfg: &Config, cmd: &Command) -> bool {
    match cmd {
        Command::Catalog {} => true,
        Command::Run { .. } => !cfg.display.progress_bar,
    }
}

fn init_logging(
    args: &Args,
    cfg: &Config,
    file_path: Option<&Path>,
    console: bool,
) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = match (console, cfg.logging.json) {
        (false, _) => None,
        (true, true) => Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .boxed(),
        ),
        (true, false) => Some(tracing_subscriber::fmt::layer().with_target(true).boxed()),
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn catalog(cfg: &Config) -> Result<()> {
    let catalog = cfg.catalog()?;
    println!("{}", serde_json::to_string_pretty(&catalog_json(&catalog))?);
    Ok(())
}

pub fn catalog_json(catalog: &Catalog) -> serde_json::Value {
    let steps: Vec<serde_json::Value> = catalog
        .work_steps()
        .map(|s| {
            serde_json::json!({
                "id": s.id,
                "name": s.name,
                "weight": s.weight,
                "is_heavy": s.is_heavy,
                "time_estimate_ms": s.time_estimate_ms,
                "starts_at_percent": catalog.percent_before(&s.id),
                "ends_at_percent": catalog.percent_through(&s.id),
                "sub_steps": s.sub_steps,
            })
        })
        .collect();
    serde_json::json!({
        "total_weight": catalog.total_weight(),
        "steps": steps,
    })
}

fn run(
    args: &Args,
    cfg: &Config,
    out_override: Option<&Path>,
    time_scale: Option<f64>,
) -> Result<()> {
    let mut cfg = cfg.clone();
    if let Some(scale) = time_scale {
        cfg.simulate.time_scale = scale;
    }
    cfg.simulate
        .validate()
        .with_context(|| "invalid --time-scale")?;
    let catalog = cfg.catalog()?;

    let started = now_rfc3339();
    let cfg_hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    let run_id = run_id(&cfg_hash, &started);

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let run_dir = out_root.join(&run_id);
    ensure_dir(&run_dir)?;
    ensure_dir(&run_dir.join("logs"))?;

    let log_path = resolve_log_path(&cfg, Some(&run_dir));
    let console = console_logging(&cfg, &args.cmd);
    let _guard = init_logging(args, &cfg, log_path.as_deref(), console)?;

    info!("run_id={run_id} name={} out={}", cfg.global.run_name, run_dir.display());

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(&cfg).unwrap_or_default();
        std::fs::write(run_dir.join("effective-config.toml"), raw)?;
    }

    let sink: Box<dyn ProgressSink> = if cfg.display.progress_bar {
        Box::new(BarSink::new())
    } else {
        Box::new(LogSink)
    };
    let mut tracker = ProgressTracker::new(catalog, MonotonicClock::new(), sink)
        .with_overhead_threshold_ms(cfg.report.overhead_threshold_ms);
    let pipeline = Pipeline::new(&cfg, ThreadSleeper);

    let output = pipeline.run_scan(&mut tracker);
    for failed in output.failed_phases() {
        warn!(
            "phase {} reported an error: {}",
            failed.step_id,
            failed.error.as_deref().unwrap_or("unknown")
        );
    }

    write_run_artifacts(&cfg, &run_dir, &run_id, &started, &output)?;

    if cfg.global.render_report {
        print!("{}", render_text(&output.report));
    }

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run_id": run_id,
                "run_dir": run_dir,
                "total_ms": output.report.total_ms,
                "failed_phases": output.failed_phases().count(),
                "status": "ok"
            }))?
        );
    }

    Ok(())
}

pub fn write_run_artifacts(
    cfg: &Config,
    run_dir: &Path,
    run_id: &str,
    started: &str,
    output: &RunOutput,
) -> Result<()> {
    ensure_dir(run_dir)?;

    if cfg.output.write_report_json {
        let path = run_dir.join(&cfg.output.report_filename);
        std::fs::write(&path, serde_json::to_string_pretty(output)?)
            .with_context(|| format!("write report: {}", path.display()))?;
    }

    if cfg.output.write_index_json {
        let index = serde_json::json!({
            "run_id": run_id,
            "run_name": cfg.global.run_name,
            "started": started,
            "finished": now_rfc3339(),
            "report": cfg.output.report_filename,
        });
        std::fs::write(run_dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;
    }

    Ok(())
}

fn resolve_log_path(cfg: &Config, run_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(run_dir) = run_dir {
        return Some(run_dir.join("logs").join("scan-progress.log"));
    }

    Some(PathBuf::from(&cfg.paths.out_dir).join("scan-progress.log"))
}
