use crate::catalog::{Catalog, StepDefinition};
use crate::report::DEFAULT_OVERHEAD_THRESHOLD_MS;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub report: Report,
    #[serde(default)]
    pub simulate: Simulate,
    #[serde(default)]
    pub display: Display,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.simulate
            .validate()
            .with_context(|| "invalid [simulate] section")?;
        Ok(cfg)
    }

    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    pub fn catalog(&self) -> Result<Catalog> {
        if self.catalog.steps.is_empty() {
            return Ok(Catalog::default());
        }
        Catalog::new(self.catalog.steps.clone()).with_context(|| "invalid [catalog] steps")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub run_name: String,
    pub print_summary: bool,
    pub render_report: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            run_name: "default".into(),
            print_summary: true,
            render_report: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSection {
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub overhead_threshold_ms: f64,
}
impl Default for Report {
    fn default() -> Self {
        Self {
            overhead_threshold_ms: DEFAULT_OVERHEAD_THRESHOLD_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulate {
    pub time_scale: f64,
    pub default_phase_ms: f64,
    pub inter_step_gap_ms: f64,
    #[serde(default)]
    pub step_overrides_ms: BTreeMap<String, f64>,
    /// Step ids, or `parent/sub` pairs, whose work fails.
    #[serde(default)]
    pub fail_steps: Vec<String>,
    #[serde(default)]
    pub extra_sub_steps: Vec<ExtraSubStep>,
}
impl Default for Simulate {
    fn default() -> Self {
        Self {
            time_scale: 0.1,
            default_phase_ms: 20.0,
            inter_step_gap_ms: 0.0,
            step_overrides_ms: BTreeMap::new(),
            fail_steps: Vec::new(),
            extra_sub_steps: Vec::new(),
        }
    }
}

impl Simulate {
    pub fn validate(&self) -> Result<()> {
        check_ms("time_scale", self.time_scale)?;
        check_ms("default_phase_ms", self.default_phase_ms)?;
        check_ms("inter_step_gap_ms", self.inter_step_gap_ms)?;
        for (id, &ms) in &self.step_overrides_ms {
            check_ms(&format!("step_overrides_ms.{id}"), ms)?;
        }
        for extra in &self.extra_sub_steps {
            check_ms(&format!("extra_sub_steps {}/{}", extra.parent, extra.id), extra.ms)?;
        }
        Ok(())
    }
}

fn check_ms(what: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        bail!("{what} must be a finite number >= 0, got {value}");
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraSubStep {
    pub parent: String,
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Display {
    pub progress_bar: bool,
}
impl Default for Display {
    fn default() -> Self {
        Self { progress_bar: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub write_report_json: bool,
    pub write_index_json: bool,
    pub report_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: true,
            write_index_json: true,
            report_filename: "report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            dump_effective_config: true,
        }
    }
}
