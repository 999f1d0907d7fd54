use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Reserved id of the step that brackets a whole run.
pub const SCAN_STEP_ID: &str = "scan";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub is_heavy: bool,
    #[serde(default)]
    pub time_estimate_ms: Option<f64>,
    #[serde(default)]
    pub sub_steps: Vec<SubStepDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubStepDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub weight: f64,
}

impl StepDefinition {
    pub fn new(id: &str, name: &str, weight: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            weight,
            is_heavy: false,
            time_estimate_ms: None,
            sub_steps: Vec::new(),
        }
    }

    pub fn heavy(mut self) -> Self {
        self.is_heavy = true;
        self
    }

    pub fn estimate_ms(mut self, ms: f64) -> Self {
        self.time_estimate_ms = Some(ms);
        self
    }

    pub fn with_sub_step(mut self, id: &str, name: &str, weight: f64) -> Self {
        self.sub_steps.push(SubStepDefinition {
            id: id.to_string(),
            name: name.to_string(),
            weight,
        });
        self
    }

    pub fn has_sub_steps(&self) -> bool {
        !self.sub_steps.is_empty()
    }

    pub fn display_label(&self) -> String {
        if self.is_heavy {
            format!("{} (may take longer)", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// A sub-step looked up by id. Ids the parent does not declare are still
/// accepted and timed, but carry weight 0.
#[derive(Debug, Clone, PartialEq)]
pub enum SubStepRef<'a> {
    Known(&'a SubStepDefinition),
    AdHoc(SubStepDefinition),
}

impl SubStepRef<'_> {
    pub fn name(&self) -> &str {
        match self {
            SubStepRef::Known(def) => &def.name,
            SubStepRef::AdHoc(def) => &def.name,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            SubStepRef::Known(def) => def.weight,
            SubStepRef::AdHoc(def) => def.weight,
        }
    }

    pub fn is_ad_hoc(&self) -> bool {
        matches!(self, SubStepRef::AdHoc(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Catalog {
    steps: Vec<StepDefinition>,
    total_weight: f64,
}

impl Catalog {
    pub fn new(mut steps: Vec<StepDefinition>) -> Result<Self> {
        validate(&steps)?;

        if !steps.iter().any(|s| s.id == SCAN_STEP_ID) {
            steps.insert(0, StepDefinition::new(SCAN_STEP_ID, "Overall Scan", 0.0));
        }

        let total_weight = steps
            .iter()
            .filter(|s| s.id != SCAN_STEP_ID)
            .map(|s| s.weight)
            .sum();

        Ok(Self {
            steps,
            total_weight,
        })
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn work_steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter().filter(|s| s.id != SCAN_STEP_ID)
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn weight_before(&self, id: &str) -> Option<f64> {
        let idx = self.position(id)?;
        Some(self.weight_of_prefix(idx))
    }

    pub fn weight_through(&self, id: &str) -> Option<f64> {
        let idx = self.position(id)?;
        Some(self.weight_of_prefix(idx + 1))
    }

    pub fn percent_before(&self, id: &str) -> f64 {
        self.weight_before(id)
            .map(|w| self.as_percent(w))
            .unwrap_or(0.0)
    }

    pub fn percent_through(&self, id: &str) -> f64 {
        self.weight_through(id)
            .map(|w| self.as_percent(w))
            .unwrap_or(0.0)
    }

    pub fn resolve_sub_step<'a>(
        &'a self,
        parent_id: &str,
        sub_id: &str,
        label: Option<&str>,
    ) -> Option<SubStepRef<'a>> {
        let parent = self.step(parent_id).filter(|p| p.has_sub_steps())?;
        match parent.sub_steps.iter().find(|s| s.id == sub_id) {
            Some(def) => Some(SubStepRef::Known(def)),
            None => Some(SubStepRef::AdHoc(SubStepDefinition {
                id: sub_id.to_string(),
                name: label.unwrap_or(sub_id).to_string(),
                weight: 0.0,
            })),
        }
    }

    fn weight_of_prefix(&self, len: usize) -> f64 {
        self.steps[..len]
            .iter()
            .filter(|s| s.id != SCAN_STEP_ID)
            .map(|s| s.weight)
            .sum()
    }

    fn as_percent(&self, weight: f64) -> f64 {
        if self.total_weight > 0.0 {
            weight * 100.0 / self.total_weight
        } else {
            0.0
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(default_steps()).unwrap_or_else(|_| Self {
            steps: Vec::new(),
            total_weight: 0.0,
        })
    }
}

fn validate(steps: &[StepDefinition]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.id.is_empty() {
            bail!("step with name {:?} has an empty id", step.name);
        }
        if !seen.insert(step.id.as_str()) {
            bail!("duplicate step id: {}", step.id);
        }
        check_weight(&step.id, step.weight)?;

        if step.id == SCAN_STEP_ID && (step.weight != 0.0 || step.has_sub_steps()) {
            bail!("the {SCAN_STEP_ID} step must have weight 0 and no sub-steps");
        }

        let mut seen_sub = HashSet::new();
        for sub in &step.sub_steps {
            if sub.id.is_empty() {
                bail!("sub-step of {} has an empty id", step.id);
            }
            if !seen_sub.insert(sub.id.as_str()) {
                bail!("duplicate sub-step id {} in step {}", sub.id, step.id);
            }
            check_weight(&format!("{}/{}", step.id, sub.id), sub.weight)?;
        }
    }
    Ok(())
}

fn check_weight(what: &str, weight: f64) -> Result<()> {
    if !weight.is_finite() || weight < 0.0 {
        bail!("weight of {what} must be a finite number >= 0, got {weight}");
    }
    Ok(())
}

pub fn default_steps() -> Vec<StepDefinition> {
    vec![
        StepDefinition::new(SCAN_STEP_ID, "Overall Scan", 0.0),
        StepDefinition::new("initialization", "Initializing", 5.0).estimate_ms(50.0),
        StepDefinition::new("basicInfo", "Collecting Basic Browser Info", 10.0).estimate_ms(50.0),
        StepDefinition::new("processing-basic", "Processing Basic Data", 2.0).estimate_ms(20.0),
        StepDefinition::new("deviceInfo", "Analyzing Device Information", 15.0)
            .estimate_ms(700.0)
            .with_sub_step("deviceInfo-hardware", "Hardware Detection", 4.0)
            .with_sub_step("deviceInfo-platform", "Platform Analysis", 3.0)
            .with_sub_step("deviceInfo-screen", "Screen Configuration", 3.0)
            .with_sub_step("deviceInfo-memory", "Memory Assessment", 5.0),
        StepDefinition::new("processing-device", "Processing Device Data", 3.0).estimate_ms(30.0),
        StepDefinition::new("graphicsInfo", "Processing Graphics Data", 20.0)
            .estimate_ms(1500.0)
            .heavy(),
        StepDefinition::new("processing-graphics", "Processing Graphics Data", 3.0)
            .estimate_ms(30.0),
        StepDefinition::new("networkInfo", "Checking Network Status", 15.0).estimate_ms(1000.0),
        StepDefinition::new("processing-network", "Processing Network Data", 2.0)
            .estimate_ms(20.0),
        StepDefinition::new("storageInfo", "Scanning Storage Information", 10.0)
            .estimate_ms(500.0),
        StepDefinition::new("localizationInfo", "Detecting Localization Settings", 10.0)
            .estimate_ms(400.0),
        StepDefinition::new("fingerprinting", "Calculating Fingerprint", 25.0)
            .estimate_ms(2000.0)
            .heavy()
            .with_sub_step("fingerprinting-canvas", "Canvas Fingerprinting", 5.0)
            .with_sub_step("fingerprinting-webgl", "WebGL Analysis", 6.0)
            .with_sub_step("fingerprinting-fonts", "Font Enumeration", 5.0)
            .with_sub_step("fingerprinting-audio", "Audio Context Analysis", 4.0)
            .with_sub_step("fingerprinting-browser", "Browser Feature Detection", 5.0),
        StepDefinition::new("processing-fingerprint", "Processing Fingerprint Data", 5.0)
            .estimate_ms(50.0),
        StepDefinition::new("finalization", "Finalizing Results & UI", 10.0).estimate_ms(300.0),
    ]
}
