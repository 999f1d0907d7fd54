use crate::catalog::{Catalog, SCAN_STEP_ID};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

pub const DEFAULT_OVERHEAD_THRESHOLD_MS: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingReport {
    pub total_ms: f64,
    pub steps: Vec<StepTiming>,
    pub measured_ms: f64,
    pub overhead_ms: f64,
    pub overhead_flagged: bool,
    pub complete: bool,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTiming {
    pub step_id: String,
    pub name: String,
    pub duration_ms: f64,
    pub percent_of_total: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<SubStepTiming>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubStepTiming {
    pub sub_step_id: String,
    pub name: String,
    pub duration_ms: f64,
    pub percent_of_parent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubStepRecord {
    pub label: String,
    pub start_ms: f64,
    pub end_ms: Option<f64>,
    pub duration_ms: Option<f64>,
    pub ad_hoc: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingSnapshot {
    pub running: bool,
    pub current_step_id: Option<String>,
    pub completed: BTreeMap<String, f64>,
    pub open: BTreeMap<String, f64>,
    pub sub_steps: BTreeMap<String, BTreeMap<String, SubStepRecord>>,
}

impl TimingReport {
    pub fn empty() -> Self {
        Self {
            total_ms: 0.0,
            steps: Vec::new(),
            measured_ms: 0.0,
            overhead_ms: 0.0,
            overhead_flagged: false,
            complete: false,
            generated_at: crate::util::now_rfc3339(),
        }
    }

    pub fn build(
        catalog: &Catalog,
        total_ms: f64,
        completed: &HashMap<String, f64>,
        sub_steps: &HashMap<String, BTreeMap<String, SubStepRecord>>,
        overhead_threshold_ms: f64,
        complete: bool,
    ) -> Self {
        let mut steps: Vec<(usize, StepTiming)> = completed
            .iter()
            .filter(|(id, _)| id.as_str() != SCAN_STEP_ID)
            .filter_map(|(id, &duration_ms)| {
                let idx = catalog.position(id)?;
                let def = catalog.step(id)?;
                let subs = sub_steps
                    .get(id)
                    .map(|records| sub_step_timings(records, duration_ms))
                    .unwrap_or_default();
                Some((
                    idx,
                    StepTiming {
                        step_id: id.clone(),
                        name: def.name.clone(),
                        duration_ms,
                        percent_of_total: ratio_percent(duration_ms, total_ms),
                        sub_steps: subs,
                    },
                ))
            })
            .collect();

        steps.sort_by(|(ia, a), (ib, b)| {
            by_duration_desc(a.duration_ms, b.duration_ms).then(ia.cmp(ib))
        });

        let measured_ms: f64 = steps.iter().map(|(_, s)| s.duration_ms).sum();
        let overhead_ms = total_ms - measured_ms;

        Self {
            total_ms,
            steps: steps.into_iter().map(|(_, s)| s).collect(),
            measured_ms,
            overhead_ms,
            overhead_flagged: overhead_ms.abs() > overhead_threshold_ms,
            complete,
            generated_at: crate::util::now_rfc3339(),
        }
    }

    pub fn significant_overhead(&self) -> Option<f64> {
        self.overhead_flagged.then_some(self.overhead_ms)
    }

    pub fn step(&self, id: &str) -> Option<&StepTiming> {
        self.steps.iter().find(|s| s.step_id == id)
    }
}

fn sub_step_timings(
    records: &BTreeMap<String, SubStepRecord>,
    parent_ms: f64,
) -> Vec<SubStepTiming> {
    let mut out: Vec<SubStepTiming> = records
        .iter()
        .filter_map(|(id, rec)| {
            let duration_ms = rec.duration_ms?;
            Some(SubStepTiming {
                sub_step_id: id.clone(),
                name: rec.label.clone(),
                duration_ms,
                percent_of_parent: ratio_percent(duration_ms, parent_ms),
            })
        })
        .collect();
    out.sort_by(|a, b| by_duration_desc(a.duration_ms, b.duration_ms));
    out
}

fn by_duration_desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

fn ratio_percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part * 100.0 / whole } else { 0.0 }
}

// One bar block per 2% of total.
pub fn render_text(report: &TimingReport) -> String {
    let rule = "─".repeat(39);
    let mut out = String::new();
    let _ = writeln!(out, "Detailed Scan Timing Report");
    let _ = writeln!(out, "{rule}");

    for step in &report.steps {
        let bar_len = (step.percent_of_total / 2.0).round().max(0.0) as usize;
        let _ = writeln!(
            out,
            "{}: {:>8.2} ms ({:>5.2}%) {}",
            step.name,
            step.duration_ms,
            step.percent_of_total,
            "█".repeat(bar_len)
        );
        for sub in &step.sub_steps {
            let sub_len = if step.duration_ms > 0.0 {
                let share = sub.duration_ms / step.duration_ms;
                (share * bar_len as f64).round().max(0.0) as usize
            } else {
                0
            };
            let _ = writeln!(
                out,
                "  ↪ {}: {:>8.2} ms ({:>5.2}%) {}",
                sub.name,
                sub.duration_ms,
                sub.percent_of_parent,
                "▓".repeat(sub_len)
            );
        }
    }

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Total measured time: {:.2} ms", report.measured_ms);
    let _ = writeln!(out, "Total scan time:     {:.2} ms", report.total_ms);
    if let Some(overhead) = report.significant_overhead() {
        let _ = writeln!(
            out,
            "Overhead/Untracked: {:.2} ms ({:.2}%)",
            overhead,
            ratio_percent(overhead, report.total_ms)
        );
    }
    let _ = writeln!(out, "{rule}");
    out
}
