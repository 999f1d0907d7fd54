use crate::{
    catalog::StepDefinition,
    clock::{Clock, ManualClock},
    config::{Config, Simulate},
    report::TimingReport,
    tracker::ProgressTracker,
};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub trait Sleeper {
    fn sleep_ms(&self, ms: f64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep_ms(&self, ms: f64) {
        if ms <= 0.0 {
            return;
        }
        match Duration::try_from_secs_f64(ms / 1000.0) {
            Ok(d) => std::thread::sleep(d),
            Err(err) => warn!("skipping sleep of {ms} ms: {err}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClockSleeper {
    clock: ManualClock,
}

impl ClockSleeper {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock }
    }
}

impl Sleeper for ClockSleeper {
    fn sleep_ms(&self, ms: f64) {
        if ms > 0.0 {
            self.clock.advance(ms);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub step_id: String,
    pub ok: bool,
    pub duration_ms: f64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub report: TimingReport,
    pub phases: Vec<PhaseOutcome>,
}

impl RunOutput {
    pub fn failed_phases(&self) -> impl Iterator<Item = &PhaseOutcome> {
        self.phases.iter().filter(|p| !p.ok)
    }
}

pub struct Pipeline<S: Sleeper> {
    cfg: Simulate,
    sleeper: S,
}

struct PlannedSub {
    id: String,
    label: Option<String>,
    ms: f64,
}

impl<S: Sleeper> Pipeline<S> {
    pub fn new(cfg: &Config, sleeper: S) -> Self {
        Self {
            cfg: cfg.simulate.clone(),
            sleeper,
        }
    }

    // Every phase is ended even when its work fails.
    pub fn run_scan<C: Clock>(&self, tracker: &mut ProgressTracker<C>) -> RunOutput {
        let steps: Vec<StepDefinition> = tracker.catalog().work_steps().cloned().collect();
        let mut phases = Vec::with_capacity(steps.len());

        tracker.start(crate::catalog::SCAN_STEP_ID);

        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                self.sleeper.sleep_ms(self.cfg.inter_step_gap_ms);
            }

            tracker.start(&step.id);
            let result = self.run_phase(tracker, step);
            let duration_ms = tracker.end(&step.id);

            let error = match result {
                Ok(()) => None,
                Err(err) => {
                    warn!("phase {} failed: {:#}", step.id, err);
                    Some(format!("{err:#}"))
                }
            };
            phases.push(PhaseOutcome {
                step_id: step.id.clone(),
                ok: error.is_none(),
                duration_ms,
                error,
            });
        }

        tracker.end(crate::catalog::SCAN_STEP_ID);

        let report = tracker.report();
        info!(
            "simulated scan finished: {} phases, {} failed",
            phases.len(),
            phases.iter().filter(|p| !p.ok).count()
        );
        RunOutput { report, phases }
    }

    fn run_phase<C: Clock>(
        &self,
        tracker: &mut ProgressTracker<C>,
        step: &StepDefinition,
    ) -> Result<()> {
        let total_ms = self.phase_ms(step);
        let subs = self.plan_sub_steps(step, total_ms);

        if subs.is_empty() {
            self.sleeper.sleep_ms(total_ms);
        }

        for sub in &subs {
            tracker.start_sub(&step.id, &sub.id, sub.label.as_deref());
            self.sleeper.sleep_ms(sub.ms);
            tracker.end_sub(&step.id, &sub.id);

            if self.should_fail(&format!("{}/{}", step.id, sub.id)) {
                bail!("simulated failure in sub-step {}/{}", step.id, sub.id);
            }
        }

        if self.should_fail(&step.id) {
            bail!("simulated failure in {}", step.id);
        }
        debug!("phase {} done", step.id);
        Ok(())
    }

    fn phase_ms(&self, step: &StepDefinition) -> f64 {
        if let Some(&ms) = self.cfg.step_overrides_ms.get(&step.id) {
            return ms.max(0.0);
        }
        let estimate = step.time_estimate_ms.unwrap_or(self.cfg.default_phase_ms);
        (estimate * self.cfg.time_scale).max(0.0)
    }

    // Declared sub-steps split the phase time by weight; extras run after them.
    fn plan_sub_steps(&self, step: &StepDefinition, total_ms: f64) -> Vec<PlannedSub> {
        let weight_sum: f64 = step.sub_steps.iter().map(|s| s.weight).sum();
        let count = step.sub_steps.len() as f64;

        let mut planned: Vec<PlannedSub> = step
            .sub_steps
            .iter()
            .map(|sub| {
                let share = if weight_sum > 0.0 {
                    sub.weight / weight_sum
                } else {
                    1.0 / count
                };
                PlannedSub {
                    id: sub.id.clone(),
                    label: None,
                    ms: total_ms * share,
                }
            })
            .collect();

        planned.extend(
            self.cfg
                .extra_sub_steps
                .iter()
                .filter(|extra| extra.parent == step.id)
                .map(|extra| PlannedSub {
                    id: extra.id.clone(),
                    label: extra.label.clone(),
                    ms: extra.ms.max(0.0),
                }),
        );
        planned
    }

    fn should_fail(&self, key: &str) -> bool {
        self.cfg.fail_steps.iter().any(|f| f == key)
    }
}
