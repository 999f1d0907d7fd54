use crate::{
    catalog::{Catalog, SCAN_STEP_ID},
    clock::{Clock, MonotonicClock},
    display::{ProgressSink, ProgressUpdate},
    report::{SubStepRecord, TimingReport, TimingSnapshot, DEFAULT_OVERHEAD_THRESHOLD_MS},
};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerFault {
    #[error("unknown step id \"{0}\"")]
    UnknownStep(String),
    #[error("cannot {op} \"{id}\": scan not running, start \"scan\" first")]
    NotRunning { op: &'static str, id: String },
    #[error("cannot end \"{0}\": step was not started")]
    NotStarted(String),
    #[error("step \"{0}\" is already running")]
    AlreadyStarted(String),
    #[error("parent step \"{0}\" not found or has no sub-steps")]
    NoSubSteps(String),
    #[error("cannot end sub-step \"{parent} > {sub}\": not started")]
    SubStepNotStarted { parent: String, sub: String },
}

#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub is_running: bool,
    pub current_step_id: Option<String>,
    pub scan_start_ms: Option<f64>,
    pub step_start_times: HashMap<String, f64>,
    pub completed_durations: HashMap<String, f64>,
    pub sub_step_timings: HashMap<String, BTreeMap<String, SubStepRecord>>,
}

pub struct ProgressTracker<C: Clock = MonotonicClock> {
    catalog: Catalog,
    clock: C,
    sink: Box<dyn ProgressSink>,
    overhead_threshold_ms: f64,
    state: RunState,
    last_update: ProgressUpdate,
    last_report: Option<TimingReport>,
}

impl<C: Clock> ProgressTracker<C> {
    pub fn new(catalog: Catalog, clock: C, sink: Box<dyn ProgressSink>) -> Self {
        Self {
            catalog,
            clock,
            sink,
            overhead_threshold_ms: DEFAULT_OVERHEAD_THRESHOLD_MS,
            state: RunState::default(),
            last_update: ProgressUpdate::new(0.0, "Ready to scan..."),
            last_report: None,
        }
    }

    pub fn with_overhead_threshold_ms(mut self, ms: f64) -> Self {
        self.overhead_threshold_ms = ms.abs();
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running
    }

    pub fn current_step_id(&self) -> Option<&str> {
        self.state.current_step_id.as_deref()
    }

    pub fn last_update(&self) -> &ProgressUpdate {
        &self.last_update
    }

    pub fn start(&mut self, step_id: &str) {
        if let Err(fault) = self.try_start(step_id) {
            warn!("start ignored: {fault}");
        }
    }

    /// Returns the step's duration in ms, or 0 when the call was ignored.
    pub fn end(&mut self, step_id: &str) -> f64 {
        self.try_end(step_id).unwrap_or_else(|fault| {
            warn!("end ignored: {fault}");
            0.0
        })
    }

    pub fn start_sub(&mut self, parent_id: &str, sub_id: &str, label: Option<&str>) {
        if let Err(fault) = self.try_start_sub(parent_id, sub_id, label) {
            warn!("start_sub ignored: {fault}");
        }
    }

    pub fn end_sub(&mut self, parent_id: &str, sub_id: &str) -> f64 {
        self.try_end_sub(parent_id, sub_id).unwrap_or_else(|fault| {
            warn!("end_sub ignored: {fault}");
            0.0
        })
    }

    pub fn try_start(&mut self, step_id: &str) -> Result<(), TrackerFault> {
        if step_id == SCAN_STEP_ID {
            if self.state.is_running {
                debug!("scan already running; start ignored");
                return Ok(());
            }
            let now = self.clock.now_ms();
            self.state = RunState {
                is_running: true,
                current_step_id: Some(SCAN_STEP_ID.to_string()),
                scan_start_ms: Some(now),
                step_start_times: HashMap::from([(SCAN_STEP_ID.to_string(), now)]),
                ..RunState::default()
            };
            self.last_report = None;
            self.emit(0.0, "Starting scan...");
            info!("scan started");
            return Ok(());
        }

        if !self.state.is_running {
            return Err(TrackerFault::NotRunning {
                op: "start",
                id: step_id.to_string(),
            });
        }
        let label = self
            .catalog
            .step(step_id)
            .map(|s| s.display_label())
            .ok_or_else(|| TrackerFault::UnknownStep(step_id.to_string()))?;
        if self.state.step_start_times.contains_key(step_id) {
            return Err(TrackerFault::AlreadyStarted(step_id.to_string()));
        }

        let now = self.clock.now_ms();
        self.state.step_start_times.insert(step_id.to_string(), now);
        self.state.current_step_id = Some(step_id.to_string());

        let percent = self.catalog.percent_before(step_id);
        self.emit(percent, label);
        debug!("started step {step_id} at {percent:.1}%");
        Ok(())
    }

    pub fn try_end(&mut self, step_id: &str) -> Result<f64, TrackerFault> {
        if !self.state.is_running {
            return Err(TrackerFault::NotRunning {
                op: "end",
                id: step_id.to_string(),
            });
        }
        let started = self
            .state
            .step_start_times
            .remove(step_id)
            .ok_or_else(|| TrackerFault::NotStarted(step_id.to_string()))?;

        let duration = self.clock.now_ms() - started;
        self.state
            .completed_durations
            .insert(step_id.to_string(), duration);

        if step_id == SCAN_STEP_ID {
            self.state.is_running = false;
            self.complete(duration);
            return Ok(duration);
        }

        let name = self
            .catalog
            .step(step_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| step_id.to_string());
        info!("ended step {step_id} in {}ms", duration.round());
        let percent = self.catalog.percent_through(step_id);
        self.emit(percent, name);
        Ok(duration)
    }

    pub fn try_start_sub(
        &mut self,
        parent_id: &str,
        sub_id: &str,
        label: Option<&str>,
    ) -> Result<(), TrackerFault> {
        if !self.state.is_running {
            return Err(TrackerFault::NotRunning {
                op: "start sub-step of",
                id: parent_id.to_string(),
            });
        }
        let sub = self
            .catalog
            .resolve_sub_step(parent_id, sub_id, label)
            .ok_or_else(|| TrackerFault::NoSubSteps(parent_id.to_string()))?;
        if sub.is_ad_hoc() {
            warn!("sub-step \"{sub_id}\" not pre-defined for \"{parent_id}\"; using provided name");
        }

        let parent_name = self
            .catalog
            .step(parent_id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let record = SubStepRecord {
            label: sub.name().to_string(),
            start_ms: self.clock.now_ms(),
            end_ms: None,
            duration_ms: None,
            ad_hoc: sub.is_ad_hoc(),
        };
        let status = format!("{parent_name} - {}", record.label);

        self.state
            .sub_step_timings
            .entry(parent_id.to_string())
            .or_default()
            .insert(sub_id.to_string(), record);

        let percent = self.current_progress_percent();
        self.emit(percent, status);
        debug!("started sub-step {parent_id} > {sub_id}");
        Ok(())
    }

    pub fn try_end_sub(&mut self, parent_id: &str, sub_id: &str) -> Result<f64, TrackerFault> {
        let not_started = || TrackerFault::SubStepNotStarted {
            parent: parent_id.to_string(),
            sub: sub_id.to_string(),
        };
        if !self.state.is_running {
            return Err(not_started());
        }

        let now = self.clock.now_ms();
        let record = self
            .state
            .sub_step_timings
            .get_mut(parent_id)
            .and_then(|subs| subs.get_mut(sub_id))
            .ok_or_else(not_started)?;
        let duration = now - record.start_ms;
        record.end_ms = Some(now);
        record.duration_ms = Some(duration);
        info!(
            "completed sub-step {parent_id} > {} in {}ms",
            record.label,
            duration.round()
        );

        if self.state.current_step_id.as_deref() == Some(parent_id)
            && let Some(label) = self.catalog.step(parent_id).map(|s| s.display_label())
        {
            let percent = self.current_progress_percent();
            self.emit(percent, label);
        }
        Ok(duration)
    }

    pub fn current_progress_percent(&self) -> f64 {
        match self.state.current_step_id.as_deref() {
            None | Some(SCAN_STEP_ID) => 0.0,
            Some(id) => self.catalog.percent_before(id),
        }
    }

    pub fn report(&self) -> TimingReport {
        if self.state.is_running {
            let total = self
                .state
                .scan_start_ms
                .map(|start| self.clock.now_ms() - start)
                .unwrap_or(0.0);
            return self.build_report(total, false);
        }
        self.last_report.clone().unwrap_or_else(TimingReport::empty)
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        let now = self.clock.now_ms();
        TimingSnapshot {
            running: self.state.is_running,
            current_step_id: self.state.current_step_id.clone(),
            completed: self
                .state
                .completed_durations
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            open: self
                .state
                .step_start_times
                .iter()
                .map(|(k, start)| (k.clone(), now - start))
                .collect(),
            sub_steps: self
                .state
                .sub_step_timings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn reset(&mut self) {
        self.state = RunState::default();
        self.last_report = None;
        self.emit(0.0, "Ready to scan...");
    }

    fn complete(&mut self, total_ms: f64) {
        let report = self.build_report(total_ms, true);
        self.emit(100.0, "Scan complete!");
        info!(
            "scan complete in {:.2}ms (measured {:.2}ms, overhead {:.2}ms)",
            report.total_ms, report.measured_ms, report.overhead_ms
        );
        if let Some(overhead) = report.significant_overhead() {
            warn!("untracked scan time: {overhead:.2}ms");
        }
        self.sink.finish(&report);
        self.last_report = Some(report);
    }

    fn build_report(&self, total_ms: f64, complete: bool) -> TimingReport {
        TimingReport::build(
            &self.catalog,
            total_ms,
            &self.state.completed_durations,
            &self.state.sub_step_timings,
            self.overhead_threshold_ms,
            complete,
        )
    }

    fn emit(&mut self, percent: f64, status: impl Into<String>) {
        self.last_update = ProgressUpdate::new(percent, status);
        self.sink.update(&self.last_update);
    }
}
