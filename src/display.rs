use crate::report::TimingReport;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub status: String,
}

impl ProgressUpdate {
    pub fn new(percent: f64, status: impl Into<String>) -> Self {
        Self {
            percent: percent.clamp(0.0, 100.0),
            status: status.into(),
        }
    }

    pub fn rounded_percent(&self) -> u64 {
        self.percent.round() as u64
    }
}

/// Receives every display change the tracker makes.
pub trait ProgressSink {
    fn update(&mut self, update: &ProgressUpdate);

    fn finish(&mut self, _report: &TimingReport) {}
}

#[derive(Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn update(&mut self, update: &ProgressUpdate) {
        info!("progress {}% {}", update.rounded_percent(), update.status);
    }

    fn finish(&mut self, report: &TimingReport) {
        info!(
            "scan finished total_ms={:.2} measured_ms={:.2} steps={}",
            report.total_ms,
            report.measured_ms,
            report.steps.len()
        );
    }
}

// Clones share the same history.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    updates: Rc<RefCell<Vec<ProgressUpdate>>>,
    finished: Rc<RefCell<Option<TimingReport>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.borrow().clone()
    }

    pub fn last(&self) -> Option<ProgressUpdate> {
        self.updates.borrow().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.updates.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.borrow().is_empty()
    }

    pub fn finished_report(&self) -> Option<TimingReport> {
        self.finished.borrow().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn update(&mut self, update: &ProgressUpdate) {
        self.updates.borrow_mut().push(update.clone());
    }

    fn finish(&mut self, report: &TimingReport) {
        *self.finished.borrow_mut() = Some(report.clone());
    }
}

#[derive(Debug)]
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for BarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarSink {
    fn update(&mut self, update: &ProgressUpdate) {
        self.bar.set_position(update.rounded_percent());
        self.bar.set_message(update.status.clone());
    }

    fn finish(&mut self, _report: &TimingReport) {
        self.bar.finish_with_message("Scan complete!");
    }
}
