pub mod catalog;
pub mod cli;
pub mod clock;
pub mod config;
pub mod display;
pub mod report;
pub mod simulate;
pub mod tracker;
pub mod util;

pub use catalog::{Catalog, StepDefinition, SubStepDefinition, SubStepRef, SCAN_STEP_ID};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use display::{ProgressSink, ProgressUpdate};
pub use report::{TimingReport, TimingSnapshot};
pub use tracker::{ProgressTracker, TrackerFault};
