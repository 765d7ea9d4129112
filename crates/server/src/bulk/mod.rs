//! Background bulk product imports.
//!
//! - [`types`]: job records, row failures, progress events
//! - [`registry`]: shared in-memory job registry
//! - [`persister`]: batched writes with per-row failure accounting
//! - [`runner`]: execution unit + supervisor per upload

pub mod persister;
pub mod registry;
pub mod runner;
pub mod types;

pub use registry::{CancelOutcome, JobRegistry};
pub use runner::{JobRunner, Upload};
pub use types::{JobPage, JobStatus, JobSummary};
