//! Process supervision for admitted jobs.
//!
//! - **Launching**: [`ProcessLauncher`] turns a queued job into a child process
//!   running a small supervision script
//! - **Liveness**: [`LivenessMonitor`] notices when that process is gone and
//!   collects the exit status the script left behind
//!
//! # Artifacts
//!
//! While a job runs, the state root holds `__job<id>.sh` (the script) and,
//! once the command returns, `__exit_code.<id>` (its exit status). Both are
//! removed when the job is harvested.

pub mod launcher;
pub mod liveness;

pub use launcher::{JobArtifacts, LaunchedJob, ProcessLauncher};
pub use liveness::{Completion, LivenessMonitor, ProcessProbe, SignalProbe};
