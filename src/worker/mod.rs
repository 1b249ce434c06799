//! Per-task execution machinery.
//!
//! Everything needed to take one claimed task from spawn to resolution:
//! - **Execution**: spawns the task script in its own process group and
//!   captures its output
//! - **Watchdog**: interrupts, terminates and finally kills a process group
//!   that outlives the configured timeout
//! - **Heartbeat**: reclaims the task lease until the queue says the run is
//!   no longer ours
//! - **Artifacts**: uploads output files and logs with retry
//! - **Report**: resolves the run as completed or failed
//!
//! # Execution Flow
//!
//! 1. [`LeaseKeeper`] starts reclaiming in the background
//! 2. [`run_task`](executor::run_task) spawns the script and drains its output
//! 3. [`ArtifactUploader::upload_all`] publishes `artifact_dir` and the logs
//! 4. [`complete_task`](report::complete_task) reports the exit status
//! 5. The lease keeper is stopped and joined
//!
//! [`TaskRunner`](crate::runner::TaskRunner) wires these steps together.

pub mod artifacts;
pub mod executor;
pub mod heartbeat;
pub mod output;
pub mod report;
pub mod watchdog;

pub use artifacts::{ArtifactDescriptor, ArtifactUploader, UploadReport};
pub use executor::{run_task, ExitOutcome, Termination};
pub use heartbeat::{LeaseHandle, LeaseKeeper};
pub use report::{complete_task, ReportStatus, Resolution};
