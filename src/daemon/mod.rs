pub mod client;
pub mod protocol;
pub mod server;

pub use client::{is_daemon_running, DaemonClient};
pub use protocol::{DaemonRequest, DaemonResponse, DaemonStatus, JobInfo, JobState};
pub use server::{run_daemon, JobRunner, PipelineJobRunner};
