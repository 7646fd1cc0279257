pub mod job;
pub mod permit;
pub mod registry;
pub mod state;

pub use job::{Job, JobRecord, RunOutcome};
pub use permit::ExecutionPermit;
pub use registry::JobRegistry;
pub use state::JobState;
