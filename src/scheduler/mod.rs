pub mod job;
pub mod store;

pub use job::{Job, JobOutputs, JobSpec, JobStatus, JobStatusView, JobUpdate, OutputSlot, TokenView};
pub use store::JobStore;
