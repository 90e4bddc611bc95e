//! Background execution of automation jobs.
//!
//! Submitted job ids go into a bounded queue drained by a fixed pool of
//! workers:
//! - **Dispatch**: [`Dispatcher`] owns the queue and the worker tasks
//! - **Execution**: [`JobExecutor`] takes one job from inputs to a recorded
//!   terminal status
//!
//! # Execution Flow
//!
//! 1. A worker receives a job id from the queue
//! 2. [`JobExecutor::execute`] claims the job (QUEUED → RUNNING)
//! 3. Input sheets are read, a portal session is opened and the engine runs
//! 4. Both failure reports are written, then the job becomes COMPLETED
//!
//! Any failure along the way leaves the job FAILED with its error message
//! and without outputs.

pub mod dispatcher;
pub mod executor;

pub use dispatcher::{DispatchHandle, Dispatcher};
pub use executor::{ExecutionResult, JobExecutor};
