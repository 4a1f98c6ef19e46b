pub mod admission;
pub mod job;
pub mod store;

pub use admission::{AdmissionController, ReconcileReport};
pub use job::{Job, JobRequest, JobState, JoinOutput, NewJob};
pub use store::{JobFilter, JobStore, JobUpdate};
