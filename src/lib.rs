pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod report;
pub mod scheduler;
pub mod worker;

pub use engine::{MockGe, Submission};
pub use error::{MockGeError, Result};
