use thiserror::Error;

use crate::scheduler::JobState;

#[derive(Error, Debug)]
pub enum MockGeError {
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to launch job {job_id}: {source}")]
    Launch {
        job_id: i64,
        #[source]
        source: std::io::Error,
    },

    #[error("Job {job_id} cannot move to state {to}")]
    InvalidTransition { job_id: i64, to: JobState },

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("No command supplied")]
    EmptyCommand,

    #[error("Could not determine the home directory")]
    NoHomeDir,
}

pub type Result<T> = std::result::Result<T, MockGeError>;
