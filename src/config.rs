use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MockGeError, Result};

/// Name of the state root created under the user's home directory.
pub const DEFAULT_STATE_DIR: &str = ".mockGE";

/// File name of the job database inside the state root.
pub const DATABASE_FILE: &str = "mockGE.sqlite";

/// Configuration for a mock Grid Engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of jobs running at once; further jobs stay queued
    pub max_jobs: usize,
    /// Time that must pass after a job ends before `qacct` reports it
    pub qacct_delay: Duration,
    /// Interpreter written into each supervision script's shebang
    pub shell: PathBuf,
    /// State root holding the database, scripts and exit-code files.
    /// `None` means `<home>/.mockGE`.
    pub database_dir: Option<PathBuf>,
    /// Queue label shown by qstat and qacct
    pub queue: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_jobs: 4,
            qacct_delay: Duration::from_secs(15),
            shell: PathBuf::from("/bin/bash"),
            database_dir: None,
            queue: "mock.q".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new(database_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_dir: Some(database_dir.into()),
            ..Default::default()
        }
    }

    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    pub fn with_qacct_delay(mut self, delay: Duration) -> Self {
        self.qacct_delay = delay;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Absolute path of the state root.
    ///
    /// Relative paths are resolved against the current directory.
    pub fn resolve_database_dir(&self) -> Result<PathBuf> {
        let dir = match &self.database_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .ok_or(MockGeError::NoHomeDir)?
                .join(DEFAULT_STATE_DIR),
        };
        Ok(std::path::absolute(dir)?)
    }
}
