use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::query::{self, Accounting, UserFilter};
use crate::scheduler::{AdmissionController, Job, JobRequest, JobStore, ReconcileReport};
use crate::worker::{JobArtifacts, LivenessMonitor, ProcessLauncher, ProcessProbe};

/// Acknowledgement for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: i64,
    pub name: String,
}

/// Mock Grid Engine: qsub, qstat and qacct over a local job store.
///
/// Every entry point first runs one reconciliation pass (harvest finished
/// jobs, then admit queued ones) so answers reflect the current state of the
/// spawned processes. Nothing runs in the background between calls.
///
/// One instance is assumed to drive a given state root at a time; separate
/// instances sharing a database are not coordinated.
#[derive(Debug)]
pub struct MockGe {
    config: EngineConfig,
    state_dir: PathBuf,
    user: String,
    store: JobStore,
    controller: AdmissionController,
}

impl MockGe {
    /// Open the state root named by `config`, creating it if needed.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let state_dir = config.resolve_database_dir()?;
        let artifacts = JobArtifacts::new(&state_dir);
        let monitor = LivenessMonitor::new(artifacts.clone());
        Self::open_with_monitor(config, state_dir, artifacts, monitor).await
    }

    /// Open with a custom probe for processes this instance did not spawn.
    pub async fn open_with_probe(
        config: EngineConfig,
        probe: impl ProcessProbe + 'static,
    ) -> Result<Self> {
        let state_dir = config.resolve_database_dir()?;
        let artifacts = JobArtifacts::new(&state_dir);
        let monitor = LivenessMonitor::with_probe(artifacts.clone(), probe);
        Self::open_with_monitor(config, state_dir, artifacts, monitor).await
    }

    async fn open_with_monitor(
        config: EngineConfig,
        state_dir: PathBuf,
        artifacts: JobArtifacts,
        monitor: LivenessMonitor,
    ) -> Result<Self> {
        let store = JobStore::open(&state_dir).await?;
        let launcher = ProcessLauncher::new(config.shell.clone(), artifacts);
        let controller = AdmissionController::new(config.max_jobs, launcher, monitor);
        tracing::debug!(
            state_dir = %state_dir.display(),
            max_jobs = config.max_jobs,
            qacct_delay = ?config.qacct_delay,
            "Opened mock Grid Engine"
        );
        Ok(Self {
            config,
            state_dir,
            user: current_user(),
            store,
            controller,
        })
    }

    /// Submit as a different user than the one running the process.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run one harvest-then-admit pass.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        self.controller.reconcile(&self.store).await
    }

    /// Queue a job (qsub). It starts straight away if a slot is free.
    ///
    /// If a slot was free but the job could not be launched, the launch error
    /// is returned; the job stays queued and is retried on later calls.
    pub async fn submit(&mut self, request: JobRequest) -> Result<Submission> {
        let new_job = request.into_new_job(&self.user, &self.config.queue)?;
        let job_id = self.store.create(&new_job, Utc::now()).await?;
        tracing::info!(job_id, name = %new_job.name, command = %new_job.command, "Job submitted");
        let mut report = self.reconcile().await?;
        if let Some(error) = report.take_failure(job_id) {
            return Err(error);
        }
        Ok(Submission {
            job_id,
            name: new_job.name,
        })
    }

    /// Queued and running jobs (qstat).
    pub async fn list(&mut self, users: &UserFilter) -> Result<Vec<Job>> {
        self.reconcile().await?;
        query::active_jobs(&self.store, users).await
    }

    /// Accounting record for a finished job (qacct).
    pub async fn accounting(&mut self, job_id: i64) -> Result<Accounting> {
        self.reconcile().await?;
        query::accounting(&self.store, job_id, self.config.qacct_delay, Utc::now()).await
    }

    /// Close the store connection. Running jobs keep running.
    pub async fn close(self) {
        self.store.close().await;
    }
}

/// Login name of the user running this process.
pub fn current_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}
