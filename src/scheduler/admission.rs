use crate::error::{MockGeError, Result};
use crate::scheduler::job::JobState;
use crate::scheduler::store::{JobFilter, JobStore, JobUpdate};
use crate::worker::{LivenessMonitor, ProcessLauncher};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub harvested: Vec<i64>,
    pub admitted: Vec<i64>,
    /// Launch errors for jobs that were skipped and left queued
    pub failed: Vec<MockGeError>,
}

impl ReconcileReport {
    /// True when no job changed state.
    pub fn is_empty(&self) -> bool {
        self.harvested.is_empty() && self.admitted.is_empty()
    }

    /// Launch error recorded for `job_id` during this pass, if any.
    pub fn take_failure(&mut self, job_id: i64) -> Option<MockGeError> {
        let at = self.failed.iter().position(
            |e| matches!(e, MockGeError::Launch { job_id: failed, .. } if *failed == job_id),
        )?;
        Some(self.failed.remove(at))
    }
}

/// Keeps the job store in step with the processes it describes and caps the
/// number of running jobs.
#[derive(Debug)]
pub struct AdmissionController {
    max_jobs: usize,
    launcher: ProcessLauncher,
    monitor: LivenessMonitor,
}

impl AdmissionController {
    pub fn new(max_jobs: usize, launcher: ProcessLauncher, monitor: LivenessMonitor) -> Self {
        Self {
            max_jobs,
            launcher,
            monitor,
        }
    }

    /// Harvest finished jobs, then admit queued ones.
    ///
    /// Running this again with no process having exited and nothing newly
    /// submitted changes nothing. A job that cannot be launched stays queued
    /// and is reported in [`ReconcileReport::failed`]; jobs behind it are
    /// still admitted.
    pub async fn reconcile(&mut self, store: &JobStore) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            harvested: self.harvest(store).await?,
            ..Default::default()
        };
        self.admit(store, &mut report).await?;
        if !report.is_empty() || !report.failed.is_empty() {
            tracing::debug!(
                harvested = ?report.harvested,
                admitted = ?report.admitted,
                failed = report.failed.len(),
                "Reconciled jobs"
            );
        }
        Ok(report)
    }

    /// Complete every running job whose process has exited.
    ///
    /// Artifacts are only removed once the store has the result.
    async fn harvest(&mut self, store: &JobStore) -> Result<Vec<i64>> {
        let running = store.list(&JobFilter::in_state(JobState::Running)).await?;
        let finished: Vec<_> = running
            .iter()
            .filter(|job| self.monitor.has_exited(job))
            .map(|job| job.id)
            .collect();

        for &job_id in &finished {
            let completion = self.monitor.completion(job_id).await;
            store
                .update(
                    job_id,
                    JobUpdate::Finished {
                        exit_code: completion.exit_code,
                        end_time: completion.end_time,
                    },
                )
                .await?;
            self.monitor.cleanup(job_id).await;
            tracing::info!(job_id, exit_code = completion.exit_code, "Job completed");
        }
        Ok(finished)
    }

    /// Start queued jobs in submission order until `max_jobs` are running.
    async fn admit(&mut self, store: &JobStore, report: &mut ReconcileReport) -> Result<()> {
        let mut running = store.count(JobState::Running).await?;
        if running >= self.max_jobs {
            return Ok(());
        }

        let queued = store.list(&JobFilter::in_state(JobState::Queued)).await?;
        for job in queued {
            if running >= self.max_jobs {
                break;
            }
            let launched = match self.launcher.launch(&job).await {
                Ok(launched) => launched,
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "Job could not be launched, leaving it queued");
                    report.failed.push(e);
                    continue;
                }
            };

            let started = JobUpdate::Started {
                pid: launched.pid,
                start_time: launched.start_time,
            };
            if let Err(e) = store.update(job.id, started).await {
                tracing::error!(job_id = job.id, error = %e, "Failed to record job start, stopping it");
                self.monitor.abandon(launched).await;
                return Err(e);
            }
            self.monitor.track(launched.job_id, launched.child);
            report.admitted.push(job.id);
            running += 1;
        }
        Ok(())
    }
}
