use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio::fs;
use tokio::process::Child;

use crate::scheduler::Job;
use crate::worker::launcher::{JobArtifacts, LaunchedJob};

/// Exit code recorded when a job left no sentinel file behind.
pub const MISSING_EXIT_CODE: i32 = 1;

/// Answers whether a process id still refers to a live process.
pub trait ProcessProbe: std::fmt::Debug + Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probes a pid by sending it signal 0, which checks for existence without
/// delivering anything.
///
/// Any failure, including a permission error, counts as "not alive". If the
/// OS has already reused the pid for an unrelated process the job is reported
/// as still running; this is a known false negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        kill(Pid::from_raw(raw), None).is_ok()
    }
}

/// Final values for a harvested job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Completion {
    pub exit_code: i32,
    pub end_time: DateTime<Utc>,
}

/// Detects finished jobs and collects their exit status.
///
/// Children spawned by this instance are polled through their handles, which
/// also reaps them. Jobs started by an earlier instance have only a pid and
/// fall back to the [`ProcessProbe`].
#[derive(Debug)]
pub struct LivenessMonitor {
    artifacts: JobArtifacts,
    probe: Box<dyn ProcessProbe>,
    children: HashMap<i64, Child>,
}

impl LivenessMonitor {
    pub fn new(artifacts: JobArtifacts) -> Self {
        Self::with_probe(artifacts, SignalProbe)
    }

    pub fn with_probe(artifacts: JobArtifacts, probe: impl ProcessProbe + 'static) -> Self {
        Self {
            artifacts,
            probe: Box::new(probe),
            children: HashMap::new(),
        }
    }

    /// Keep the handle of a child spawned for `job_id`.
    pub fn track(&mut self, job_id: i64, child: Child) {
        self.children.insert(job_id, child);
    }

    /// Non-blocking check of whether a running job's process has gone.
    pub fn has_exited(&mut self, job: &Job) -> bool {
        if let Some(child) = self.children.get_mut(&job.id) {
            return match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(job_id = job.id, %status, "Child exited");
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "Failed to poll child");
                    true
                }
            };
        }

        match job.pid {
            Some(pid) => {
                let alive = self.probe.is_alive(pid);
                tracing::debug!(job_id = job.id, pid, alive, "Probed job process");
                !alive
            }
            None => true,
        }
    }

    /// Exit status of a finished job, read from its sentinel file.
    ///
    /// Leaves the sentinel in place, so it can be read again if recording the
    /// result fails. A missing or unreadable sentinel yields
    /// [`MISSING_EXIT_CODE`] and the current time.
    pub async fn completion(&self, job_id: i64) -> Completion {
        let sentinel = self.artifacts.exit_code(job_id);
        match read_sentinel(&sentinel).await {
            Ok(completion) => completion,
            Err(e) => {
                tracing::error!(job_id, path = %sentinel.display(), error = %e, "Missing __exit_code file for job");
                Completion {
                    exit_code: MISSING_EXIT_CODE,
                    end_time: Utc::now(),
                }
            }
        }
    }

    /// Forget a harvested job and delete its script and sentinel.
    pub async fn cleanup(&mut self, job_id: i64) {
        self.children.remove(&job_id);
        for path in [self.artifacts.script(job_id), self.artifacts.exit_code(job_id)] {
            if let Err(e) = remove_if_exists(&path).await {
                tracing::warn!(job_id, path = %path.display(), error = %e, "Failed to remove job artifact");
            }
        }
    }

    /// Stop a job that was spawned but could not be recorded as running.
    ///
    /// Kills the job's whole process group, reaps the script and removes its
    /// artifacts so a later launch starts from a clean slate.
    pub async fn abandon(&mut self, launched: LaunchedJob) {
        let LaunchedJob {
            job_id,
            pid,
            mut child,
            ..
        } = launched;
        if let Ok(raw) = i32::try_from(pid) {
            if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                tracing::warn!(job_id, pid, error = %e, "Failed to signal job process group");
            }
        }
        let _ = child.start_kill();
        if let Err(e) = child.wait().await {
            tracing::warn!(job_id, pid, error = %e, "Failed to reap job script");
        }
        self.cleanup(job_id).await;
    }
}

async fn read_sentinel(path: &Path) -> std::io::Result<Completion> {
    let metadata = fs::metadata(path).await?;
    let contents = fs::read_to_string(path).await?;
    let exit_code = contents
        .trim()
        .parse::<i32>()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let ctime_nsec = u32::try_from(metadata.ctime_nsec()).unwrap_or_default();
    let end_time = DateTime::from_timestamp(metadata.ctime(), ctime_nsec).unwrap_or_else(Utc::now);
    Ok(Completion {
        exit_code,
        end_time,
    })
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
