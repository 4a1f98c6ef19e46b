use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::process::{Child, Command};

use crate::error::{MockGeError, Result};
use crate::scheduler::{Job, JoinOutput};

/// Locations of the per-job files kept in the state root while a job runs.
#[derive(Debug, Clone)]
pub struct JobArtifacts {
    root: PathBuf,
}

impl JobArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Supervision script wrapping the job's command.
    pub fn script(&self, job_id: i64) -> PathBuf {
        self.root.join(format!("__job{job_id}.sh"))
    }

    /// Sentinel file the script writes the command's exit status to.
    pub fn exit_code(&self, job_id: i64) -> PathBuf {
        self.root.join(format!("__exit_code.{job_id}"))
    }
}

/// A job whose supervision script has been spawned.
#[derive(Debug)]
pub struct LaunchedJob {
    pub job_id: i64,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub child: Child,
}

/// Starts queued jobs as supervised child processes.
///
/// Each job runs inside a small script that executes the command under the
/// configured shell and then records `$?` in the job's sentinel file. Output
/// goes to `<base>.o<id>` and, unless joined, `<base>.e<id>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    shell: PathBuf,
    artifacts: JobArtifacts,
}

impl ProcessLauncher {
    pub fn new(shell: impl Into<PathBuf>, artifacts: JobArtifacts) -> Self {
        Self {
            shell: shell.into(),
            artifacts,
        }
    }

    /// Text of the supervision script for `job`.
    pub fn script_contents(&self, job: &Job) -> String {
        format!(
            "#!{shell}\n{command}\nexit_code=$?\necho \"$exit_code\" > \"{sentinel}\"\n",
            shell = self.shell.display(),
            command = job.command,
            sentinel = self.artifacts.exit_code(job.id).display(),
        )
    }

    /// Spawn the supervision script for a queued job.
    ///
    /// The script runs as the leader of its own process group so that the
    /// whole job can be signalled at once. The caller records the returned
    /// pid and start time in the store.
    pub async fn launch(&self, job: &Job) -> Result<LaunchedJob> {
        let fail = |source: std::io::Error| MockGeError::Launch {
            job_id: job.id,
            source,
        };

        let stdout_path = job.stdout_path();
        let stdout = File::create(&stdout_path).await.map_err(fail)?.into_std().await;
        let stderr = match job.join_output {
            JoinOutput::Yes => stdout.try_clone().map_err(fail)?,
            JoinOutput::No => File::create(job.stderr_path())
                .await
                .map_err(fail)?
                .into_std()
                .await,
        };
        tracing::debug!(job_id = job.id, stdout = %stdout_path.display(), join = ?job.join_output, "Output files opened");

        let script = self.artifacts.script(job.id);
        fs::write(&script, self.script_contents(job))
            .await
            .map_err(fail)?;
        fs::set_permissions(&script, Permissions::from_mode(0o775))
            .await
            .map_err(fail)?;

        // Exec'ing a file that was just written races with forks on other
        // threads (ETXTBSY), so the interpreter reads it instead.
        let spawned = Command::new(&self.shell)
            .arg(&script)
            .current_dir(&job.working_dir)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Failed to spawn job");
                if let Err(e) = fs::remove_file(&script).await {
                    tracing::warn!(job_id = job.id, error = %e, "Failed to remove job script");
                }
                return Err(fail(e));
            }
        };
        let pid = child.id().ok_or_else(|| {
            fail(std::io::Error::other("child exited before its pid was read"))
        })?;
        let start_time = Utc::now();

        tracing::info!(job_id = job.id, pid, command = %job.command, "Job started");

        Ok(LaunchedJob {
            job_id: job.id,
            pid,
            start_time,
            child,
        })
    }
}
