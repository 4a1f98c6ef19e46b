use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::config::DATABASE_FILE;
use crate::error::{MockGeError, Result};
use crate::scheduler::job::{Job, JobState, JoinOutput, NewJob};

const SELECT_JOBS: &str = "SELECT id, user, state, name, command, working_dir, output_name, \
     queue, join_output, pid, qsub_time, start_time, end_time, exit_code FROM jobs";

/// Selection applied by [`JobStore::list`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub exclude_state: Option<JobState>,
    pub user: Option<String>,
}

impl JobFilter {
    pub fn in_state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Jobs that have not completed yet.
    pub fn active() -> Self {
        Self {
            exclude_state: Some(JobState::Completed),
            ..Default::default()
        }
    }

    pub fn for_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// State change requested by the launcher or liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobUpdate {
    Started {
        pid: u32,
        start_time: DateTime<Utc>,
    },
    Finished {
        exit_code: i32,
        end_time: DateTime<Utc>,
    },
}

/// Durable job table backed by a single SQLite connection.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl JobStore {
    /// Open (or create) the job database inside `dir`, creating the
    /// directory and schema if they are missing.
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(DATABASE_FILE);
        tracing::debug!(path = %path.display(), "Opening job database");

        let opts = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool, path };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
              id          INTEGER PRIMARY KEY AUTOINCREMENT,
              user        TEXT NOT NULL,
              state       TEXT NOT NULL,
              name        TEXT NOT NULL,
              command     TEXT NOT NULL,
              working_dir TEXT NOT NULL,
              output_name TEXT NOT NULL DEFAULT '',
              queue       TEXT NOT NULL,
              join_output TEXT NOT NULL,
              pid         INTEGER,
              qsub_time   TEXT NOT NULL,
              start_time  TEXT,
              end_time    TEXT,
              exit_code   INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a queued job and return its id.
    pub async fn create(&self, job: &NewJob, qsub_time: DateTime<Utc>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO jobs (user, state, name, command, working_dir, output_name, queue, \
             join_output, qsub_time) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.user)
        .bind(JobState::Queued.code())
        .bind(&job.name)
        .bind(&job.command)
        .bind(job.working_dir.to_string_lossy().into_owned())
        .bind(&job.output_name)
        .bind(&job.queue)
        .bind(job.join_output.code())
        .bind(qsub_time)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("{SELECT_JOBS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Jobs matching `filter`, in submission order.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_JOBS);
        qb.push(" WHERE 1 = 1");
        if let Some(state) = filter.state {
            qb.push(" AND state = ").push_bind(state.code());
        }
        if let Some(state) = filter.exclude_state {
            qb.push(" AND state != ").push_bind(state.code());
        }
        if let Some(user) = &filter.user {
            qb.push(" AND user = ").push_bind(user.clone());
        }
        qb.push(" ORDER BY id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    pub async fn count(&self, state: JobState) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = ?")
            .bind(state.code())
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// The earliest submitted job still waiting to run.
    pub async fn next_queued(&self) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("{SELECT_JOBS} WHERE state = ? ORDER BY id LIMIT 1"))
            .bind(JobState::Queued.code())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Apply a state change in a single statement.
    ///
    /// The statement only matches a row in the preceding state, so a job can
    /// never skip or reverse a transition.
    pub async fn update(&self, id: i64, update: JobUpdate) -> Result<()> {
        let (result, to) = match update {
            JobUpdate::Started { pid, start_time } => (
                sqlx::query(
                    "UPDATE jobs SET state = ?, pid = ?, start_time = ? WHERE id = ? AND state = ?",
                )
                .bind(JobState::Running.code())
                .bind(i64::from(pid))
                .bind(start_time)
                .bind(id)
                .bind(JobState::Queued.code())
                .execute(&self.pool)
                .await?,
                JobState::Running,
            ),
            JobUpdate::Finished {
                exit_code,
                end_time,
            } => (
                sqlx::query(
                    "UPDATE jobs SET state = ?, exit_code = ?, end_time = ? WHERE id = ? AND state = ?",
                )
                .bind(JobState::Completed.code())
                .bind(exit_code)
                .bind(end_time)
                .bind(id)
                .bind(JobState::Running.code())
                .execute(&self.pool)
                .await?,
                JobState::Completed,
            ),
        };

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(_) => Err(MockGeError::InvalidTransition { job_id: id, to }),
                None => Err(MockGeError::JobNotFound(id)),
            };
        }
        tracing::debug!(job_id = id, state = %to, "Job updated");
        Ok(())
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let state: String = row.try_get("state")?;
    let state = state
        .parse::<JobState>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    let join_output: String = row.try_get("join_output")?;
    let working_dir: String = row.try_get("working_dir")?;
    let pid: Option<i64> = row.try_get("pid")?;

    Ok(Job {
        id: row.try_get("id")?,
        user: row.try_get("user")?,
        state,
        name: row.try_get("name")?,
        command: row.try_get("command")?,
        working_dir: PathBuf::from(working_dir),
        output_name: row.try_get("output_name")?,
        queue: row.try_get("queue")?,
        join_output: JoinOutput::from_code(&join_output),
        pid: pid.and_then(|p| u32::try_from(p).ok()),
        qsub_time: row.try_get("qsub_time")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        exit_code: row.try_get("exit_code")?,
    })
}
