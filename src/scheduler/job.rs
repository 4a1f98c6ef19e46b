use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MockGeError, Result};

/// Lifecycle state of a job, stored using the Grid Engine state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
}

impl JobState {
    /// Code stored in the database and shown in the qstat `state` column.
    pub fn code(&self) -> &'static str {
        match self {
            JobState::Queued => "qw",
            JobState::Running => "r",
            JobState::Completed => "c",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(code: &str) -> std::result::Result<Self, Self::Err> {
        match code {
            "qw" => Ok(JobState::Queued),
            "r" => Ok(JobState::Running),
            "c" => Ok(JobState::Completed),
            other => Err(format!("unknown job state code '{other}'")),
        }
    }
}

/// Whether stderr is merged into the stdout file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinOutput {
    Yes,
    #[default]
    No,
}

impl JoinOutput {
    pub fn code(&self) -> &'static str {
        match self {
            JoinOutput::Yes => "y",
            JoinOutput::No => "n",
        }
    }

    pub fn from_code(code: &str) -> Self {
        if code == "y" {
            JoinOutput::Yes
        } else {
            JoinOutput::No
        }
    }
}

impl From<bool> for JoinOutput {
    fn from(join: bool) -> Self {
        if join {
            JoinOutput::Yes
        } else {
            JoinOutput::No
        }
    }
}

/// A job record as held by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub user: String,
    pub state: JobState,
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    pub output_name: String,
    pub queue: String,
    pub join_output: JoinOutput,
    pub pid: Option<u32>,
    pub qsub_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl Job {
    /// Time shown by qstat: start time once running, submit time before that.
    pub fn submit_or_start_time(&self) -> DateTime<Utc> {
        self.start_time.unwrap_or(self.qsub_time)
    }

    /// Base path for the job's `.o<id>` and `.e<id>` files.
    ///
    /// A relative output name is taken from the working directory, and an
    /// output name that points at an existing directory gets the job name
    /// appended.
    pub fn output_base(&self) -> PathBuf {
        if self.output_name.is_empty() {
            return self.working_dir.join(&self.name);
        }
        let out = self.working_dir.join(&self.output_name);
        if out.is_dir() {
            out.join(&self.name)
        } else {
            out
        }
    }

    pub fn stdout_path(&self) -> PathBuf {
        suffixed(&self.output_base(), &format!(".o{}", self.id))
    }

    pub fn stderr_path(&self) -> PathBuf {
        suffixed(&self.output_base(), &format!(".e{}", self.id))
    }
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// A submission as received from qsub.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    /// Job name (`-N`); defaults to the first command token
    pub name: Option<String>,
    /// Working directory (`-wd`); defaults to the current directory
    pub working_dir: Option<PathBuf>,
    /// Output base path or directory (`-o`)
    pub output_path: Option<String>,
    /// Merge stderr into stdout (`-j y`)
    pub join_output: bool,
    pub command: Vec<String>,
}

impl JobRequest {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_join_output(mut self, join: bool) -> Self {
        self.join_output = join;
        self
    }

    /// Command tokens; a single argument is split on spaces.
    fn tokens(&self) -> Vec<String> {
        match self.command.as_slice() {
            [single] => single.split(' ').map(str::to_string).collect(),
            many => many.to_vec(),
        }
    }

    /// Resolve defaults and build the record to insert.
    pub fn into_new_job(self, user: &str, queue: &str) -> Result<NewJob> {
        let tokens = self.tokens();
        let first = tokens
            .first()
            .filter(|t| !t.is_empty())
            .ok_or(MockGeError::EmptyCommand)?;
        let name = match &self.name {
            Some(name) => name.clone(),
            None => first.split(' ').next().unwrap_or(first).to_string(),
        };
        let working_dir = match &self.working_dir {
            Some(dir) => std::path::absolute(dir)?,
            None => std::env::current_dir()?,
        };
        Ok(NewJob {
            user: user.to_string(),
            name,
            command: shell_join(&tokens),
            working_dir,
            output_name: self.output_path.unwrap_or_default(),
            queue: queue.to_string(),
            join_output: self.join_output.into(),
        })
    }
}

/// Join tokens into a command line, double-quoting tokens that contain spaces.
pub fn shell_join<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|t| {
            let t = t.as_ref();
            if t.contains(' ') {
                format!("\"{t}\"")
            } else {
                t.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fields supplied when a job is first inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub user: String,
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    pub output_name: String,
    pub queue: String,
    pub join_output: JoinOutput,
}
