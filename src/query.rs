//! Read-only views over the job store used by qstat and qacct.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::scheduler::{Job, JobFilter, JobState, JobStore};

/// Which users' jobs qstat shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFilter {
    All,
    User(String),
}

impl UserFilter {
    /// `*` (or the shell-escaped `\*`) selects every user.
    pub fn parse(user: &str) -> Self {
        match user {
            "*" | "\\*" => UserFilter::All,
            name => UserFilter::User(name.to_string()),
        }
    }
}

/// Result of an accounting lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Accounting {
    /// Unknown job, or one that has not completed yet
    Unavailable,
    /// Completed, but the accounting delay has not elapsed
    Pending { remaining: Duration },
    Ready { job: Job },
}

/// Jobs that are queued or running, in submission order.
pub async fn active_jobs(store: &JobStore, users: &UserFilter) -> Result<Vec<Job>> {
    let filter = match users {
        UserFilter::All => JobFilter::active(),
        UserFilter::User(name) => JobFilter::active().for_user(name.clone()),
    };
    store.list(&filter).await
}

/// Accounting record for `job_id`, withheld until `delay` has passed since
/// the job ended.
pub async fn accounting(
    store: &JobStore,
    job_id: i64,
    delay: Duration,
    now: DateTime<Utc>,
) -> Result<Accounting> {
    let job = store
        .get(job_id)
        .await?
        .filter(|job| job.state == JobState::Completed);
    Ok(disclose(job, delay, now))
}

/// Apply the accounting delay to a completed job.
pub fn disclose(job: Option<Job>, delay: Duration, now: DateTime<Utc>) -> Accounting {
    let Some(job) = job else {
        return Accounting::Unavailable;
    };
    let Some(end_time) = job.end_time else {
        return Accounting::Unavailable;
    };
    let elapsed = (now - end_time).to_std().unwrap_or_default();
    if elapsed < delay {
        tracing::debug!(job_id = job.id, ?elapsed, "Accounting not yet available");
        return Accounting::Pending {
            remaining: delay - elapsed,
        };
    }
    Accounting::Ready { job }
}
