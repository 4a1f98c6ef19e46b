//! Text rendered by the qsub, qstat and qacct commands.

use chrono::{DateTime, Local, Utc};

use crate::engine::Submission;
use crate::scheduler::Job;

pub const QSTAT_HEADER: &str = "job-ID  prior   name       user         state submit/start at     queue                          slots ja-task-ID";

const QSTAT_RULE_WIDTH: usize = 113;
const QACCT_RULE_WIDTH: usize = 62;

/// Line printed by qsub.
pub fn submitted(submission: &Submission) -> String {
    format!(
        "Your job {} (\"{}\") has been submitted",
        submission.job_id, submission.name
    )
}

/// Message written to stderr by qacct for an unknown job.
pub fn job_not_found(job_id: i64) -> String {
    format!("error: job id {job_id} not found")
}

/// qstat output; empty when there are no jobs.
pub fn qstat_table(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    out.push_str(QSTAT_HEADER);
    out.push('\n');
    out.push_str(&"-".repeat(QSTAT_RULE_WIDTH));
    out.push('\n');
    for job in jobs {
        out.push_str(&qstat_row(job));
        out.push('\n');
    }
    out
}

/// One fixed-width qstat line. Fields longer than their column are cut.
pub fn qstat_row(job: &Job) -> String {
    format!(
        "{:<7.7} 0.00001 {:<10.10} {:<12.12} {:<5.5} {} {:<30.30} 1",
        job.id.to_string(),
        job.name,
        job.user,
        job.state.code(),
        local_time(job.submit_or_start_time(), "%m/%d/%Y %H:%M:%S"),
        job.queue,
    )
}

/// qacct block for a completed job.
pub fn qacct_block(job: &Job) -> String {
    let time = |t: Option<DateTime<Utc>>| {
        t.map(|t| local_time(t, "%c"))
            .unwrap_or_else(|| "-/-".to_string())
    };
    let exit_status = job
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_default();

    // (key, value, trailing padding) as Grid Engine prints them
    let fields = [
        ("qname", job.queue.clone(), 2_usize),
        ("hostname", "node001".to_string(), 0),
        ("group", "mygroup".to_string(), 15),
        ("owner", job.user.clone(), 12),
        ("project", "NONE".to_string(), 16),
        ("department", "defaultdepartment".to_string(), 3),
        ("jobname", job.name.clone(), 16),
        ("jobnumber", job.id.to_string(), 13),
        ("taskid", "undefined".to_string(), 0),
        ("account", "sge".to_string(), 17),
        ("priority", "0".to_string(), 19),
        ("qsub_time", local_time(job.qsub_time, "%c"), 0),
        ("start_time", time(job.start_time), 0),
        ("end_time", time(job.end_time), 0),
        ("granted_pe", "NONE".to_string(), 16),
        ("slots", "1".to_string(), 19),
        ("failed", "0".to_string(), 4),
        ("exit_status", exit_status, 0),
    ];

    let mut out = "=".repeat(QACCT_RULE_WIDTH);
    out.push('\n');
    for (key, value, pad) in fields {
        out.push_str(&format!("{key:<13}{value}{:pad$}\n", ""));
    }
    out
}

fn local_time(t: DateTime<Utc>, format: &str) -> String {
    t.with_timezone(&Local).format(format).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobState, JoinOutput};
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn job() -> Job {
        let qsub = Utc.with_ymd_and_hms(2018, 7, 16, 15, 56, 45).unwrap();
        Job {
            id: 1162479,
            user: "user1".to_string(),
            state: JobState::Running,
            name: "echo".to_string(),
            command: "echo hello".to_string(),
            working_dir: PathBuf::from("/tmp"),
            output_name: String::new(),
            queue: "mock.q".to_string(),
            join_output: JoinOutput::No,
            pid: Some(100),
            qsub_time: qsub,
            start_time: Some(qsub + chrono::Duration::seconds(1)),
            end_time: None,
            exit_code: None,
        }
    }

    #[test]
    fn test_submitted_message() {
        let submission = Submission {
            job_id: 12,
            name: "echo".to_string(),
        };
        assert_eq!(
            submitted(&submission),
            "Your job 12 (\"echo\") has been submitted"
        );
    }

    #[test]
    fn test_job_not_found_message() {
        assert_eq!(job_not_found(99), "error: job id 99 not found");
    }

    #[test]
    fn test_qstat_table_empty() {
        assert_eq!(qstat_table(&[]), "");
    }

    #[test]
    fn test_qstat_table_layout() {
        let job = job();
        let table = qstat_table(std::slice::from_ref(&job));
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], QSTAT_HEADER);
        assert_eq!(lines[1], "-".repeat(113));

        let start = job
            .start_time
            .unwrap()
            .with_timezone(&Local)
            .format("%m/%d/%Y %H:%M:%S")
            .to_string();
        let expected = format!(
            "1162479 0.00001 echo       user1        r     {start} mock.q                         1"
        );
        assert_eq!(lines[2], expected);
    }

    #[test]
    fn test_qstat_row_truncates_long_fields() {
        let mut job = job();
        job.id = 123456789;
        job.name = "a_very_long_job_name".to_string();
        job.user = "someone_with_a_long_name".to_string();
        job.state = JobState::Queued;
        job.start_time = None;

        let row = qstat_row(&job);
        let submitted = job
            .qsub_time
            .with_timezone(&Local)
            .format("%m/%d/%Y %H:%M:%S")
            .to_string();
        assert!(row.starts_with("1234567 0.00001 a_very_lon someone_with qw    "));
        assert!(row.contains(&submitted));
    }

    #[test]
    fn test_qacct_block() {
        let mut job = job();
        job.state = JobState::Completed;
        job.end_time = Some(job.qsub_time + chrono::Duration::seconds(2));
        job.exit_code = Some(3);

        let block = qacct_block(&job);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], "=".repeat(62));
        assert_eq!(lines[1], "qname        mock.q  ");
        assert_eq!(lines[2], "hostname     node001");
        assert_eq!(lines[3], "group        mygroup               ");
        assert!(lines.contains(&"owner        user1            "));
        assert!(lines.contains(&"jobname      echo                "));
        assert!(lines.contains(&"jobnumber    1162479             "));
        assert!(lines.contains(&"failed       0    "));
        assert_eq!(*lines.last().unwrap(), "exit_status  3");

        let end = job
            .end_time
            .unwrap()
            .with_timezone(&Local)
            .format("%c")
            .to_string();
        assert!(lines.contains(&format!("end_time     {end}").as_str()));
    }
}
