//! SQLite persistence for scheduled jobs.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::error::SchedulerResult;

/// A persisted scheduled job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Job id, e.g. `reminder_3fa9c1d2`.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// `date`, `cron`, or `interval`.
    pub trigger_type: String,
    /// Trigger arguments (JSON object).
    pub trigger_args: Value,
    /// `notification`, `assistant`, or `workflow`.
    pub job_type: String,
    /// Job arguments (JSON object).
    pub job_args: Value,
}

/// Durable store for scheduled job metadata, one row per job.
///
/// The store is the source of truth; in-memory timer state is derived from
/// it at startup. Writes are serialised by the connection lock.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open (creating if needed) the job database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// An in-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be created.
    pub fn in_memory() -> SchedulerResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SchedulerResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                trigger_args TEXT NOT NULL,
                job_type TEXT NOT NULL,
                job_args TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Upsert a job. Idempotent by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save(&self, job: &JobRecord) -> SchedulerResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO jobs
                (id, description, trigger_type, trigger_args, job_type, job_args)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                job.id,
                job.description,
                job.trigger_type,
                job.trigger_args.to_string(),
                job.job_type,
                job.job_args.to_string(),
            ],
        )?;
        debug!(job = %job.id, "persisted job");
        Ok(())
    }

    /// Load every persisted job.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_all(&self) -> SchedulerResult<Vec<JobRecord>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, description, trigger_type, trigger_args, job_type, job_args
             FROM jobs ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(JobRecord {
                id: row.get(0)?,
                description: row.get(1)?,
                trigger_type: row.get(2)?,
                trigger_args: parse_json(&row.get::<_, String>(3)?),
                job_type: row.get(4)?,
                job_args: parse_json(&row.get::<_, String>(5)?),
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    /// Get one job by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, job_id: &str) -> SchedulerResult<Option<JobRecord>> {
        Ok(self.load_all()?.into_iter().find(|j| j.id == job_id))
    }

    /// Delete a job. Returns `true` if a row was removed.
    pub fn delete(&self, job_id: &str) -> bool {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute("DELETE FROM jobs WHERE id = ?1", [job_id])
            .map(|changed| changed > 0)
            .unwrap_or(false)
    }

    /// Delete one-shot (date trigger) jobs whose run date has passed.
    /// Returns the number pruned.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails.
    pub fn prune_expired(&self) -> SchedulerResult<usize> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .load_all()?
            .into_iter()
            .filter(|j| j.trigger_type == "date")
            .filter(|j| {
                j.trigger_args
                    .get("run_date")
                    .and_then(Value::as_str)
                    .and_then(parse_run_date)
                    .is_some_and(|run_date| run_date < now)
            })
            .map(|j| j.id)
            .collect();

        let count = expired.len();
        for id in expired {
            self.delete(&id);
        }
        Ok(count)
    }
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore").finish_non_exhaustive()
    }
}

fn parse_json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or(Value::Null)
}

/// Parse an ISO run date; naive timestamps are taken as UTC.
pub(crate) fn parse_run_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reminder(id: &str, run_date: &str) -> JobRecord {
        JobRecord {
            id: id.to_string(),
            description: "D".to_string(),
            trigger_type: "date".to_string(),
            trigger_args: json!({"run_date": run_date}),
            job_type: "notification".to_string(),
            job_args: json!({"message": "hi"}),
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let store = JobStore::in_memory().unwrap();
        let job = reminder("reminder_abc12345", "2099-01-01T09:00:00");
        store.save(&job).unwrap();

        let jobs = store.load_all().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0], job);
    }

    #[test]
    fn test_save_is_idempotent_by_id() {
        let store = JobStore::in_memory().unwrap();
        let mut job = reminder("reminder_abc12345", "2099-01-01T09:00:00");
        store.save(&job).unwrap();
        job.description = "updated".to_string();
        store.save(&job).unwrap();

        let jobs = store.load_all().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].description, "updated");
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("scheduler.db");

        {
            let store = JobStore::open(&path).unwrap();
            store
                .save(&reminder("reminder_restart1", "2099-01-01T09:00:00"))
                .unwrap();
        }

        let store = JobStore::open(&path).unwrap();
        let jobs = store.load_all().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "reminder_restart1");
        assert_eq!(jobs[0].job_args["message"], "hi");
    }

    #[test]
    fn test_delete() {
        let store = JobStore::in_memory().unwrap();
        store
            .save(&reminder("reminder_del", "2099-01-01T09:00:00"))
            .unwrap();
        assert!(store.delete("reminder_del"));
        assert!(!store.delete("reminder_del"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_prune_expired_removes_past_dates_only() {
        let store = JobStore::in_memory().unwrap();
        store
            .save(&reminder("reminder_past", "2001-01-01T09:00:00"))
            .unwrap();
        store
            .save(&reminder("reminder_future", "2099-01-01T09:00:00"))
            .unwrap();
        // Interval jobs are never pruned.
        store
            .save(&JobRecord {
                id: "assistant_interval".to_string(),
                description: "tick".to_string(),
                trigger_type: "interval".to_string(),
                trigger_args: json!({"minutes": 5}),
                job_type: "assistant".to_string(),
                job_args: json!({"prompt": "check in", "session_id": "scheduler"}),
            })
            .unwrap();

        assert_eq!(store.prune_expired().unwrap(), 1);
        let ids: Vec<String> = store.load_all().unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["assistant_interval", "reminder_future"]);
    }

    #[test]
    fn test_parse_run_date_variants() {
        assert!(parse_run_date("2099-01-01T09:00:00").is_some());
        assert!(parse_run_date("2099-01-01T09:00:00Z").is_some());
        assert!(parse_run_date("2099-01-01T09:00:00+02:00").is_some());
        assert!(parse_run_date("tomorrow").is_none());
    }
}
