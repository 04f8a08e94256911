//! Usage log
//!
//! Append-only record of every activation, kept in SQLite. Rows are never
//! updated or deleted; the ranking lookback is applied when reading.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection};
use serde::Serialize;

const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Stored timestamp layout; lexical order equals chronological order
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS usage_log (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id   TEXT NOT NULL,
        timestamp   TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_usage_log_timestamp ON usage_log (timestamp);
";

/// Activation count for one entity at one time of day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageBucket {
    pub entity_id: String,
    pub time_of_day: NaiveTime,
    pub count: u64,
}

/// SQLite-backed activation log.
///
/// `rusqlite::Connection` is not `Sync`, so every access goes through the
/// mutex. Callers on the async runtime should use `spawn_blocking`.
pub struct UsageLog {
    conn: Mutex<Connection>,
}

impl UsageLog {
    /// Open (or create) the log at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening usage database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .context("setting database pragmas")?;

        log::info!("Usage log opened at {}", path.display());
        Self::with_schema(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("creating usage_log table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow!("usage log lock poisoned: {e}"))?;
        f(&conn)
    }

    /// Append an activation stamped with the local wall-clock time
    pub fn record(&self, entity_id: &str) -> Result<()> {
        self.record_at(entity_id, Local::now().naive_local())
    }

    pub fn record_at(&self, entity_id: &str, timestamp: NaiveDateTime) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO usage_log (entity_id, timestamp) VALUES (?1, ?2)",
                params![entity_id, timestamp.format(TIMESTAMP_FORMAT).to_string()],
            )
            .with_context(|| format!("recording activation of {entity_id}"))?;
            Ok(())
        })
    }

    /// Activations at or after `cutoff`, grouped by entity and time of day,
    /// most frequent first
    pub fn query_since(&self, cutoff: NaiveDateTime) -> Result<Vec<UsageBucket>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT entity_id, strftime('%H:%M:%S', timestamp) AS time_of_day, COUNT(*) AS count
                     FROM usage_log
                     WHERE timestamp >= ?1
                     GROUP BY entity_id, time_of_day
                     ORDER BY count DESC, entity_id, time_of_day",
                )
                .context("preparing usage query")?;

            let rows = stmt
                .query_map(
                    params![cutoff.format(TIMESTAMP_FORMAT).to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .context("querying usage")?;

            let mut buckets = Vec::new();
            for row in rows {
                let (entity_id, time_of_day, count) = row.context("reading usage row")?;
                let time_of_day = NaiveTime::parse_from_str(&time_of_day, "%H:%M:%S")
                    .with_context(|| format!("bad time of day {time_of_day:?} for {entity_id}"))?;
                buckets.push(UsageBucket {
                    entity_id,
                    time_of_day,
                    count: count as u64,
                });
            }
            Ok(buckets)
        })
    }

    /// Total number of recorded activations
    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM usage_log", [], |row| row.get(0))
                .context("counting usage rows")?;
            Ok(count as u64)
        })
    }
}

impl std::fmt::Debug for UsageLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLog").finish()
    }
}

/// Get the state directory path (for the usage database)
pub fn state_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::state_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("state").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine state directory"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_record_and_count() {
        let log = UsageLog::in_memory().unwrap();
        assert_eq!(log.count().unwrap(), 0);

        log.record("script.good_morning").unwrap();
        log.record("scene.movie").unwrap();
        assert_eq!(log.count().unwrap(), 2);
    }

    #[test]
    fn test_query_groups_by_entity_and_time_of_day() {
        let log = UsageLog::in_memory().unwrap();
        // Same clock time on different days lands in one bucket
        log.record_at("script.coffee", at(1, 7, 30, 0)).unwrap();
        log.record_at("script.coffee", at(2, 7, 30, 0)).unwrap();
        log.record_at("script.coffee", at(3, 7, 30, 0)).unwrap();
        log.record_at("script.coffee", at(3, 19, 0, 0)).unwrap();
        log.record_at("scene.night", at(2, 22, 15, 5)).unwrap();
        log.record_at("scene.night", at(3, 22, 15, 5)).unwrap();

        let buckets = log.query_since(at(1, 0, 0, 0)).unwrap();
        assert_eq!(buckets.len(), 3);

        assert_eq!(buckets[0].entity_id, "script.coffee");
        assert_eq!(buckets[0].time_of_day, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(buckets[0].count, 3);

        assert_eq!(buckets[1].entity_id, "scene.night");
        assert_eq!(buckets[1].count, 2);

        assert_eq!(buckets[2].count, 1);

        // Ordered by count descending
        assert!(buckets.windows(2).all(|w| w[0].count >= w[1].count));
    }

    #[test]
    fn test_query_counts_sum_to_events_after_cutoff() {
        let log = UsageLog::in_memory().unwrap();
        let events = [
            ("script.a", at(1, 8, 0, 0)),
            ("script.a", at(5, 8, 0, 0)),
            ("script.b", at(5, 9, 10, 0)),
            ("scene.c", at(6, 23, 59, 59)),
            ("script.a", at(7, 8, 0, 0)),
        ];
        for (entity_id, ts) in events {
            log.record_at(entity_id, ts).unwrap();
        }

        let cutoff = at(5, 8, 0, 0);
        let expected = events.iter().filter(|(_, ts)| *ts >= cutoff).count() as u64;
        let buckets = log.query_since(cutoff).unwrap();
        assert_eq!(buckets.iter().map(|b| b.count).sum::<u64>(), expected);

        let a_total: u64 = buckets
            .iter()
            .filter(|b| b.entity_id == "script.a")
            .map(|b| b.count)
            .sum();
        assert_eq!(a_total, 2);
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("usage.db");

        {
            let log = UsageLog::open(&path).unwrap();
            log.record("script.good_morning").unwrap();
        }

        let log = UsageLog::open(&path).unwrap();
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn test_state_dir() {
        let dir = state_dir().unwrap();
        assert!(dir.to_string_lossy().contains("launchpad"));
    }
}
