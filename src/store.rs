use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::error::Result;
use crate::history::{AggregateStatistics, RunSummary};
use crate::timeline::{ActivityRecord, TimelineState};

/// Bumped whenever the table layout changes; `migrate` upgrades older files.
pub const SCHEMA_VERSION: i64 = 2;

/// The in-flight run as written by the persistence tick.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InflightSnapshot {
    pub key: ActivityRecord,
    pub timeline: TimelineState,
    pub saved_at: f64,
}

/// Durable storage for history, statistics and the crash-recovery snapshot.
pub trait RunStore {
    fn load_stats(&self) -> Result<AggregateStatistics>;
    /// Runs oldest first, at most `limit` of the newest.
    fn load_history(&self, limit: usize) -> Result<Vec<RunSummary>>;
    /// Append a run and store the new aggregate in one step, dropping
    /// history beyond `limit`.
    fn record_run(&mut self, summary: &RunSummary, stats: &AggregateStatistics, limit: usize)
        -> Result<()>;
    fn save_inflight(&self, snapshot: &InflightSnapshot) -> Result<()>;
    fn load_inflight(&self) -> Result<Option<InflightSnapshot>>;
    fn clear_inflight(&self) -> Result<()>;
    fn schema_version(&self) -> Result<i64>;
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the default database under the state directory.
    pub fn open_default() -> Result<Self> {
        let path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("keyline.db"));
        Self::open(path)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS run_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recorded_at REAL NOT NULL,
                    level INTEGER,
                    variant_id INTEGER,
                    summary TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS aggregate_stats (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    total_runs INTEGER NOT NULL,
                    total_failures INTEGER NOT NULL,
                    average_failures REAL NOT NULL,
                    best_time_seconds REAL NOT NULL
                );
                CREATE TABLE IF NOT EXISTS inflight_run (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    snapshot TEXT NOT NULL,
                    saved_at REAL NOT NULL
                );
                "#,
            )?;
        }

        if version < 2 {
            self.conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_run_history_key ON run_history(level, variant_id)",
                [],
            )?;
        }

        if version < SCHEMA_VERSION {
            tracing::info!(from = version, to = SCHEMA_VERSION, "Migrated run database");
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
        }
        Ok(())
    }
}

impl RunStore for SqliteStore {
    fn load_stats(&self) -> Result<AggregateStatistics> {
        let stats = self
            .conn
            .query_row(
                r#"
                SELECT total_runs, total_failures, average_failures, best_time_seconds
                FROM aggregate_stats WHERE id = 1
                "#,
                [],
                |row| {
                    Ok(AggregateStatistics {
                        total_runs: row.get::<_, i64>(0)? as u64,
                        total_failures: row.get::<_, i64>(1)? as u64,
                        average_failures: row.get(2)?,
                        best_time_seconds: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(stats.unwrap_or_default())
    }

    fn load_history(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT summary FROM run_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| row.get::<_, String>(0))?;

        let mut runs = Vec::new();
        for row in rows {
            let text = row?;
            match serde_json::from_str::<RunSummary>(&text) {
                Ok(summary) => runs.push(summary),
                Err(error) => {
                    tracing::warn!(parse_error = %error, "Skipping unreadable history entry")
                }
            }
        }
        runs.reverse();
        Ok(runs)
    }

    fn record_run(
        &mut self,
        summary: &RunSummary,
        stats: &AggregateStatistics,
        limit: usize,
    ) -> Result<()> {
        let text = serde_json::to_string(summary)?;
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO run_history (recorded_at, level, variant_id, summary)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                summary.timestamp,
                summary.key.map(|key| key.level),
                summary.key.map(|key| key.variant_id),
                text,
            ],
        )?;

        tx.execute(
            r#"
            INSERT INTO aggregate_stats (id, total_runs, total_failures, average_failures, best_time_seconds)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                total_runs = excluded.total_runs,
                total_failures = excluded.total_failures,
                average_failures = excluded.average_failures,
                best_time_seconds = excluded.best_time_seconds
            "#,
            params![
                stats.total_runs as i64,
                stats.total_failures as i64,
                stats.average_failures,
                stats.best_time_seconds,
            ],
        )?;

        tx.execute(
            r#"
            DELETE FROM run_history WHERE id NOT IN (
                SELECT id FROM run_history ORDER BY id DESC LIMIT ?1
            )
            "#,
            [limit.max(1) as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn save_inflight(&self, snapshot: &InflightSnapshot) -> Result<()> {
        let text = serde_json::to_string(snapshot)?;
        self.conn.execute(
            r#"
            INSERT INTO inflight_run (id, snapshot, saved_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET snapshot = excluded.snapshot, saved_at = excluded.saved_at
            "#,
            params![text, snapshot.saved_at],
        )?;
        Ok(())
    }

    fn load_inflight(&self) -> Result<Option<InflightSnapshot>> {
        let text: Option<String> = self
            .conn
            .query_row("SELECT snapshot FROM inflight_run WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn clear_inflight(&self) -> Result<()> {
        self.conn.execute("DELETE FROM inflight_run", [])?;
        Ok(())
    }

    fn schema_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }
}
