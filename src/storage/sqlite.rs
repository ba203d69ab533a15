//! SQLite 实现
//!
//! 单连接 + 互斥锁，所有语句在 blocking 线程池中执行；每个写操作一个事务，
//! 用户更新与状态日志在同一事务内提交。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    FeedbackEntry, RitualStore, SessionRecord, StateChange, StateLogEntry, SystemStats,
    UserRecord, UserStats,
};
use crate::core::error::{RegimenError, Result};
use crate::core::{FeedbackCategory, RitualState};

impl ToSql for RitualState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for RitualState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_str()?;
        RitualState::from_code(code).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for FeedbackCategory {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for FeedbackCategory {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_str()?;
        FeedbackCategory::from_code(code).ok_or(FromSqlError::InvalidType)
    }
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RegimenError::Internal(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                current_state TEXT NOT NULL DEFAULT 'S0',
                session_count INTEGER NOT NULL DEFAULT 0,
                pause_flag INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feedback_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                feedback_type TEXT NOT NULL,
                discomfort_detail TEXT,
                session_number INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                session_number INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            );

            CREATE TABLE IF NOT EXISTS state_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_state_log_user ON state_log(user_id);
            CREATE INDEX IF NOT EXISTS idx_feedback_log_user ON feedback_log(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);",
        )
    }

    /// 在 blocking 线程池中持锁执行
    async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| RegimenError::Internal("sqlite connection lock poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| RegimenError::Internal(format!("storage task failed: {}", e)))?
    }

    fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
        Ok(UserRecord {
            user_id: row.get("user_id")?,
            state: row.get("current_state")?,
            session_count: row.get("session_count")?,
            paused: row.get("pause_flag")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn select_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<UserRecord>> {
        conn.query_row(
            "SELECT user_id, current_state, session_count, pause_flag, created_at, updated_at
             FROM users WHERE user_id = ?1",
            params![user_id],
            Self::map_user,
        )
        .optional()
    }

    fn feedback_counts(
        conn: &Connection,
        user_id: Option<&str>,
    ) -> rusqlite::Result<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        let mut collect = |row: &Row<'_>| -> rusqlite::Result<()> {
            let category: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(category, count.max(0) as u64);
            Ok(())
        };

        match user_id {
            Some(id) => {
                let mut stmt = conn.prepare(
                    "SELECT feedback_type, COUNT(*) FROM feedback_log
                     WHERE user_id = ?1 GROUP BY feedback_type",
                )?;
                let mut rows = stmt.query(params![id])?;
                while let Some(row) = rows.next()? {
                    collect(row)?;
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT feedback_type, COUNT(*) FROM feedback_log GROUP BY feedback_type",
                )?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    collect(row)?;
                }
            }
        }

        Ok(counts)
    }
}

fn not_found(user_id: &str) -> RegimenError {
    RegimenError::UserNotFound(user_id.to_string())
}

// 以下写入函数不自行开启事务，由调用方决定提交边界

fn write_state(
    conn: &Connection,
    user_id: &str,
    state: RitualState,
    now: DateTime<Utc>,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE users SET current_state = ?1, updated_at = ?2 WHERE user_id = ?3",
        params![state, now, user_id],
    )?;
    if updated == 0 {
        return Err(not_found(user_id));
    }
    conn.execute(
        "INSERT INTO state_log (user_id, state, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, state, now],
    )?;
    Ok(())
}

fn write_pause(conn: &Connection, user_id: &str, paused: bool, now: DateTime<Utc>) -> Result<()> {
    let updated = conn.execute(
        "UPDATE users SET pause_flag = ?1, updated_at = ?2 WHERE user_id = ?3",
        params![paused, now, user_id],
    )?;
    if updated == 0 {
        return Err(not_found(user_id));
    }
    Ok(())
}

fn read_session_count(conn: &Connection, user_id: &str) -> Result<u32> {
    conn.query_row(
        "SELECT session_count FROM users WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| not_found(user_id))
}

fn write_increment(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<u32> {
    let updated = conn.execute(
        "UPDATE users SET session_count = session_count + 1, updated_at = ?1 WHERE user_id = ?2",
        params![now, user_id],
    )?;
    if updated == 0 {
        return Err(not_found(user_id));
    }
    read_session_count(conn, user_id)
}

/// 会话结束于 `now`，开始时间按时长倒推
fn write_session(
    conn: &Connection,
    user_id: &str,
    session_number: u32,
    duration: Duration,
    now: DateTime<Utc>,
) -> Result<()> {
    let started_at = chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(now);
    conn.execute(
        "INSERT INTO sessions
         (user_id, session_number, start_time, end_time, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?4)",
        params![
            user_id,
            session_number,
            started_at,
            now,
            i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
        ],
    )?;
    Ok(())
}

fn write_feedback(
    conn: &Connection,
    user_id: &str,
    category: FeedbackCategory,
    detail: Option<&str>,
    session_number: Option<u32>,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO feedback_log
         (user_id, feedback_type, discomfort_detail, session_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, category, detail, session_number, now],
    )?;
    Ok(())
}

#[async_trait]
impl RitualStore for SqliteStore {
    async fn get_or_create_user(&self, user_id: &str) -> Result<UserRecord> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO users
                 (user_id, current_state, session_count, pause_flag, created_at, updated_at)
                 VALUES (?1, ?2, 0, 0, ?3, ?3)",
                params![user_id, RitualState::Init, now],
            )?;
            if inserted == 1 {
                tx.execute(
                    "INSERT INTO state_log (user_id, state, created_at) VALUES (?1, ?2, ?3)",
                    params![user_id, RitualState::Init, now],
                )?;
                tracing::info!("Created user {}", user_id);
            }
            let user = Self::select_user(&tx, &user_id)?.ok_or_else(|| not_found(&user_id))?;
            tx.commit()?;
            Ok(user)
        })
        .await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let user_id = user_id.to_string();
        self.call(move |conn| Ok(Self::select_user(conn, &user_id)?))
            .await
    }

    async fn set_state(&self, user_id: &str, state: RitualState) -> Result<()> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            write_state(&tx, &user_id, state, Utc::now())?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn increment_session_count(&self, user_id: &str) -> Result<u32> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let count = write_increment(&tx, &user_id, Utc::now())?;
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    async fn set_pause_flag(&self, user_id: &str, paused: bool) -> Result<()> {
        let user_id = user_id.to_string();
        self.call(move |conn| write_pause(conn, &user_id, paused, Utc::now()))
            .await
    }

    async fn record_session(
        &self,
        user_id: &str,
        session_number: u32,
        duration: Duration,
    ) -> Result<()> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            write_session(conn, &user_id, session_number, duration, Utc::now())?;
            Ok(())
        })
        .await
    }

    async fn record_feedback(
        &self,
        user_id: &str,
        category: FeedbackCategory,
        detail: Option<&str>,
        session_number: Option<u32>,
    ) -> Result<()> {
        let user_id = user_id.to_string();
        let detail = detail.map(str::to_string);
        self.call(move |conn| {
            write_feedback(
                conn,
                &user_id,
                category,
                detail.as_deref(),
                session_number,
                Utc::now(),
            )?;
            Ok(())
        })
        .await
    }

    async fn apply_change(&self, user_id: &str, change: StateChange) -> Result<Option<u32>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();

            if let Some(paused) = change.paused {
                write_pause(&tx, &user_id, paused, now)?;
            }
            let completed = match change.completed_session {
                Some(duration) => {
                    let session_number = write_increment(&tx, &user_id, now)?;
                    write_session(&tx, &user_id, session_number, duration, now)?;
                    Some(session_number)
                }
                None => None,
            };
            if let Some(category) = change.feedback {
                let session_number = read_session_count(&tx, &user_id)?;
                write_feedback(
                    &tx,
                    &user_id,
                    category,
                    category.detail(),
                    Some(session_number),
                    now,
                )?;
            }
            if let Some(state) = change.state {
                write_state(&tx, &user_id, state, now)?;
            }

            tx.commit()?;
            Ok(completed)
        })
        .await
    }

    async fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let base: Option<(u32, bool)> = conn
                .query_row(
                    "SELECT session_count, pause_flag FROM users WHERE user_id = ?1",
                    params![user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (session_count, paused) = base.unwrap_or_default();
            Ok(UserStats {
                session_count,
                paused,
                feedback_counts: Self::feedback_counts(conn, Some(user_id.as_str()))?,
            })
        })
        .await
    }

    async fn system_stats(&self) -> Result<SystemStats> {
        self.call(|conn| {
            let total_users: i64 =
                conn.query_row("SELECT COUNT(DISTINCT user_id) FROM users", [], |row| row.get(0))?;
            let average: Option<f64> = conn.query_row(
                "SELECT AVG(session_count) FROM users WHERE session_count > 0",
                [],
                |row| row.get(0),
            )?;
            Ok(SystemStats {
                total_users: total_users.max(0) as u64,
                average_sessions: (average.unwrap_or(0.0) * 100.0).round() / 100.0,
                feedback_counts: Self::feedback_counts(conn, None)?,
            })
        })
        .await
    }

    async fn state_log(&self, user_id: &str) -> Result<Vec<StateLogEntry>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, state, created_at FROM state_log WHERE user_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(StateLogEntry {
                    user_id: row.get(0)?,
                    state: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, session_number, start_time, end_time, duration_ms
                 FROM sessions WHERE user_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                let duration_ms: i64 = row.get(4)?;
                Ok(SessionRecord {
                    user_id: row.get(0)?,
                    session_number: row.get(1)?,
                    started_at: row.get::<_, DateTime<Utc>>(2)?,
                    ended_at: row.get::<_, DateTime<Utc>>(3)?,
                    duration: Duration::from_millis(duration_ms.max(0) as u64),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn feedback(&self, user_id: &str) -> Result<Vec<FeedbackEntry>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, feedback_type, discomfort_detail, session_number, created_at
                 FROM feedback_log WHERE user_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(FeedbackEntry {
                    user_id: row.get(0)?,
                    category: row.get(1)?,
                    detail: row.get(2)?,
                    session_number: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}
