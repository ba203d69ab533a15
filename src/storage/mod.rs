//! 持久化层：用户状态、状态日志、会话记录、反馈记录
//!
//! 状态机与 Dispatcher 只通过 `RitualStore` 访问数据；物理表结构是内部细节。

mod sqlite;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::error::Result;
use crate::core::{FeedbackCategory, RitualState};

pub use sqlite::SqliteStore;

/// 用户记录（每个身份恰好一条，永不删除）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub user_id: String,
    pub state: RitualState,
    pub session_count: u32,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 状态日志（只追加）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateLogEntry {
    pub user_id: String,
    pub state: RitualState,
    pub created_at: DateTime<Utc>,
}

/// 已完成会话
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub session_number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackEntry {
    pub user_id: String,
    pub category: FeedbackCategory,
    pub detail: Option<String>,
    pub session_number: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// 单用户统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserStats {
    pub session_count: u32,
    pub paused: bool,
    /// 类别编码 -> 条数
    pub feedback_counts: BTreeMap<String, u64>,
}

/// 全局统计（只读聚合）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemStats {
    pub total_users: u64,
    /// 至少完成一次会话的用户的平均会话数，保留两位小数
    pub average_sessions: f64,
    pub feedback_counts: BTreeMap<String, u64>,
}

/// 一次转移需要落盘的全部写入，由 `RitualStore::apply_change` 在同一事务中提交
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateChange {
    pub paused: Option<bool>,
    /// 完成一次会话：计数 +1 并写入该时长的会话记录
    pub completed_session: Option<Duration>,
    /// 反馈记录（detail 取自类别，会话序号取当前计数）
    pub feedback: Option<FeedbackCategory>,
    /// 新状态（同时追加状态日志）
    pub state: Option<RitualState>,
}

impl StateChange {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// 存储接口：所有写操作返回前均已持久化
#[async_trait]
pub trait RitualStore: Send + Sync {
    /// 获取用户；不存在则以 Init 状态创建并写一条初始状态日志
    async fn get_or_create_user(&self, user_id: &str) -> Result<UserRecord>;

    /// 只读查询，不创建
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>>;

    /// 更新当前状态并追加状态日志（新旧状态相同也照常写入）
    async fn set_state(&self, user_id: &str, state: RitualState) -> Result<()>;

    /// 会话计数 +1，返回新值
    async fn increment_session_count(&self, user_id: &str) -> Result<u32>;

    async fn set_pause_flag(&self, user_id: &str, paused: bool) -> Result<()>;

    async fn record_session(
        &self,
        user_id: &str,
        session_number: u32,
        duration: Duration,
    ) -> Result<()>;

    async fn record_feedback(
        &self,
        user_id: &str,
        category: FeedbackCategory,
        detail: Option<&str>,
        session_number: Option<u32>,
    ) -> Result<()>;

    /// 原子地提交一次转移的全部写入；任一步失败则整体回滚。
    /// 完成会话时返回新的会话序号
    async fn apply_change(&self, user_id: &str, change: StateChange) -> Result<Option<u32>>;

    async fn user_stats(&self, user_id: &str) -> Result<UserStats>;

    async fn system_stats(&self) -> Result<SystemStats>;

    /// 审计查询，按时间正序
    async fn state_log(&self, user_id: &str) -> Result<Vec<StateLogEntry>>;

    async fn sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>>;

    async fn feedback(&self, user_id: &str) -> Result<Vec<FeedbackEntry>>;
}

/// 创建存储
///
/// db_path 为 None 或 ":memory:" 时使用内存数据库（仅用于本地试用，重启即丢失）
pub fn create_store(db_path: Option<&Path>) -> Result<Arc<dyn RitualStore>> {
    match db_path {
        Some(path) if path != Path::new(":memory:") => {
            let store = SqliteStore::open(path)?;
            tracing::info!("Using SQLite store: {:?}", path);
            Ok(Arc::new(store))
        }
        _ => {
            tracing::warn!("No database path configured, using in-memory SQLite store");
            Ok(Arc::new(SqliteStore::in_memory()?))
        }
    }
}
