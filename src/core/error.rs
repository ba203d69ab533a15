//! 错误类型
//!
//! 存储失败只影响当前这一次请求：由 Dispatcher 转换为中性的通用提示，不会让进程崩溃。

use thiserror::Error;

/// 引擎与存储层可能出现的错误
#[derive(Error, Debug)]
pub enum RegimenError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("User not found: {0}")]
    UserNotFound(String),

    /// 锁中毒、blocking 任务 join 失败等
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegimenError {
    /// 是否为存储层错误
    pub fn is_storage(&self) -> bool {
        matches!(self, RegimenError::Storage(_) | RegimenError::UserNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RegimenError>;
