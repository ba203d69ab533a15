//! Regimen - 实体产品规律使用的对话陪伴系统
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态定义、转移表、会话计时器、流程引擎、错误与关闭
//! - **dispatcher**: 入站命令/文本路由与提示渲染
//! - **integrations**: 外部聊天平台（WhatsApp，需 feature）
//! - **observability**: 日志初始化
//! - **prompts**: 消息文本与按钮集合
//! - **storage**: SQLite 持久化（用户、状态日志、会话、反馈）

pub mod config;
pub mod core;
pub mod dispatcher;
pub mod integrations;
pub mod observability;
pub mod prompts;
pub mod storage;

pub use crate::core::{RitualEngine, RitualSettings, RitualState};
pub use dispatcher::Dispatcher;
