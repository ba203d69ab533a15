//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `REGIMEN__*` 覆盖（双下划线表示嵌套，如 `REGIMEN__SESSION__DURATION_SECS=10`）。
//! 访问令牌等机密只从环境变量读取，不写入配置文件。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::error::Result;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub session: SessionSection,
    pub logging: LoggingSection,
    pub whatsapp: WhatsappSection,
}

/// [app] 段：应用名、数据库路径
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// SQLite 文件路径；":memory:" 表示不落盘
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            db_path: default_db_path(),
        }
    }
}

fn default_app_name() -> String {
    "regimen".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/regimen.db")
}

/// [session] 段：会话时长与再提示延迟（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_reprompt_delay_secs")]
    pub reprompt_delay_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            reprompt_delay_secs: default_reprompt_delay_secs(),
        }
    }
}

fn default_duration_secs() -> u64 {
    300
}

fn default_reprompt_delay_secs() -> u64 {
    2
}

/// [logging] 段：EnvFilter 指令，RUST_LOG 优先
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// [whatsapp] 段：监听地址、Cloud API 地址、Webhook 验证令牌
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsappSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_verify_token")]
    pub verify_token: String,
}

impl Default for WhatsappSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_base: default_api_base(),
            verify_token: default_verify_token(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_api_base() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

fn default_verify_token() -> String {
    "regimen".to_string()
}

/// 从 config 目录加载配置，环境变量 REGIMEN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 REGIMEN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("REGIMEN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    Ok(c.try_deserialize()?)
}
