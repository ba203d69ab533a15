//! Regimen 控制台前端
//!
//! 入口：加载配置、初始化日志、打开数据库、创建引擎，然后逐行读取标准输入作为本地用户 `console` 的消息。
//! `regimen analytics` 输出全局统计（JSON）后退出。
//!
//! 环境变量:
//! - REGIMEN_CONFIG: 额外配置文件路径（可选）
//! - REGIMEN__*: 覆盖配置项，如 REGIMEN__SESSION__DURATION_SECS=10

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use regimen::config::load_config;
use regimen::core::{ShutdownManager, ShutdownReason};
use regimen::dispatcher::{render_plain, resolve_option};
use regimen::prompts::Prompt;
use regimen::storage::create_store;
use regimen::{observability, Dispatcher, RitualEngine, RitualSettings};
use tokio::io::{AsyncBufReadExt, BufReader};

const CONSOLE_USER: &str = "console";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("REGIMEN_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(&cfg.logging.filter);

    let store = create_store(Some(cfg.app.db_path.as_path())).context("Failed to open database")?;

    if std::env::args().nth(1).as_deref() == Some("analytics") {
        let stats = store.system_stats().await.context("Failed to read analytics")?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let settings = RitualSettings::from_config(&cfg);
    let (engine, mut outbound_rx) = RitualEngine::new(store, settings);
    let dispatcher = Dispatcher::new(engine.clone());

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    tracing::info!(
        "{} started: database {:?}, session duration {:?}",
        cfg.app.name,
        cfg.app.db_path,
        settings.session_duration
    );
    println!("{}", engine.help(CONSOLE_USER).text);

    let mut last_options: Vec<String> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            Some(prompt) = outbound_rx.recv() => {
                show(&prompt, &mut last_options);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    shutdown.shutdown(ShutdownReason::UserInitiated);
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let text = resolve_option(&last_options, &line).to_string();
                for prompt in dispatcher.dispatch(CONSOLE_USER, &text).await {
                    show(&prompt, &mut last_options);
                }
            }
        }
    }

    engine.shutdown();
    Ok(())
}

fn show(prompt: &Prompt, last_options: &mut Vec<String>) {
    println!("\n{}\n", render_plain(prompt));
    if !prompt.options.is_empty() {
        *last_options = prompt.options.clone();
    }
}
