//! Dispatcher：把入站文本路由到引擎，并把错误转换为中性的通用提示
//!
//! 以 `/` 开头的文本按命令解析（支持 `/start@botname`），其他文本交给状态机。

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::core::error::Result;
use crate::core::{Event, RitualEngine};
use crate::prompts::{self, Prompt};

/// 五个显式命令
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Status,
    Pause,
    Resume,
    Help,
}

/// 入站事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    Text(String),
}

static COMMAND_RE: OnceLock<Regex> = OnceLock::new();

impl Inbound {
    /// 未知命令按普通文本处理（由状态机忽略并重复提示）
    pub fn parse(text: &str) -> Self {
        let re = COMMAND_RE.get_or_init(|| {
            Regex::new(r"^/([A-Za-z]+)(?:@\S+)?(?:\s.*)?$").expect("command regex is valid")
        });
        let trimmed = text.trim();
        let command = re
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .and_then(|name| match name.as_str().to_lowercase().as_str() {
                "start" => Some(Command::Start),
                "status" => Some(Command::Status),
                "pause" => Some(Command::Pause),
                "resume" => Some(Command::Resume),
                "help" => Some(Command::Help),
                _ => None,
            });
        match command {
            Some(c) => Inbound::Command(c),
            None => Inbound::Text(trimmed.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<RitualEngine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<RitualEngine>) -> Self {
        Self { engine }
    }

    /// 处理一条入站消息；存储失败只影响本次请求
    pub async fn dispatch(&self, user_id: &str, text: &str) -> Vec<Prompt> {
        let inbound = Inbound::parse(text);
        match self.route(user_id, &inbound).await {
            Ok(prompts) => prompts,
            Err(e) if e.is_storage() => {
                tracing::error!("Storage failure on {:?} from {}: {}", inbound, user_id, e);
                vec![Prompt::text(user_id, prompts::GENERIC_FAILURE)]
            }
            Err(e) => {
                tracing::error!("Request {:?} from {} failed: {}", inbound, user_id, e);
                vec![Prompt::text(user_id, prompts::GENERIC_FAILURE)]
            }
        }
    }

    async fn route(&self, user_id: &str, inbound: &Inbound) -> Result<Vec<Prompt>> {
        match inbound {
            Inbound::Command(Command::Start) => self.engine.handle(user_id, Event::Start).await,
            Inbound::Command(Command::Pause) => self.engine.handle(user_id, Event::Pause).await,
            Inbound::Command(Command::Resume) => self.engine.handle(user_id, Event::Resume).await,
            Inbound::Command(Command::Status) => Ok(vec![self.engine.status(user_id).await?]),
            Inbound::Command(Command::Help) => Ok(vec![self.engine.help(user_id)]),
            Inbound::Text(text) => self.engine.handle_text(user_id, text).await,
        }
    }
}

/// 把提示渲染为纯文本：按钮以编号列表附在末尾
pub fn render_plain(prompt: &Prompt) -> String {
    if prompt.options.is_empty() {
        return prompt.text.clone();
    }
    let options: Vec<String> = prompt
        .options
        .iter()
        .enumerate()
        .map(|(i, o)| format!("{}. {}", i + 1, o))
        .collect();
    format!("{}\n\n{}", prompt.text, options.join("\n"))
}

/// 把编号回复（如 "2"）映射回按钮文本；其他输入原样返回
pub fn resolve_option<'a>(options: &'a [String], text: &'a str) -> &'a str {
    text.trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| options.get(i))
        .map(String::as_str)
        .unwrap_or(text)
}
