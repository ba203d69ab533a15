//! 流程引擎：在每用户锁内执行状态机转移
//!
//! 同一用户的事件严格串行（每用户一把 tokio Mutex，锁内同时保存临时会话上下文）；
//! 不同用户之间完全独立。计时器触发后同样先获取该用户的锁，再复查暂停标志。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::error::Result;
use crate::core::machine::{self, Conversation, Effect, Event, Input, Outcome, Rejection, Transition};
use crate::core::state::RitualState;
use crate::core::timer::{TimerHandle, TimerKind, TimerRegistry};
use crate::prompts::{self, Prompt};
use crate::storage::{RitualStore, StateChange, SystemStats, UserRecord, UserStats};

/// 引擎运行参数
#[derive(Debug, Clone, Copy)]
pub struct RitualSettings {
    /// 单次会话时长
    pub session_duration: Duration,
    /// 反馈完成后再次提示前的等待时间
    pub reprompt_delay: Duration,
}

impl Default for RitualSettings {
    fn default() -> Self {
        Self {
            session_duration: Duration::from_secs(300),
            reprompt_delay: Duration::from_secs(2),
        }
    }
}

impl RitualSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            session_duration: Duration::from_secs(cfg.session.duration_secs),
            reprompt_delay: Duration::from_secs(cfg.session.reprompt_delay_secs),
        }
    }
}

type UserLock = Arc<tokio::sync::Mutex<Conversation>>;

pub struct RitualEngine {
    store: Arc<dyn RitualStore>,
    settings: RitualSettings,
    /// user_id -> 串行化锁（内含临时会话上下文，不持久化）；上下文回到默认值后由 `prune` 移除
    conversations: Mutex<HashMap<String, UserLock>>,
    timers: TimerRegistry,
    /// 计时器触发产生的提示，由 Dispatcher 消费并发送
    outbound: mpsc::UnboundedSender<Prompt>,
}

impl RitualEngine {
    /// 创建引擎，返回异步提示接收端
    pub fn new(
        store: Arc<dyn RitualStore>,
        settings: RitualSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Prompt>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            store,
            settings,
            conversations: Mutex::new(HashMap::new()),
            timers: TimerRegistry::new(),
            outbound,
        });
        (engine, outbound_rx)
    }

    fn user_lock(&self, user_id: &str) -> UserLock {
        let mut map = self.conversations.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(user_id.to_string()).or_default().clone()
    }

    /// 无人持有且临时上下文为默认值时移除该用户的锁，下次访问会重新创建等价的条目。
    /// 新的克隆只在 map 锁内产生，因此 strong_count == 1 时不会有并发持有者。
    fn prune(&self, user_id: &str) {
        let mut map = self.conversations.lock().unwrap_or_else(|e| e.into_inner());
        let idle = map.get(user_id).is_some_and(|lock| {
            Arc::strong_count(lock) == 1
                && lock
                    .try_lock()
                    .map(|c| *c == Conversation::default())
                    .unwrap_or(false)
        });
        if idle {
            map.remove(user_id);
        }
    }

    /// 当前临时会话上下文的快照
    pub async fn conversation(&self, user_id: &str) -> Conversation {
        *self.user_lock(user_id).lock().await
    }

    /// 是否有未触发的计时器
    pub fn pending_timer(&self, user_id: &str) -> Option<TimerKind> {
        self.timers.pending_kind(user_id)
    }

    /// 处理自由文本输入；无法识别的输入不转移，只重复当前提示
    pub async fn handle_text(self: &Arc<Self>, user_id: &str, text: &str) -> Result<Vec<Prompt>> {
        match Input::parse(text) {
            Some(input) => self.handle(user_id, Event::Input(input)).await,
            None => {
                let lock = self.user_lock(user_id);
                let result = {
                    let conversation = lock.lock().await;
                    self.store.get_or_create_user(user_id).await.map(|user| {
                        tracing::debug!("Unrecognized input from {} in {}", user_id, user.state);
                        Self::repeat_prompt(&user, &conversation)
                    })
                };
                drop(lock);
                self.prune(user_id);
                result
            }
        }
    }

    /// 处理一个事件（按钮或命令），返回需要立即回复的提示
    pub async fn handle(self: &Arc<Self>, user_id: &str, event: Event) -> Result<Vec<Prompt>> {
        let lock = self.user_lock(user_id);
        let result = {
            let mut conversation = lock.lock().await;
            self.handle_locked(user_id, event, &mut conversation).await
        };
        drop(lock);
        self.prune(user_id);
        result
    }

    async fn handle_locked(
        self: &Arc<Self>,
        user_id: &str,
        event: Event,
        conversation: &mut Conversation,
    ) -> Result<Vec<Prompt>> {
        let user = self.store.get_or_create_user(user_id).await?;

        match machine::transition(user.state, user.paused, conversation, event) {
            Outcome::Ignored => {
                tracing::debug!("Ignored {:?} from {} in {}", event, user_id, user.state);
                Ok(Self::repeat_prompt(&user, conversation))
            }
            Outcome::Rejected(rejection) => {
                tracing::warn!("Rejected {:?} from {}: {:?}", event, user_id, rejection);
                let text = match rejection {
                    Rejection::AlreadyStarted => prompts::ALREADY_STARTED,
                    Rejection::NotPaused => prompts::NO_PAUSE,
                };
                Ok(vec![Prompt::text(user_id, text)])
            }
            Outcome::Transition(transition) => {
                self.apply(&user, conversation, &transition).await?;
                let state = transition.resulting_state(user.state);
                Ok(vec![prompts::state_prompt(
                    user_id,
                    state,
                    conversation.question_index,
                    conversation.awaiting_detail,
                )])
            }
        }
    }

    /// /status：只读投影
    pub async fn status(&self, user_id: &str) -> Result<Prompt> {
        let user = self.store.get_or_create_user(user_id).await?;
        Ok(Prompt::text(
            user_id,
            prompts::status_text(user.state, user.session_count, user.paused),
        ))
    }

    pub fn help(&self, user_id: &str) -> Prompt {
        Prompt::text(user_id, prompts::HELP)
    }

    pub async fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        self.store.user_stats(user_id).await
    }

    pub async fn system_stats(&self) -> Result<SystemStats> {
        self.store.system_stats().await
    }

    /// 关闭：取消所有未触发的计时器
    pub fn shutdown(&self) {
        let cancelled = self.timers.cancel_all();
        if cancelled > 0 {
            tracing::info!("Cancelled {} pending timers on shutdown", cancelled);
        }
    }

    fn repeat_prompt(user: &UserRecord, conversation: &Conversation) -> Vec<Prompt> {
        if user.state == RitualState::SessionActive {
            return Vec::new();
        }
        vec![prompts::state_prompt(
            &user.user_id,
            user.state,
            conversation.question_index,
            conversation.awaiting_detail,
        )]
    }

    /// 执行副作用：持久化写入合并为一个事务先提交，成功后再处理计时器与临时上下文
    async fn apply(
        self: &Arc<Self>,
        user: &UserRecord,
        conversation: &mut Conversation,
        transition: &Transition,
    ) -> Result<()> {
        let user_id = user.user_id.as_str();

        let mut change = StateChange {
            state: transition.next,
            ..Default::default()
        };
        for effect in &transition.effects {
            match effect {
                Effect::SetPause(paused) => change.paused = Some(*paused),
                Effect::CompleteSession => {
                    change.completed_session = Some(self.settings.session_duration)
                }
                Effect::RecordFeedback(category) => change.feedback = Some(*category),
                _ => {}
            }
        }

        if !change.is_empty() {
            let completed = self.store.apply_change(user_id, change).await?;
            if let Some(session_number) = completed {
                tracing::info!("User {} completed session #{}", user_id, session_number);
            }
            if let Some(next) = transition.next {
                tracing::info!("User {}: {} -> {}", user_id, user.state, next);
            }
        }

        for effect in &transition.effects {
            match effect {
                Effect::CancelTimers => {
                    if self.timers.cancel(user_id) {
                        tracing::info!("Cancelled pending timer for {}", user_id);
                    }
                }
                Effect::StartSessionTimer => {
                    self.schedule(user_id, TimerKind::Session, self.settings.session_duration)
                }
                Effect::ScheduleReprompt => {
                    self.schedule(user_id, TimerKind::Reprompt, self.settings.reprompt_delay)
                }
                e if e.is_ephemeral() => conversation.apply(e),
                _ => {}
            }
        }

        Ok(())
    }

    fn schedule(self: &Arc<Self>, user_id: &str, kind: TimerKind, delay: Duration) {
        let engine = Arc::downgrade(self);
        self.timers.schedule(user_id, kind, delay, move |handle| async move {
            if let Some(engine) = engine.upgrade() {
                engine.on_timer(handle).await;
            }
        });
        tracing::debug!("Scheduled {:?} timer for {} in {:?}", kind, user_id, delay);
    }

    async fn on_timer(self: Arc<Self>, handle: TimerHandle) {
        let lock = self.user_lock(&handle.user_id);
        {
            let mut conversation = lock.lock().await;

            // 取消先于触发发生时，取消生效
            if !self.timers.claim(&handle) {
                tracing::debug!("{:?} timer for {} was cancelled", handle.kind, handle.user_id);
                return;
            }

            match self.fire(&handle, &mut conversation).await {
                Ok(Some(prompt)) => {
                    if self.outbound.send(prompt).is_err() {
                        tracing::warn!(
                            "Outbound channel closed, prompt for {} dropped",
                            handle.user_id
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // 写入已整体回滚，用户仍停在原状态；稍后重试同一计时器
                    let delay = self.settings.reprompt_delay;
                    tracing::error!(
                        "{:?} timer for {} failed, retrying in {:?}: {}",
                        handle.kind,
                        handle.user_id,
                        delay,
                        e
                    );
                    self.schedule(&handle.user_id, handle.kind, delay);
                }
            }
        }
        drop(lock);
        self.prune(&handle.user_id);
    }

    async fn fire(
        self: &Arc<Self>,
        handle: &TimerHandle,
        conversation: &mut Conversation,
    ) -> Result<Option<Prompt>> {
        let user_id = handle.user_id.as_str();
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(None);
        };

        let event = match handle.kind {
            TimerKind::Session => Event::SessionElapsed,
            TimerKind::Reprompt => Event::RepromptElapsed,
        };

        match machine::transition(user.state, user.paused, conversation, event) {
            Outcome::Transition(transition) => {
                self.apply(&user, conversation, &transition).await?;
                let prompt = match handle.kind {
                    TimerKind::Session => prompts::state_prompt(
                        user_id,
                        RitualState::PostSession,
                        conversation.question_index,
                        conversation.awaiting_detail,
                    ),
                    TimerKind::Reprompt => Prompt::new(
                        user_id,
                        prompts::READY_FOR_NEXT,
                        prompts::options_for(RitualState::ReadyForSession, false),
                    ),
                };
                Ok(Some(prompt))
            }
            _ => {
                if handle.kind == TimerKind::Session {
                    tracing::warn!(
                        "Session for {} discarded (state {}, paused {})",
                        user_id,
                        user.state,
                        user.paused
                    );
                }
                Ok(None)
            }
        }
    }
}
