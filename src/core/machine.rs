//! 流程状态机：纯转移逻辑
//!
//! `transition` 是唯一的分发函数：输入 (当前状态, 暂停标志, 会话上下文, 事件)，
//! 输出下一状态与副作用列表，不做任何 I/O。副作用由 `RitualEngine` 执行。

use crate::core::state::{FeedbackCategory, RitualState};
use crate::prompts;

/// 禁忌筛查问题数量
pub const QUESTION_COUNT: usize = prompts::CONTRAINDICATION_QUESTIONS.len();

/// 按钮输入（自由文本经 `Input::parse` 归一化后得到）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input {
    Begin,
    Confirm,
    Decline,
    Yes,
    No,
    BeginSession,
    Continue,
    Comfortable,
    Neutral,
    Discomfort,
}

impl Input {
    /// 忽略大小写与首尾空白匹配按钮文本；无法识别返回 None
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = text.trim().to_lowercase();
        let input = match normalized.as_str() {
            "begin" => Input::Begin,
            "confirm" => Input::Confirm,
            "decline" => Input::Decline,
            "yes" => Input::Yes,
            "no" => Input::No,
            "begin session" => Input::BeginSession,
            "continue" => Input::Continue,
            "comfortable" => Input::Comfortable,
            "neutral" => Input::Neutral,
            "discomfort" => Input::Discomfort,
            _ => return None,
        };
        Some(input)
    }
}

/// 驱动状态机的事件：用户按钮、命令或计时器到期
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Input(Input),
    Start,
    Pause,
    Resume,
    /// 会话计时结束
    SessionElapsed,
    /// 反馈完成后的延迟再提示
    RepromptElapsed,
}

/// 每个用户的临时会话上下文（不持久化，进程重启即丢失）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Conversation {
    /// 当前禁忌筛查问题下标（0..QUESTION_COUNT）
    pub question_index: usize,
    /// 是否在等待不适追问的回答
    pub awaiting_detail: bool,
}

impl Conversation {
    /// 应用仅影响临时上下文的副作用
    pub fn apply(&mut self, effect: &Effect) {
        match effect {
            Effect::ResetQuestion => self.question_index = 0,
            Effect::AdvanceQuestion => self.question_index += 1,
            Effect::AwaitDetail(flag) => self.awaiting_detail = *flag,
            Effect::ResetConversation => *self = Conversation::default(),
            _ => {}
        }
    }
}

/// 转移附带的副作用
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    ResetQuestion,
    AdvanceQuestion,
    AwaitDetail(bool),
    ResetConversation,
    SetPause(bool),
    /// 取消该用户所有未触发的计时器
    CancelTimers,
    StartSessionTimer,
    /// 会话计数 +1 并写入会话记录
    CompleteSession,
    RecordFeedback(FeedbackCategory),
    ScheduleReprompt,
}

impl Effect {
    /// 是否只作用于临时上下文
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            Effect::ResetQuestion
                | Effect::AdvanceQuestion
                | Effect::AwaitDetail(_)
                | Effect::ResetConversation
        )
    }
}

/// 被拒绝的命令（只回复说明，不做任何修改）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    AlreadyStarted,
    NotPaused,
}

/// 一次转移：`next` 为 None 表示状态不变（不写状态日志）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: Option<RitualState>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: RitualState, effects: Vec<Effect>) -> Self {
        Self {
            next: Some(next),
            effects,
        }
    }

    fn stay(effects: Vec<Effect>) -> Self {
        Self {
            next: None,
            effects,
        }
    }

    /// 转移后的状态
    pub fn resulting_state(&self, current: RitualState) -> RitualState {
        self.next.unwrap_or(current)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Transition(Transition),
    Rejected(Rejection),
    /// 不匹配当前状态的输入：不转移、不持久化
    Ignored,
}

/// 转移表
pub fn transition(
    state: RitualState,
    paused: bool,
    conversation: &Conversation,
    event: Event,
) -> Outcome {
    use Effect::*;
    use RitualState as S;

    let t = match (state, event) {
        (_, Event::Start) if paused => Transition::to(
            S::Init,
            vec![SetPause(false), CancelTimers, ResetConversation],
        ),
        (S::Init, Event::Start) => Transition::to(S::Init, vec![CancelTimers, ResetConversation]),
        (_, Event::Start) => return Outcome::Rejected(Rejection::AlreadyStarted),

        (_, Event::Pause) => Transition::to(S::Pause, vec![SetPause(true), CancelTimers]),

        (_, Event::Resume) if paused => Transition::to(
            S::CheckContraindications,
            vec![SetPause(false), ResetConversation, ResetQuestion],
        ),
        (_, Event::Resume) => return Outcome::Rejected(Rejection::NotPaused),

        (S::SessionActive, Event::SessionElapsed) if !paused => {
            Transition::to(S::PostSession, vec![CompleteSession])
        }
        (S::RegularUse, Event::RepromptElapsed) if !paused => {
            Transition::to(S::ReadyForSession, vec![])
        }

        (S::Init, Event::Input(Input::Begin)) => Transition::to(S::ConfirmConditions, vec![]),

        (S::ConfirmConditions, Event::Input(Input::Confirm)) => {
            Transition::to(S::CheckContraindications, vec![ResetQuestion])
        }
        (S::ConfirmConditions, Event::Input(Input::Decline)) => {
            Transition::to(S::Pause, vec![SetPause(true), CancelTimers])
        }

        (S::CheckContraindications, Event::Input(Input::Yes)) => {
            Transition::to(S::Pause, vec![SetPause(true), CancelTimers, ResetQuestion])
        }
        (S::CheckContraindications, Event::Input(Input::No))
            if conversation.question_index + 1 < QUESTION_COUNT =>
        {
            Transition::stay(vec![AdvanceQuestion])
        }
        (S::CheckContraindications, Event::Input(Input::No)) => {
            Transition::to(S::ReadyForSession, vec![ResetQuestion])
        }

        (S::ReadyForSession, Event::Input(Input::BeginSession)) => {
            Transition::to(S::SessionActive, vec![StartSessionTimer])
        }

        (S::PostSession, Event::Input(Input::Continue)) => {
            Transition::to(S::Feedback, vec![AwaitDetail(false)])
        }

        (S::Feedback, Event::Input(Input::Yes)) if conversation.awaiting_detail => Transition::to(
            S::Pause,
            vec![
                RecordFeedback(FeedbackCategory::DiscomfortWorsening),
                SetPause(true),
                CancelTimers,
                AwaitDetail(false),
            ],
        ),
        (S::Feedback, Event::Input(Input::No)) if conversation.awaiting_detail => Transition::to(
            S::RegularUse,
            vec![
                RecordFeedback(FeedbackCategory::DiscomfortNotWorsening),
                AwaitDetail(false),
                ScheduleReprompt,
            ],
        ),
        (S::Feedback, Event::Input(Input::Comfortable)) if !conversation.awaiting_detail => {
            Transition::to(
                S::RegularUse,
                vec![RecordFeedback(FeedbackCategory::Comfortable), ScheduleReprompt],
            )
        }
        (S::Feedback, Event::Input(Input::Neutral)) if !conversation.awaiting_detail => {
            Transition::to(
                S::RegularUse,
                vec![RecordFeedback(FeedbackCategory::Neutral), ScheduleReprompt],
            )
        }
        (S::Feedback, Event::Input(Input::Discomfort)) if !conversation.awaiting_detail => {
            Transition::stay(vec![
                RecordFeedback(FeedbackCategory::Discomfort),
                AwaitDetail(true),
            ])
        }

        _ => return Outcome::Ignored,
    };

    Outcome::Transition(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_transition(outcome: Outcome) -> Transition {
        match outcome {
            Outcome::Transition(t) => t,
            other => panic!("Expected transition, got {:?}", other),
        }
    }

    #[test]
    fn test_input_parse_is_case_insensitive() {
        assert_eq!(Input::parse("  Begin session "), Some(Input::BeginSession));
        assert_eq!(Input::parse("YES"), Some(Input::Yes));
        assert_eq!(Input::parse("maybe"), None);
    }

    #[test]
    fn test_yes_at_any_question_pauses() {
        for i in 0..QUESTION_COUNT {
            let conv = Conversation {
                question_index: i,
                awaiting_detail: false,
            };
            let t = expect_transition(transition(
                RitualState::CheckContraindications,
                false,
                &conv,
                Event::Input(Input::Yes),
            ));
            assert_eq!(t.next, Some(RitualState::Pause));
            assert!(t.effects.contains(&Effect::SetPause(true)));
        }
    }

    #[test]
    fn test_five_no_answers_reach_ready_once() {
        let mut conv = Conversation::default();
        let mut state = RitualState::CheckContraindications;
        let mut asked = vec![conv.question_index];
        let mut ready_count = 0;

        for _ in 0..QUESTION_COUNT {
            let t = expect_transition(transition(state, false, &conv, Event::Input(Input::No)));
            for e in &t.effects {
                conv.apply(e);
            }
            state = t.resulting_state(state);
            if state == RitualState::ReadyForSession {
                ready_count += 1;
            } else {
                asked.push(conv.question_index);
            }
        }

        assert_eq!(ready_count, 1);
        assert_eq!(state, RitualState::ReadyForSession);
        assert_eq!(asked, vec![0, 1, 2, 3, 4]);
        assert_eq!(conv.question_index, 0);
    }

    #[test]
    fn test_session_active_ignores_input() {
        let conv = Conversation::default();
        for input in [Input::Begin, Input::Yes, Input::Continue, Input::BeginSession] {
            assert_eq!(
                transition(RitualState::SessionActive, false, &conv, Event::Input(input)),
                Outcome::Ignored
            );
        }
    }

    #[test]
    fn test_session_elapsed_discarded_when_paused() {
        let conv = Conversation::default();
        assert_eq!(
            transition(RitualState::SessionActive, true, &conv, Event::SessionElapsed),
            Outcome::Ignored
        );
        let t = expect_transition(transition(
            RitualState::SessionActive,
            false,
            &conv,
            Event::SessionElapsed,
        ));
        assert_eq!(t.next, Some(RitualState::PostSession));
        assert_eq!(t.effects, vec![Effect::CompleteSession]);
    }

    #[test]
    fn test_discomfort_requires_detail_before_leaving_feedback() {
        let mut conv = Conversation::default();
        let t = expect_transition(transition(
            RitualState::Feedback,
            false,
            &conv,
            Event::Input(Input::Discomfort),
        ));
        assert_eq!(t.next, None);
        for e in &t.effects {
            conv.apply(e);
        }
        assert!(conv.awaiting_detail);

        // 等待追问时，类别按钮不再生效
        assert_eq!(
            transition(RitualState::Feedback, false, &conv, Event::Input(Input::Comfortable)),
            Outcome::Ignored
        );

        let t = expect_transition(transition(
            RitualState::Feedback,
            false,
            &conv,
            Event::Input(Input::No),
        ));
        assert_eq!(t.next, Some(RitualState::RegularUse));
        assert!(t
            .effects
            .contains(&Effect::RecordFeedback(FeedbackCategory::DiscomfortNotWorsening)));
    }

    #[test]
    fn test_start_rules() {
        let conv = Conversation::default();
        assert_eq!(
            transition(RitualState::Feedback, false, &conv, Event::Start),
            Outcome::Rejected(Rejection::AlreadyStarted)
        );
        let t = expect_transition(transition(RitualState::Pause, true, &conv, Event::Start));
        assert_eq!(t.next, Some(RitualState::Init));
        assert!(t.effects.contains(&Effect::SetPause(false)));
        let t = expect_transition(transition(RitualState::Init, false, &conv, Event::Start));
        assert_eq!(t.next, Some(RitualState::Init));
    }

    #[test]
    fn test_resume_requires_pause() {
        let conv = Conversation {
            question_index: 3,
            awaiting_detail: false,
        };
        assert_eq!(
            transition(RitualState::ReadyForSession, false, &conv, Event::Resume),
            Outcome::Rejected(Rejection::NotPaused)
        );
        let t = expect_transition(transition(RitualState::Pause, true, &conv, Event::Resume));
        assert_eq!(t.next, Some(RitualState::CheckContraindications));
        let mut conv = conv;
        for e in &t.effects {
            conv.apply(e);
        }
        assert_eq!(conv.question_index, 0);
    }

    #[test]
    fn test_reprompt_only_from_regular_use_unpaused() {
        let conv = Conversation::default();
        assert_eq!(
            transition(RitualState::RegularUse, true, &conv, Event::RepromptElapsed),
            Outcome::Ignored
        );
        assert_eq!(
            transition(RitualState::Pause, false, &conv, Event::RepromptElapsed),
            Outcome::Ignored
        );
        let t = expect_transition(transition(
            RitualState::RegularUse,
            false,
            &conv,
            Event::RepromptElapsed,
        ));
        assert_eq!(t.next, Some(RitualState::ReadyForSession));
    }
}
