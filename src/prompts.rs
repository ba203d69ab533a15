//! 消息文本与按钮集合
//!
//! 语气保持中性：不诊断、不给医疗建议，只记录使用情况与主观感受。

use serde::Serialize;

use crate::core::RitualState;

pub const BTN_BEGIN: &str = "Begin";
pub const BTN_CONFIRM: &str = "Confirm";
pub const BTN_DECLINE: &str = "Decline";
pub const BTN_YES: &str = "Yes";
pub const BTN_NO: &str = "No";
pub const BTN_BEGIN_SESSION: &str = "Begin session";
pub const BTN_CONTINUE: &str = "Continue";
pub const BTN_COMFORTABLE: &str = "Comfortable";
pub const BTN_NEUTRAL: &str = "Neutral";
pub const BTN_DISCOMFORT: &str = "Discomfort";

/// 禁忌筛查问题（固定顺序）
pub const CONTRAINDICATION_QUESTIONS: [&str; 5] = [
    "Are you experiencing any pain?",
    "Do you feel generally unwell?",
    "Do you have dizziness or nausea?",
    "Do you have a raised temperature?",
    "Do you have any contraindications?",
];

pub const INIT: &str =
    "This system helps you build regular use of a physical product. It is not a medical device.";
pub const CONFIRM_CONDITIONS: &str =
    "The product is used only while seated, under your own weight and while clothed.";
pub const READY_FOR_SESSION: &str =
    "The first session is an adaptation session. Its purpose is to learn how your body responds.";
pub const SESSION_ACTIVE: &str = "Session started. No messages will be sent until the timer ends.";
pub const POST_SESSION: &str = "Session finished. Take a short break and notice how you feel.";
pub const FEEDBACK: &str = "How do you feel?";
pub const DISCOMFORT_DETAIL: &str = "Were the sensations unpleasant or getting stronger?";
pub const REGULAR_USE: &str = "Your feedback is recorded. Regularity matters more than any single session.";
pub const PAUSE: &str = "Use is paused. You can return only when there is no discomfort.";
pub const READY_FOR_NEXT: &str = "Ready for the next session?";

pub const ALREADY_STARTED: &str = "Already started. Use /status to check your current state.";
pub const NO_PAUSE: &str = "Pause is not active. Use /status to check your current state.";
pub const GENERIC_FAILURE: &str = "Something went wrong. Please start again with /start.";

pub const HELP: &str = "Available commands:\n\
/start - start the system\n\
/status - current state\n\
/pause - pause use\n\
/resume - try to return\n\
/help - this help\n\n\
This bot accompanies the use of a physical product.";

/// 发往 Dispatcher 的一条提示：文本 + 可选按钮
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub user_id: String,
    pub text: String,
    pub options: Vec<String>,
}

impl Prompt {
    pub fn new(user_id: &str, text: impl Into<String>, options: &[&str]) -> Self {
        Self {
            user_id: user_id.to_string(),
            text: text.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    pub fn text(user_id: &str, text: impl Into<String>) -> Self {
        Self::new(user_id, text, &[])
    }
}

/// 某状态下的按钮集合；SessionActive / RegularUse / Pause 不显示按钮
pub fn options_for(state: RitualState, awaiting_detail: bool) -> &'static [&'static str] {
    match state {
        RitualState::Init => &[BTN_BEGIN],
        RitualState::ConfirmConditions => &[BTN_CONFIRM, BTN_DECLINE],
        RitualState::CheckContraindications => &[BTN_YES, BTN_NO],
        RitualState::ReadyForSession => &[BTN_BEGIN_SESSION],
        RitualState::PostSession => &[BTN_CONTINUE],
        RitualState::Feedback if awaiting_detail => &[BTN_YES, BTN_NO],
        RitualState::Feedback => &[BTN_COMFORTABLE, BTN_NEUTRAL, BTN_DISCOMFORT],
        RitualState::SessionActive | RitualState::RegularUse | RitualState::Pause => &[],
    }
}

/// 进入某状态时发送的提示
///
/// `question_index` 仅在 CheckContraindications 中使用；`awaiting_detail` 仅在 Feedback 中使用。
pub fn state_prompt(
    user_id: &str,
    state: RitualState,
    question_index: usize,
    awaiting_detail: bool,
) -> Prompt {
    let text = match state {
        RitualState::Init => INIT,
        RitualState::ConfirmConditions => CONFIRM_CONDITIONS,
        RitualState::CheckContraindications => CONTRAINDICATION_QUESTIONS
            .get(question_index)
            .copied()
            .unwrap_or(CONTRAINDICATION_QUESTIONS[0]),
        RitualState::ReadyForSession => READY_FOR_SESSION,
        RitualState::SessionActive => SESSION_ACTIVE,
        RitualState::PostSession => POST_SESSION,
        RitualState::Feedback if awaiting_detail => DISCOMFORT_DETAIL,
        RitualState::Feedback => FEEDBACK,
        RitualState::RegularUse => REGULAR_USE,
        RitualState::Pause => PAUSE,
    };
    Prompt::new(user_id, text, options_for(state, awaiting_detail))
}

/// /status 的只读投影
pub fn status_text(state: RitualState, session_count: u32, paused: bool) -> String {
    format!(
        "Your status:\n\nCurrent state: {}\nSessions completed: {}\nPause: {}\n\nUse /help for the list of commands",
        state.label(),
        session_count,
        if paused { "on" } else { "off" }
    )
}
