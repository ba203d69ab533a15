//! 状态定义：九个流程状态与反馈类别
//!
//! 持久化时使用稳定编码（S0..S8 / snake_case），展示时使用 `label()`。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 流程状态（FSM 的九个状态，无终止状态）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RitualState {
    Init,
    ConfirmConditions,
    CheckContraindications,
    ReadyForSession,
    SessionActive,
    PostSession,
    Feedback,
    RegularUse,
    Pause,
}

impl RitualState {
    pub const ALL: [RitualState; 9] = [
        RitualState::Init,
        RitualState::ConfirmConditions,
        RitualState::CheckContraindications,
        RitualState::ReadyForSession,
        RitualState::SessionActive,
        RitualState::PostSession,
        RitualState::Feedback,
        RitualState::RegularUse,
        RitualState::Pause,
    ];

    /// 持久化编码
    pub fn code(self) -> &'static str {
        match self {
            RitualState::Init => "S0",
            RitualState::ConfirmConditions => "S1",
            RitualState::CheckContraindications => "S2",
            RitualState::ReadyForSession => "S3",
            RitualState::SessionActive => "S4",
            RitualState::PostSession => "S5",
            RitualState::Feedback => "S6",
            RitualState::RegularUse => "S7",
            RitualState::Pause => "S8",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// /status 中展示的可读名称
    pub fn label(self) -> &'static str {
        match self {
            RitualState::Init => "Initialization",
            RitualState::ConfirmConditions => "Confirming conditions",
            RitualState::CheckContraindications => "Contraindication check",
            RitualState::ReadyForSession => "Ready for session",
            RitualState::SessionActive => "Session in progress",
            RitualState::PostSession => "Session finished",
            RitualState::Feedback => "Feedback",
            RitualState::RegularUse => "Regular use",
            RitualState::Pause => "Paused",
        }
    }
}

impl Default for RitualState {
    fn default() -> Self {
        RitualState::Init
    }
}

impl fmt::Display for RitualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// 反馈类别（含不适追问的两种结果）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCategory {
    Comfortable,
    Neutral,
    Discomfort,
    DiscomfortWorsening,
    DiscomfortNotWorsening,
}

impl FeedbackCategory {
    pub fn code(self) -> &'static str {
        match self {
            FeedbackCategory::Comfortable => "comfortable",
            FeedbackCategory::Neutral => "neutral",
            FeedbackCategory::Discomfort => "discomfort",
            FeedbackCategory::DiscomfortWorsening => "discomfort_worsening",
            FeedbackCategory::DiscomfortNotWorsening => "discomfort_not_worsening",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        [
            FeedbackCategory::Comfortable,
            FeedbackCategory::Neutral,
            FeedbackCategory::Discomfort,
            FeedbackCategory::DiscomfortWorsening,
            FeedbackCategory::DiscomfortNotWorsening,
        ]
        .into_iter()
        .find(|c| c.code() == code)
    }

    /// 追问结果附带的细节文本；普通类别没有细节
    pub fn detail(self) -> Option<&'static str> {
        match self {
            FeedbackCategory::DiscomfortWorsening => Some("worsening sensations"),
            FeedbackCategory::DiscomfortNotWorsening => Some("not worsening"),
            _ => None,
        }
    }
}

impl fmt::Display for FeedbackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_roundtrip_and_unique() {
        let codes: std::collections::HashSet<_> = RitualState::ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes.len(), 9);
        for s in RitualState::ALL {
            assert_eq!(RitualState::from_code(s.code()), Some(s));
        }
        assert_eq!(RitualState::from_code("S9"), None);
        assert_eq!(RitualState::default(), RitualState::Init);
    }

    #[test]
    fn test_feedback_detail_only_for_followups() {
        assert_eq!(FeedbackCategory::Comfortable.detail(), None);
        assert_eq!(FeedbackCategory::Discomfort.detail(), None);
        assert!(FeedbackCategory::DiscomfortWorsening.detail().is_some());
        assert_eq!(
            FeedbackCategory::from_code("discomfort_not_worsening"),
            Some(FeedbackCategory::DiscomfortNotWorsening)
        );
    }
}
