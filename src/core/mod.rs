//! 核心层：状态定义、转移表、计时器登记、流程引擎、错误与优雅关闭

pub mod engine;
pub mod error;
pub mod machine;
pub mod shutdown;
pub mod state;
pub mod timer;

pub use engine::{RitualEngine, RitualSettings};
pub use error::RegimenError;
pub use machine::{Conversation, Effect, Event, Input, Outcome, Rejection, Transition};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{FeedbackCategory, RitualState};
pub use timer::{TimerKind, TimerRegistry};
