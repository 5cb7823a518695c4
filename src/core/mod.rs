//! 编排核心：转接状态机、会话登记、空闲监管、限流识别、计时任务与运行时循环

pub mod connecting;
pub mod error;
pub mod events;
pub mod idle;
pub mod orchestrator;
pub mod rate_limit;
pub mod runtime;
pub mod sessions;
pub mod shutdown;
pub mod state;
pub mod timers;

pub use connecting::{ConnectPhase, ConnectingConfig, ConnectingSequence};
pub use error::DeskError;
pub use events::DeskEvent;
pub use idle::{format_countdown, IdleConfig, IdleEvent, IdlePhase, IdleSupervisor};
pub use orchestrator::{
    ConversationOrchestrator, DeskSettings, EndReason, HandoffState, SubmitOutcome,
};
pub use rate_limit::{LimitType, RateLimitClassifier, RateLimitState};
pub use runtime::{create_backend_from_config, create_desk, spawn_desk, Command};
pub use sessions::{derive_title, Session, SessionRegistry};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{DeskPhase, DeskSnapshot};
pub use timers::TimerSupervisor;
