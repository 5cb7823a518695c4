//! 状态投影：DeskSnapshot
//!
//! 渲染层只持有轻量快照（当前 Agent、消息、转接阶段、空闲警告、限流提示、会话列表）；
//! 完整状态由编排器维护，每次命令或计时事件处理完后投影一次。

use serde::Serialize;

use crate::agent::{Agent, AgentProfile};
use crate::conversation::Message;
use crate::core::connecting::ConnectPhase;
use crate::core::rate_limit::RateLimitState;
use crate::core::sessions::Session;

/// 对话所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeskPhase {
    /// 与分诊 Agent 对话
    Triage,
    /// 转接动画进行中，输入暂停
    Connecting,
    /// 与专家对话
    WithSpecialist,
}

/// 渲染层看到的投影状态
#[derive(Clone, Debug, Serialize)]
pub struct DeskSnapshot {
    pub phase: DeskPhase,
    pub agent: Agent,
    pub messages: Vec<Message>,
    /// 等待后端回复时为 true
    pub busy: bool,
    pub input_locked: bool,
    pub connect_phase: Option<ConnectPhase>,
    pub pending_agent: Option<AgentProfile>,
    /// 空闲警告可见时的 M:SS 倒计时
    pub idle_warning: Option<String>,
    pub rate_limit: Option<RateLimitState>,
    pub rate_limit_countdown: Option<String>,
    pub sessions: Vec<Session>,
    pub current_session: Option<String>,
    pub selected_session: Option<String>,
    /// 会话结束后「已断开」提示中的专家
    pub disconnected_agent: Option<AgentProfile>,
}

impl DeskSnapshot {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn active_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(|s| s.is_active)
    }

    pub fn history_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(|s| !s.is_active)
    }
}
