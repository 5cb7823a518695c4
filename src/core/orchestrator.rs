//! 对话编排器
//!
//! 持有分诊/专家状态机、消息记录、会话登记、空闲监管与转接动画；
//! 每次用户提交最多一个在途后端调用（&mut self 保证）。计时任务只发事件，
//! 由 handle_event 在同一个所有者上推进状态，过期 generation 的事件直接忽略。
//!
//! 状态流转：
//! - Triage --有效转接--> Connecting --动画完成--> WithSpecialist
//! - WithSpecialist --空闲超时 / 用户结束--> Triage
//! - Connecting --取消 / 切换会话 / 关闭--> Triage（无副作用）

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::agent::{Agent, AgentProfile, AgentRoster};
use crate::config::AppConfig;
use crate::conversation::{Attachment, Message, Transcript};
use crate::core::connecting::{ConnectingConfig, ConnectingSequence};
use crate::core::events::{DeskEvent, EventReceiver};
use crate::core::idle::{IdleConfig, IdleEvent, IdleSupervisor};
use crate::core::rate_limit::{RateLimitClassifier, RateLimitState};
use crate::core::sessions::SessionRegistry;
use crate::core::state::{DeskPhase, DeskSnapshot};
use crate::core::timers::TimerSupervisor;
use crate::llm::prompts::handoff_greeting_context;
use crate::llm::{BackendError, BackendReply, ChatBackend};

pub const DEFAULT_HANDOFF_NOTICE: &str = "Connecting you to an expert...";
pub const APOLOGY_MESSAGE: &str = "I'm sorry, I encountered an error. Please try again.";
pub const IDLE_END_NOTICE: &str =
    "Session ended due to inactivity. Feel free to start a new conversation!";
pub const USER_END_NOTICE: &str = "Session ended. Feel free to start a new conversation!";

/// 转接状态机
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffState {
    Triage,
    Connecting {
        target: AgentProfile,
        original_query: String,
    },
    WithSpecialist(AgentProfile),
}

/// 一次 submit_user_message 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// 空输入且无附件
    Ignored,
    /// 转接动画进行中，输入暂停
    Suspended,
    /// 限流未到期
    Throttled(RateLimitState),
    Replied,
    HandoffStarted { agent_id: String },
    RateLimited(RateLimitState),
    Failed(BackendError),
}

/// 会话结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    IdleTimeout,
    UserEnded,
}

impl EndReason {
    fn notice(self) -> &'static str {
        match self {
            EndReason::IdleTimeout => IDLE_END_NOTICE,
            EndReason::UserEnded => USER_END_NOTICE,
        }
    }
}

/// 编排器的可调参数
#[derive(Debug, Clone)]
pub struct DeskSettings {
    /// 每次调用携带的历史条数
    pub history_window: usize,
    pub idle: IdleConfig,
    pub connecting: ConnectingConfig,
    pub classifier: RateLimitClassifier,
}

impl Default for DeskSettings {
    fn default() -> Self {
        Self {
            history_window: 6,
            idle: IdleConfig::default(),
            connecting: ConnectingConfig::default(),
            classifier: RateLimitClassifier::default(),
        }
    }
}

impl DeskSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            history_window: cfg.llm.history_window,
            idle: cfg.idle.to_idle_config(),
            connecting: cfg.connecting.to_connecting_config(),
            classifier: RateLimitClassifier::new(cfg.free_tier(), cfg.rate_limit.limit_paid_429),
        }
    }
}

pub struct ConversationOrchestrator {
    backend: Arc<dyn ChatBackend>,
    roster: AgentRoster,
    history_window: usize,
    classifier: RateLimitClassifier,
    state: HandoffState,
    transcript: Transcript,
    sessions: SessionRegistry,
    selected_session: Option<String>,
    rate_limit: Option<RateLimitState>,
    disconnected: Option<AgentProfile>,
    idle: IdleSupervisor,
    connecting: ConnectingSequence,
    timers: TimerSupervisor,
}

impl ConversationOrchestrator {
    /// 创建编排器，同时返回计时事件的接收端（由运行时循环消费并回传给 handle_event）
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        roster: AgentRoster,
        settings: DeskSettings,
    ) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let timers = TimerSupervisor::new();
        let idle = IdleSupervisor::new(settings.idle, events_tx.clone(), timers.child_token());
        let connecting =
            ConnectingSequence::new(settings.connecting, events_tx, timers.child_token());

        let orchestrator = Self {
            backend,
            roster,
            history_window: settings.history_window,
            classifier: settings.classifier,
            state: HandoffState::Triage,
            transcript: Transcript::new(),
            sessions: SessionRegistry::new(),
            selected_session: None,
            rate_limit: None,
            disconnected: None,
            idle,
            connecting,
            timers,
        };
        (orchestrator, events_rx)
    }

    pub fn state(&self) -> &HandoffState {
        &self.state
    }

    /// 当前 Agent；转接动画期间仍是分诊
    pub fn current_agent(&self) -> Agent {
        match &self.state {
            HandoffState::WithSpecialist(profile) => Agent::Specialist(profile.clone()),
            HandoffState::Triage | HandoffState::Connecting { .. } => self.roster.triage().clone(),
        }
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn idle(&self) -> &IdleSupervisor {
        &self.idle
    }

    pub fn connecting(&self) -> &ConnectingSequence {
        &self.connecting
    }

    pub fn rate_limit(&self) -> Option<&RateLimitState> {
        self.rate_limit.as_ref()
    }

    pub fn disconnected_agent(&self) -> Option<&AgentProfile> {
        self.disconnected.as_ref()
    }

    pub fn selected_session(&self) -> Option<&str> {
        self.selected_session.as_deref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.timers.is_torn_down()
    }

    /// 处理一条用户输入
    pub async fn submit_user_message(
        &mut self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> SubmitOutcome {
        if text.trim().is_empty() && attachments.is_empty() {
            return SubmitOutcome::Ignored;
        }
        if matches!(self.state, HandoffState::Connecting { .. }) {
            tracing::debug!("Input suspended while connecting");
            return SubmitOutcome::Suspended;
        }
        self.refresh_rate_limit();
        if let Some(limit) = &self.rate_limit {
            if limit.blocks_input(Utc::now()) {
                return SubmitOutcome::Throttled(limit.clone());
            }
        }

        // 历史取本轮之前的最近 N 条
        let history = self.transcript.recent(self.history_window).to_vec();
        let agent = self.current_agent();
        self.transcript.push(Message::user(text, attachments.clone()));
        self.sync_idle();

        tracing::info!(agent = %agent.id(), "Submitting user message");
        match self
            .backend
            .send_message(text, &history, &attachments, &agent)
            .await
        {
            Ok(reply) => {
                self.rate_limit = None;
                self.on_reply(text, reply, &agent)
            }
            Err(err) => self.on_failure(err),
        }
    }

    fn on_reply(&mut self, query: &str, reply: BackendReply, agent: &Agent) -> SubmitOutcome {
        if agent.is_triage() {
            if let Some(decision) = reply.handoff.as_ref().filter(|d| d.handoff) {
                let target = decision
                    .agent_id
                    .as_deref()
                    .and_then(|id| self.roster.resolve(id));
                match target {
                    Some(Agent::Specialist(profile)) => {
                        let notice = decision
                            .message
                            .clone()
                            .filter(|m| !m.trim().is_empty())
                            .unwrap_or_else(|| DEFAULT_HANDOFF_NOTICE.to_string());
                        return self.begin_handoff(profile, query, notice);
                    }
                    _ => {
                        tracing::warn!(
                            agent_id = ?decision.agent_id,
                            "Handoff target not found, treating as a plain reply"
                        );
                    }
                }
            }
        }

        self.transcript
            .push(Message::model(reply.text.as_str(), reply.sources));
        if let Some(id) = self.sessions.current_id().map(str::to_string) {
            self.sessions.record_reply(&id, &reply.text);
        }
        self.idle.reset_timer();
        SubmitOutcome::Replied
    }

    fn on_failure(&mut self, err: BackendError) -> SubmitOutcome {
        tracing::error!(status = ?err.status, "Backend call failed: {}", err);
        if let Some(limit) = self.classifier.classify(&err) {
            self.rate_limit = Some(limit.clone());
            return SubmitOutcome::RateLimited(limit);
        }
        self.transcript.push(Message::model(APOLOGY_MESSAGE, Vec::new()));
        SubmitOutcome::Failed(err)
    }

    fn begin_handoff(&mut self, target: AgentProfile, query: &str, notice: String) -> SubmitOutcome {
        tracing::info!(agent_id = %target.id, agent = %target.name, "Handoff started");
        self.transcript.push(Message::system_notice(notice));
        let agent_id = target.id.clone();
        self.state = HandoffState::Connecting {
            target,
            original_query: query.to_string(),
        };
        self.connecting.start();
        self.sync_idle();
        SubmitOutcome::HandoffStarted { agent_id }
    }

    /// 处理计时事件
    pub async fn handle_event(&mut self, event: DeskEvent) {
        match event {
            DeskEvent::IdleTick { generation } => {
                for fired in self.idle.on_tick(generation) {
                    match fired {
                        IdleEvent::Warning { remaining } => {
                            tracing::info!(remaining_secs = remaining.as_secs(), "Idle warning shown");
                        }
                        IdleEvent::Timeout => {
                            tracing::info!("Idle timeout reached");
                            self.end_conversation(EndReason::IdleTimeout);
                        }
                    }
                }
            }
            DeskEvent::ConnectPhase { generation, phase } => {
                if self.connecting.on_phase(generation, phase) {
                    tracing::debug!(?phase, "Connecting phase");
                }
            }
            DeskEvent::ConnectComplete { generation } => {
                if self.connecting.on_complete(generation) {
                    self.complete_connection().await;
                }
            }
        }
    }

    /// 转接动画完成：切换专家、开会话、拉取开场白
    pub async fn complete_connection(&mut self) {
        let (target, original_query) =
            match std::mem::replace(&mut self.state, HandoffState::Triage) {
                HandoffState::Connecting {
                    target,
                    original_query,
                } => (target, original_query),
                other => {
                    self.state = other;
                    return;
                }
            };

        self.connecting.abort();
        self.state = HandoffState::WithSpecialist(target.clone());
        self.disconnected = None;
        let session_id = self.sessions.open_session(
            &target.id,
            &original_query,
            &format!("Connected to {}", target.name),
        );
        self.selected_session = Some(session_id.clone());
        tracing::info!(agent_id = %target.id, session_id = %session_id, "Connected to specialist");

        let agent = Agent::Specialist(target);
        let history = self.transcript.recent(self.history_window).to_vec();
        let context = handoff_greeting_context(&original_query);
        match self.backend.send_message(&context, &history, &[], &agent).await {
            Ok(reply) => {
                self.rate_limit = None;
                self.sessions.record_reply(&session_id, &reply.text);
                self.transcript.push(Message::model(reply.text, reply.sources));
            }
            Err(err) => {
                tracing::error!("Failed to get specialist greeting: {}", err);
                if let Some(limit) = self.classifier.classify(&err) {
                    self.rate_limit = Some(limit);
                }
            }
        }

        self.sync_idle();
        self.idle.reset_timer();
    }

    /// 结束当前专家对话并回到分诊；不在专家状态时忽略
    pub fn end_conversation(&mut self, reason: EndReason) -> bool {
        let agent = match &self.state {
            HandoffState::WithSpecialist(profile) => profile.clone(),
            _ => return false,
        };

        if let Some(id) = self.sessions.current_id().map(str::to_string) {
            self.sessions.end_session(&id);
        }
        self.transcript.push(Message::system_notice(reason.notice()));
        tracing::info!(agent_id = %agent.id, ?reason, "Conversation ended");
        self.disconnected = Some(agent);
        self.state = HandoffState::Triage;
        self.sync_idle();
        true
    }

    pub fn end_session_by_user(&mut self) -> bool {
        self.end_conversation(EndReason::UserEnded)
    }

    /// 用户在空闲警告中选择继续
    pub fn dismiss_idle_warning(&mut self) {
        self.idle.dismiss_warning();
    }

    /// 切换到某个会话：换成该会话的 Agent（找不到时回到分诊）并清空消息，不回放记录
    pub fn select_session(&mut self, id: &str) -> bool {
        let (agent_id, is_active) = match self.sessions.get(id) {
            Some(session) => (session.agent_id.clone(), session.is_active),
            None => return false,
        };

        self.connecting.abort();
        if is_active {
            self.sessions.set_current(id);
        }
        self.selected_session = Some(id.to_string());
        self.state = match self.roster.resolve(&agent_id) {
            Some(Agent::Specialist(profile)) => HandoffState::WithSpecialist(profile),
            _ => HandoffState::Triage,
        };
        self.transcript.clear();
        self.disconnected = None;
        self.sync_idle();
        tracing::info!(session_id = %id, agent_id = %agent_id, "Session selected");
        true
    }

    /// 中止进行中的转接，回到分诊
    pub fn cancel_handoff(&mut self) -> bool {
        if !matches!(self.state, HandoffState::Connecting { .. }) {
            return false;
        }
        self.connecting.abort();
        self.state = HandoffState::Triage;
        tracing::info!("Handoff cancelled");
        true
    }

    pub fn dismiss_disconnect(&mut self) {
        self.disconnected = None;
    }

    /// 取消全部计时任务；之后不会再有事件被处理
    pub fn shutdown(&mut self) {
        self.cancel_handoff();
        self.idle.set_enabled(false);
        self.timers.teardown();
    }

    /// 空闲监管只在「专家 + 对话非空」时启用
    fn sync_idle(&mut self) {
        let enabled = matches!(self.state, HandoffState::WithSpecialist(_))
            && !self.transcript.is_empty()
            && !self.timers.is_torn_down();
        self.idle.set_enabled(enabled);
    }

    fn refresh_rate_limit(&mut self) {
        if self
            .rate_limit
            .as_ref()
            .is_some_and(|l| l.is_expired(Utc::now()))
        {
            tracing::info!("Rate limit window passed");
            self.rate_limit = None;
        }
    }

    pub fn snapshot(&self) -> DeskSnapshot {
        let now = Utc::now();
        let (phase, pending_agent) = match &self.state {
            HandoffState::Triage => (DeskPhase::Triage, None),
            HandoffState::Connecting { target, .. } => (DeskPhase::Connecting, Some(target.clone())),
            HandoffState::WithSpecialist(_) => (DeskPhase::WithSpecialist, None),
        };
        let rate_limit = self
            .rate_limit
            .clone()
            .filter(|l| !l.is_expired(now));
        let throttled = rate_limit.as_ref().is_some_and(|l| l.blocks_input(now));

        DeskSnapshot {
            phase,
            agent: self.current_agent(),
            messages: self.transcript.messages().to_vec(),
            busy: false,
            input_locked: phase == DeskPhase::Connecting || throttled,
            connect_phase: self.connecting.phase(),
            pending_agent,
            idle_warning: self
                .idle
                .warning_visible()
                .then(|| self.idle.countdown()),
            rate_limit_countdown: rate_limit.as_ref().and_then(|l| l.countdown(now)),
            rate_limit,
            sessions: self.sessions.sessions().to_vec(),
            current_session: self.sessions.current_id().map(str::to_string),
            selected_session: self.selected_session.clone(),
            disconnected_agent: self.disconnected.clone(),
        }
    }
}
