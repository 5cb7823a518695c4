//! 生成式后端抽象
//!
//! 编排核心只依赖 ChatBackend：给定本轮输入、最近历史、附件与当前 Agent，返回回复文本、
//! 引用来源，以及（分诊时）转接决策；失败时返回 BackendError 交给限流识别器检查。

use async_trait::async_trait;
use thiserror::Error;

use crate::agent::Agent;
use crate::conversation::{Attachment, Message, Source};
use crate::llm::HandoffDecision;

/// 后端一次成功调用的结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendReply {
    pub text: String,
    pub sources: Vec<Source>,
    /// 仅分诊 Agent 的回复携带
    pub handoff: Option<HandoffDecision>,
}

impl BackendReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    /// 由分诊后端返回的原始 JSON 构造；无法解析时使用澄清提示兜底
    pub fn triage(raw_json: &str) -> Self {
        let decision = HandoffDecision::parse_or_fallback(raw_json);
        Self {
            text: decision.reply_text().to_string(),
            sources: Vec::new(),
            handoff: Some(decision),
        }
    }
}

/// 后端调用失败；status / details / retry_after_secs 供限流识别使用
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("backend error: {message}")]
pub struct BackendError {
    /// HTTP 状态码（若可得）
    pub status: Option<u16>,
    pub message: String,
    /// 原始错误体 / 调试输出，关键字检查时一并扫描
    pub details: Option<String>,
    /// 显式的 retry-after（秒）
    pub retry_after_secs: Option<u64>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            details: None,
            retry_after_secs: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}

/// 生成式后端：每次调用相互独立，历史由调用方截断后传入
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_message(
        &self,
        query: &str,
        history: &[Message],
        attachments: &[Attachment],
        agent: &Agent,
    ) -> Result<BackendReply, BackendError>;

    /// 后端名称（用于日志）
    fn name(&self) -> &str {
        "backend"
    }
}
