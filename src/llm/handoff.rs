//! 分诊转接决策
//!
//! 分诊后端必须输出 JSON：{"handoff": bool, "agentId"?, "message"?, "reason"?}。
//! 模型偶尔会用 Markdown 代码块包裹或输出非法 JSON，此时降级为「请换个说法」的澄清回复。

use serde::{Deserialize, Serialize};

/// JSON 无法解析时的澄清提示
pub const FALLBACK_CLARIFICATION: &str = "Could you please rephrase your request?";

/// 分诊回复没有 message 时展示的占位文本
pub const PROCESSING_PLACEHOLDER: &str = "Processing...";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffDecision {
    #[serde(default)]
    pub handoff: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HandoffDecision {
    /// 不转接、由分诊直接回复
    pub fn reply(message: impl Into<String>) -> Self {
        Self {
            handoff: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// 转接到指定专家
    pub fn to_agent(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            handoff: true,
            agent_id: Some(agent_id.into()),
            message: Some(message.into()),
            reason: None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(strip_code_fence(raw))
    }

    /// 解析失败时返回 {handoff: false, message: 澄清提示}
    pub fn parse_or_fallback(raw: &str) -> Self {
        match Self::parse(raw) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!("Failed to parse triage JSON: {}", e);
                Self::reply(FALLBACK_CLARIFICATION)
            }
        }
    }

    /// 展示给用户的文本
    pub fn reply_text(&self) -> &str {
        self.message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(PROCESSING_PLACEHOLDER)
    }
}

/// 去掉 ```json ... ``` 包裹
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
