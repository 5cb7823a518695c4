//! 离线与脚本化后端（无需 API）
//!
//! - OfflineBackend：分诊按关键词路由，专家返回固定话术，便于本地跑通转接流程；
//! - ScriptedBackend：按顺序吐出预置回复并记录每次调用，供测试断言。

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::agent::Agent;
use crate::conversation::{Attachment, Message};
use crate::llm::{BackendError, BackendReply, ChatBackend, HandoffDecision};

/// 关键词路由表：(专家 id, 触发词)
pub type KeywordRoute = (String, Vec<String>);

/// 离线后端：分诊按关键词决定是否转接
#[derive(Debug, Clone)]
pub struct OfflineBackend {
    routes: Vec<KeywordRoute>,
}

impl OfflineBackend {
    pub fn new(routes: Vec<KeywordRoute>) -> Self {
        Self { routes }
    }

    fn route(&self, query: &str) -> Option<&str> {
        let lower = query.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.routes
            .iter()
            .find(|(_, keywords)| {
                keywords
                    .iter()
                    .any(|k| words.iter().any(|w| w.starts_with(k.as_str())))
            })
            .map(|(id, _)| id.as_str())
    }

    fn triage_reply(&self, query: &str, history: &[Message]) -> BackendReply {
        let decision = match self.route(query) {
            Some(agent_id) => HandoffDecision {
                handoff: true,
                agent_id: Some(agent_id.to_string()),
                message: Some("Great question! Let me connect you with the right specialist. One moment...".to_string()),
                reason: Some("keyword match".to_string()),
            },
            None if history.is_empty() => HandoffDecision::reply(
                "Hi there! I'm your Support Guide. I can connect you with an expert in Domains & Billing, \
Repos & Actions, or Security & API. What brings you here today?",
            ),
            None => HandoffDecision::reply(
                "I'd be happy to help! Could you tell me a bit more about what you're trying to accomplish?",
            ),
        };
        BackendReply {
            text: decision.reply_text().to_string(),
            sources: Vec::new(),
            handoff: Some(decision),
        }
    }
}

impl Default for OfflineBackend {
    fn default() -> Self {
        let route = |id: &str, words: &[&str]| -> KeywordRoute {
            (id.to_string(), words.iter().map(|w| w.to_string()).collect())
        };
        Self::new(vec![
            route("agent-1", &["domain", "billing", "invoice", "payment", "account", "organization"]),
            route("agent-2", &["repo", "action", "git", "workflow", "runner", "merge", "branch", "pipeline"]),
            route("agent-3", &["security", "api", "token", "permission", "auth", "dependabot", "secret"]),
        ])
    }
}

#[async_trait]
impl ChatBackend for OfflineBackend {
    async fn send_message(
        &self,
        query: &str,
        history: &[Message],
        _attachments: &[Attachment],
        agent: &Agent,
    ) -> Result<BackendReply, BackendError> {
        match agent {
            Agent::Triage(_) => Ok(self.triage_reply(query, history)),
            Agent::Specialist(p) if query.starts_with("[SYSTEM: You have just been assigned") => {
                Ok(BackendReply::text(format!(
                    "Hi, I'm {}, your {} specialist. I can help with {}. How can I help you today?",
                    p.name, p.role, p.description
                )))
            }
            Agent::Specialist(p) => Ok(BackendReply::text(format!(
                "{} here (offline mode). You asked: {}",
                p.name, query
            ))),
        }
    }

    fn name(&self) -> &str {
        "offline"
    }
}

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub query: String,
    pub history: Vec<Message>,
    pub attachments: Vec<Attachment>,
    pub agent: Agent,
}

/// 脚本化后端：按入队顺序返回结果；队列耗尽后返回空文本回复
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<BackendReply, BackendError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_reply(&self, reply: BackendReply) {
        self.script.lock().await.push_back(Ok(reply));
    }

    pub async fn push_error(&self, error: BackendError) {
        self.script.lock().await.push_back(Err(error));
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send_message(
        &self,
        query: &str,
        history: &[Message],
        attachments: &[Attachment],
        agent: &Agent,
    ) -> Result<BackendReply, BackendError> {
        self.calls.lock().await.push(RecordedCall {
            query: query.to_string(),
            history: history.to_vec(),
            attachments: attachments.to_vec(),
            agent: agent.clone(),
        });
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(BackendReply::default()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRoster;

    #[tokio::test]
    async fn test_offline_triage_routes_by_keyword() {
        let roster = AgentRoster::default();
        let backend = OfflineBackend::default();
        let reply = backend
            .send_message("How do I reset my domain?", &[], &[], roster.triage())
            .await
            .unwrap();
        let decision = reply.handoff.unwrap();
        assert!(decision.handoff);
        assert_eq!(decision.agent_id.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn test_offline_triage_greets_without_keyword() {
        let roster = AgentRoster::default();
        let backend = OfflineBackend::default();
        let reply = backend
            .send_message("hello", &[], &[], roster.triage())
            .await
            .unwrap();
        assert!(!reply.handoff.unwrap().handoff);
        assert!(reply.text.starts_with("Hi there!"));
    }

    #[tokio::test]
    async fn test_scripted_backend_records_calls() {
        let roster = AgentRoster::default();
        let backend = ScriptedBackend::new();
        backend.push_error(BackendError::new("boom")).await;

        let first = backend.send_message("a", &[], &[], roster.triage()).await;
        assert!(first.is_err());
        let second = backend.send_message("b", &[], &[], roster.triage()).await;
        assert_eq!(second.unwrap(), BackendReply::default());

        let calls = backend.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].query, "b");
    }
}
