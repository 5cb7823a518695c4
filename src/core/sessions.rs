//! 会话登记
//!
//! 每次转接完成时开一个会话，按最近优先排列；会话只会被结束、从不删除。
//! 同一时刻最多一个「当前会话」，其它会话即便 is_active 仍为 true 也保持原样。

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_TITLE: &str = "New Conversation";
pub const ENDED_SUMMARY: &str = "Session ended";
const TITLE_MAX_CHARS: usize = 40;
const SUMMARY_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub title: String,
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// 最近的在前
    sessions: Vec<Session>,
    current: Option<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新开会话并设为当前，返回会话 id
    pub fn open_session(&mut self, agent_id: &str, first_query: &str, opening_summary: &str) -> String {
        let now = Utc::now();
        let id = format!(
            "sess-{}-{}",
            now.timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let session = Session {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            title: derive_title(first_query),
            last_message: opening_summary.to_string(),
            timestamp: now,
            is_active: true,
        };
        tracing::info!(session_id = %id, agent_id, title = %session.title, "Session opened");
        self.sessions.insert(0, session);
        self.current = Some(id.clone());
        id
    }

    /// 记录最新回复摘要；未知 id 忽略
    pub fn record_reply(&mut self, id: &str, text: &str) {
        if let Some(s) = self.sessions.iter_mut().find(|s| s.id == id) {
            s.last_message = summarize_reply(text);
            s.timestamp = Utc::now();
        }
    }

    /// 结束会话；可重复调用，未知 id 不做任何事
    pub fn end_session(&mut self, id: &str) {
        if let Some(s) = self.sessions.iter_mut().find(|s| s.id == id) {
            if s.is_active {
                tracing::info!(session_id = %id, "Session ended");
            }
            s.is_active = false;
            s.last_message = ENDED_SUMMARY.to_string();
        }
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
    }

    /// 切换当前会话；未知 id 返回 false
    pub fn set_current(&mut self, id: &str) -> bool {
        if self.get(id).is_some() {
            self.current = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn active(&self) -> Vec<&Session> {
        self.sessions.iter().filter(|s| s.is_active).collect()
    }

    pub fn history(&self) -> Vec<&Session> {
        self.sessions.iter().filter(|s| !s.is_active).collect()
    }
}

/// 会话标题：首条提问，超过 40 字符截断加 "..."，空白时用默认标题
pub fn derive_title(first_query: &str) -> String {
    if first_query.trim().is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if first_query.chars().count() > TITLE_MAX_CHARS {
        let head: String = first_query.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        first_query.to_string()
    }
}

pub fn summarize_reply(text: &str) -> String {
    let head: String = text.chars().take(SUMMARY_MAX_CHARS).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title(""), "New Conversation");
        assert_eq!(derive_title("   "), "New Conversation");
        assert_eq!(derive_title("How do I reset my domain?"), "How do I reset my domain?");
        let long = "a".repeat(41);
        assert_eq!(derive_title(&long), format!("{}...", "a".repeat(40)));
        assert_eq!(derive_title(&"b".repeat(40)), "b".repeat(40));
        let padded = format!(" {}", "a".repeat(40));
        assert_eq!(derive_title(&padded), format!(" {}...", "a".repeat(39)));
        assert_eq!(derive_title(" short "), " short ");
    }

    #[test]
    fn test_summarize_reply() {
        assert_eq!(summarize_reply("Hi"), "Hi...");
        assert_eq!(summarize_reply(&"x".repeat(80)), format!("{}...", "x".repeat(50)));
    }

    #[test]
    fn test_open_session_becomes_current() {
        let mut reg = SessionRegistry::new();
        let id = reg.open_session("agent-1", "How do I reset my domain?", "Connected to Nina");
        assert!(id.starts_with("sess-"));
        assert_eq!(reg.current_id(), Some(id.as_str()));
        let s = reg.get(&id).unwrap();
        assert!(s.is_active);
        assert_eq!(s.last_message, "Connected to Nina");
        assert_eq!(s.agent_id, "agent-1");
    }

    #[test]
    fn test_most_recent_first() {
        let mut reg = SessionRegistry::new();
        let a = reg.open_session("agent-1", "first", "Connected to Nina");
        let b = reg.open_session("agent-2", "second", "Connected to Jake");
        assert_ne!(a, b);
        assert_eq!(reg.sessions()[0].id, b);
        assert_eq!(reg.sessions()[1].id, a);
    }

    #[test]
    fn test_end_session_idempotent() {
        let mut reg = SessionRegistry::new();
        let id = reg.open_session("agent-1", "q", "Connected to Nina");
        reg.end_session(&id);
        let once = reg.get(&id).cloned().unwrap();
        reg.end_session(&id);
        assert_eq!(reg.get(&id), Some(&once));
        assert!(!once.is_active);
        assert_eq!(once.last_message, "Session ended");
        assert_eq!(reg.current_id(), None);
        assert_eq!(reg.history().len(), 1);

        reg.end_session("sess-missing");
        assert_eq!(reg.sessions().len(), 1);
    }

    #[test]
    fn test_multiple_active_sessions_preserved() {
        let mut reg = SessionRegistry::new();
        let a = reg.open_session("agent-1", "first", "Connected to Nina");
        let b = reg.open_session("agent-2", "second", "Connected to Jake");
        assert_eq!(reg.current_id(), Some(b.as_str()));
        assert_eq!(reg.active().len(), 2);
        assert!(reg.get(&a).unwrap().is_active);
    }

    #[test]
    fn test_record_reply() {
        let mut reg = SessionRegistry::new();
        let id = reg.open_session("agent-1", "q", "Connected to Nina");
        reg.record_reply(&id, "Sure, here is how you reset it");
        assert_eq!(reg.get(&id).unwrap().last_message, "Sure, here is how you reset it...");
        reg.record_reply("nope", "ignored");
    }

    #[test]
    fn test_set_current() {
        let mut reg = SessionRegistry::new();
        let a = reg.open_session("agent-1", "first", "Connected to Nina");
        reg.open_session("agent-2", "second", "Connected to Jake");
        assert!(reg.set_current(&a));
        assert_eq!(reg.current().unwrap().agent_id, "agent-1");
        assert!(!reg.set_current("unknown"));
        assert_eq!(reg.current_id(), Some(a.as_str()));
    }
}
