//! Agent 身份与花名册
//!
//! 分诊 Agent 与专家 Agent 共用 AgentProfile，但以标签枚举区分（Triage / Specialist），
//! 使转接状态机可以穷举匹配。AgentRoster 持有唯一的分诊哨兵与全部专家，按 id 解析。

use serde::{Deserialize, Serialize};

/// 分诊 Agent 的固定 id
pub const TRIAGE_AGENT_ID: &str = "triage";

/// Agent 的身份与行为描述；persona 仅供后端拼装系统提示词使用
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub role: String,
    pub description: String,
    #[serde(default)]
    pub persona: String,
}

impl AgentProfile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: role.into(),
            description: description.into(),
            persona: String::new(),
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }
}

/// 当前对话所绑定的 Agent
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "profile", rename_all = "snake_case")]
pub enum Agent {
    /// 入口分诊，只负责路由，不回答具体技术问题
    Triage(AgentProfile),
    /// 领域专家
    Specialist(AgentProfile),
}

impl Agent {
    pub fn profile(&self) -> &AgentProfile {
        match self {
            Agent::Triage(p) | Agent::Specialist(p) => p,
        }
    }

    pub fn id(&self) -> &str {
        &self.profile().id
    }

    pub fn name(&self) -> &str {
        &self.profile().name
    }

    pub fn is_triage(&self) -> bool {
        matches!(self, Agent::Triage(_))
    }
}

/// 花名册：一个分诊哨兵 + 若干专家
#[derive(Clone, Debug)]
pub struct AgentRoster {
    triage: Agent,
    specialists: Vec<AgentProfile>,
}

impl AgentRoster {
    pub fn new(triage: AgentProfile, specialists: Vec<AgentProfile>) -> Self {
        Self {
            triage: Agent::Triage(triage),
            specialists,
        }
    }

    pub fn triage(&self) -> &Agent {
        &self.triage
    }

    pub fn specialists(&self) -> &[AgentProfile] {
        &self.specialists
    }

    /// 按 id 查找专家；分诊 id 与未知 id 均返回 None
    pub fn resolve(&self, agent_id: &str) -> Option<Agent> {
        self.specialists
            .iter()
            .find(|p| p.id == agent_id)
            .cloned()
            .map(Agent::Specialist)
    }

    /// 查找专家，找不到时回落到分诊哨兵（用于切换历史会话）
    pub fn resolve_or_triage(&self, agent_id: &str) -> Agent {
        self.resolve(agent_id).unwrap_or_else(|| self.triage.clone())
    }
}

impl Default for AgentRoster {
    fn default() -> Self {
        Self::new(default_triage(), default_specialists())
    }
}

const INTRODUCE_ONCE: &str = "IMPORTANT: You only introduce yourself ONCE when a conversation starts \
(when you receive a [SYSTEM: You have just been assigned...] message). After that initial greeting, \
you should NEVER re-introduce yourself. Just answer questions directly and helpfully.";

pub fn default_triage() -> AgentProfile {
    AgentProfile::new(
        TRIAGE_AGENT_ID,
        "Devin",
        "Support Guide",
        "welcoming users and guiding them to the right expert",
    )
    .with_persona(
        "You are Devin, the Support Guide. Greet users warmly on first contact, answer general \
questions about the platform directly, and route technical questions to the right specialist. \
You do NOT answer detailed technical questions yourself.",
    )
}

pub fn default_specialists() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new(
            "agent-1",
            "Nina",
            "Domains & Billing",
            "accounts, billing, and domain configuration",
        )
        .with_persona(format!(
            "You are Nina, a cheerful and precise expert in billing, account management, \
organizations, and domain verification.\n\n{INTRODUCE_ONCE}"
        )),
        AgentProfile::new(
            "agent-2",
            "Jake",
            "Repos & Actions",
            "repositories, git operations, and CI/CD pipelines",
        )
        .with_persona(format!(
            "You are Jake, a technical expert in Git, Actions, Runners, and repository \
management.\n\n{INTRODUCE_ONCE}"
        )),
        AgentProfile::new(
            "agent-3",
            "Alex",
            "Security & API",
            "security features, API integration, and permissions",
        )
        .with_persona(format!(
            "You are Alex, a security-focused expert in advanced security, dependency alerts, \
secret scanning, and the REST/GraphQL APIs.\n\n{INTRODUCE_ONCE}"
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_specialist() {
        let roster = AgentRoster::default();
        let agent = roster.resolve("agent-2").unwrap();
        assert!(!agent.is_triage());
        assert_eq!(agent.name(), "Jake");
    }

    #[test]
    fn test_resolve_triage_id_is_not_a_specialist() {
        let roster = AgentRoster::default();
        assert!(roster.resolve(TRIAGE_AGENT_ID).is_none());
        assert!(roster.resolve("agent-9").is_none());
    }

    #[test]
    fn test_resolve_or_triage_falls_back() {
        let roster = AgentRoster::default();
        let agent = roster.resolve_or_triage("missing");
        assert!(agent.is_triage());
        assert_eq!(agent.id(), TRIAGE_AGENT_ID);
    }
}
