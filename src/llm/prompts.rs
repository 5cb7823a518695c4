//! 系统提示词
//!
//! 分诊提示词根据花名册生成专家列表，并要求后端只输出 JSON 决策；
//! 专家提示词 = 通用支持指令 + 当前 Agent 的 persona。

use crate::agent::{Agent, AgentRoster};

pub const BASE_SYSTEM_INSTRUCTION: &str = "\
## System Persona and Role Definition
**Role:** Expert Support Bot
**Goal:** Answer user queries using official documentation.

## Instruction Set
1. **Citation:** Include inline citations in the form [Source: url].
2. **No Guessing:** If the answer is not in the documentation, state it clearly.
3. **Image Analysis:** Analyze provided screenshots for errors/code.
4. **Efficiency:** Do NOT ask follow-up questions unless the request is completely ambiguous \
or missing critical information. If you can make a reasonable assumption or provide a general \
guide, do so immediately.

## Formatting
Use Markdown. Code blocks must have language tags.
";

/// 附在专家回合用户输入末尾的提醒
pub const SPECIALIST_TURN_SUFFIX: &str = "\n\n(System: Remember to cite documentation sources)";

/// 专家被分配后拉取开场白所用的合成上下文
pub fn handoff_greeting_context(original_query: &str) -> String {
    format!(
        "[SYSTEM: You have just been assigned to this user. The user's initial inquiry was: \
\"{original_query}\". Please introduce yourself, state your expertise, and end your message with \
\"How can I help you today?\". Do NOT answer the question yet, just greet them.]"
    )
}

/// 分诊系统提示词：列出专家并给出三种 JSON 场景
pub fn triage_instruction(roster: &AgentRoster) -> String {
    let triage = roster.triage().profile();
    let team = roster
        .specialists()
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. **{}** (ID: {}): {}.", i + 1, p.name, p.id, p.description))
        .collect::<Vec<_>>()
        .join("\n");
    let example_id = roster
        .specialists()
        .first()
        .map(|p| p.id.as_str())
        .unwrap_or("agent-1");

    format!(
        "{persona}

## Your Team of Specialists:
{team}

## Your Behavior:
1. **First Contact**: If this is the user's first message and it's a greeting or vague query, \
introduce yourself warmly and ask how you can help.
2. **Platform Questions**: If the user asks about the platform itself or who the experts are, \
answer directly without handing off.
3. **Technical Questions**: If the user has a specific technical question, determine which \
specialist can best help and hand off.
4. **Unclear Intent**: If you're unsure what the user needs, ask a clarifying question.
5. Never re-introduce yourself after the first contact message.

## JSON Response Format:
You must ALWAYS respond with a valid JSON object. Do not wrap it in markdown code blocks.

Scenario A (you handle it): {{\"handoff\": false, \"message\": \"...\"}}
Scenario B (clarify): {{\"handoff\": false, \"message\": \"Could you tell me a bit more...\"}}
Scenario C (handoff): {{\"handoff\": true, \"agentId\": \"{example_id}\", \"reason\": \"...\", \"message\": \"Let me connect you...\"}}
",
        persona = triage.persona,
    )
}

/// 当前 Agent 对应的系统提示词
pub fn system_instruction(agent: &Agent, roster: &AgentRoster) -> String {
    match agent {
        Agent::Triage(_) => triage_instruction(roster),
        Agent::Specialist(p) => format!(
            "{BASE_SYSTEM_INSTRUCTION}\n\n## CURRENT AGENT PERSONA: {}\n{}",
            p.name, p.persona
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triage_instruction_lists_roster() {
        let roster = AgentRoster::default();
        let prompt = triage_instruction(&roster);
        assert!(prompt.contains("(ID: agent-1)"));
        assert!(prompt.contains("(ID: agent-3)"));
        assert!(prompt.contains("valid JSON"));
    }

    #[test]
    fn test_greeting_context_embeds_query() {
        let ctx = handoff_greeting_context("How do I reset my domain?");
        assert!(ctx.contains("\"How do I reset my domain?\""));
        assert!(ctx.ends_with("just greet them.]"));
    }
}
