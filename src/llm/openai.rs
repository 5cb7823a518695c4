//! OpenAI 兼容后端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 分诊回合要求模型输出 JSON 决策；专家回合使用通用支持指令 + persona，并从正文中提取
//! [Source: url] 形式的内联引用作为来源列表。

use std::sync::OnceLock;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageUrlArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use regex::Regex;

use crate::agent::{Agent, AgentRoster};
use crate::conversation::{Attachment, Message, Role, Source};
use crate::llm::prompts::{system_instruction, SPECIALIST_TURN_SUFFIX};
use crate::llm::{BackendError, BackendReply, ChatBackend};

/// OpenAI 兼容后端：持有 Client、model 名与花名册（用于生成分诊提示词）
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
    roster: AgentRoster,
}

impl OpenAiBackend {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, roster: AgentRoster) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            roster,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_messages(
        &self,
        query: &str,
        history: &[Message],
        attachments: &[Attachment],
        agent: &Agent,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut out = Vec::with_capacity(history.len() + 2);
        out.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_instruction(agent, &self.roster))
                .build()?,
        ));

        for m in history {
            out.push(match m.role {
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()?,
                ),
                Role::Model => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()?,
                ),
            });
        }

        let text = if agent.is_triage() {
            query.to_string()
        } else {
            format!("{query}{SPECIALIST_TURN_SUFFIX}")
        };

        let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();
        for att in attachments.iter().filter(|a| a.is_image()) {
            let image_url = ImageUrlArgs::default()
                .url(format!("data:{};base64,{}", att.mime_type, att.data))
                .build()?;
            parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(image_url)
                    .build()?,
            ));
        }
        if parts.is_empty() {
            out.push(ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(text)
                    .build()?,
            ));
        } else {
            parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(text)
                    .build()?,
            ));
            out.push(ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(parts)
                    .build()?,
            ));
        }

        Ok(out)
    }

    /// 分诊回合开启 JSON 模式，专家回合保持普通文本
    fn build_request(
        &self,
        query: &str,
        history: &[Message],
        attachments: &[Attachment],
        agent: &Agent,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let messages = self.build_messages(query, history, attachments, agent)?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages);
        if agent.is_triage() {
            args.response_format(ResponseFormat::JsonObject);
        }
        args.build()
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn send_message(
        &self,
        query: &str,
        history: &[Message],
        attachments: &[Attachment],
        agent: &Agent,
    ) -> Result<BackendReply, BackendError> {
        let request = self
            .build_request(query, history, attachments, agent)
            .map_err(to_backend_error)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            tracing::error!("Chat backend error: {}", e);
            to_backend_error(e)
        })?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        if agent.is_triage() {
            return Ok(BackendReply::triage(&content));
        }

        let sources = extract_sources(&content);
        Ok(BackendReply::text(content).with_sources(sources))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 将 async_openai 错误转为 BackendError；HTTP 状态码尽量保留，完整 Debug 输出放入 details
fn to_backend_error(err: OpenAIError) -> BackendError {
    let status = match &err {
        OpenAIError::Reqwest(e) => e.status().map(|s| s.as_u16()),
        _ => None,
    };
    let mut out = BackendError::new(err.to_string()).with_details(format!("{err:?}"));
    out.status = status;
    out
}

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[Source:\s*(https?://[^\]\s]+)\s*\]").expect("citation regex is valid")
    })
}

/// 从正文提取 [Source: url] 引用，按 uri 去重并保持出现顺序
pub fn extract_sources(text: &str) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();
    citation_pattern()
        .captures_iter(text)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .filter(|uri| seen.insert(uri.clone()))
        .map(|uri| {
            let title = uri
                .split("://")
                .nth(1)
                .and_then(|rest| rest.split('/').next())
                .unwrap_or(uri.as_str())
                .to_string();
            Source::new(title, uri)
        })
        .collect()
}
