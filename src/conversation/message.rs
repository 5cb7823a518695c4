//! 单条消息
//!
//! 一条消息即一轮发言；追加后不可变。is_system_message 标记合成的生命周期提示
//! （转接、会话结束），这类消息不参与正常渲染与空闲计时规则。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 发言方（与生成式后端的角色一致：user / model）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// 引用来源
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

impl Source {
    pub fn new(title: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            uri: uri.into(),
        }
    }
}

/// 已编码为 base64 的附件（编码由外部完成）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    /// base64 数据
    pub data: String,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub is_system_message: bool,
}

impl Message {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            sources: Vec::new(),
            attachments,
            is_system_message: false,
        }
    }

    pub fn model(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            timestamp: Utc::now(),
            sources,
            attachments: Vec::new(),
            is_system_message: false,
        }
    }

    /// 合成的生命周期提示（以 model 身份展示）
    pub fn system_notice(content: impl Into<String>) -> Self {
        Self {
            is_system_message: true,
            ..Self::model(content, Vec::new())
        }
    }
}
