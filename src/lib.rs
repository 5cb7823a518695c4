//! Switchboard - 客服对话编排核心
//!
//! 模块划分：
//! - **agent**: 分诊 / 专家 Agent 身份与花名册
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 消息与对话记录
//! - **core**: 转接状态机、会话登记、空闲监管、限流识别、运行时循环
//! - **llm**: 生成式后端抽象与实现（OpenAI 兼容 / DeepSeek / 离线 / 脚本化）
//! - **observability**: 日志初始化

pub mod agent;
pub mod config;
pub mod conversation;
pub mod core;
pub mod llm;
pub mod observability;
