//! 错误类型
//!
//! 编排核心内的失败都会降级为可恢复的对话状态（澄清提示、致歉消息、限流提示），
//! 这里只覆盖构建与运行期的外围错误。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Command channel closed")]
    ChannelClosed,
}

impl From<config::ConfigError> for DeskError {
    fn from(e: config::ConfigError) -> Self {
        DeskError::ConfigError(e.to_string())
    }
}
