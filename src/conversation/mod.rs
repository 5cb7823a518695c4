//! 对话数据：消息、附件、引用来源，以及只追加的对话记录

pub mod message;
pub mod transcript;

pub use message::{Attachment, Message, Role, Source};
pub use transcript::Transcript;
