//! 后端层：ChatBackend 抽象与实现（OpenAI 兼容 / DeepSeek / 离线 / 脚本化）

pub mod deepseek;
pub mod handoff;
pub mod mock;
pub mod openai;
pub mod prompts;
pub mod traits;

pub use deepseek::{create_deepseek_backend, DEEPSEEK_CHAT};
pub use handoff::{HandoffDecision, FALLBACK_CLARIFICATION};
pub use mock::{OfflineBackend, RecordedCall, ScriptedBackend};
pub use openai::OpenAiBackend;
pub use traits::{BackendError, BackendReply, ChatBackend};
