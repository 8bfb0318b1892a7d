//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Gemini / DeepSeek / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod presets;
pub mod traits;

pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use presets::{create_llm_from_config, BackendError, GEMINI_FLASH_LITE, GEMINI_PRO};
pub use traits::LlmClient;
