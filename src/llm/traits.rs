//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Gemini / DeepSeek / Mock）实现 LlmClient。
//! 流水线只需要一次输入对应一次输出，因此只保留非流式 complete。

use async_trait::async_trait;

use crate::llm::Message;

/// LLM 客户端 trait：执行后端的唯一接缝
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；Err 为后端错误描述（超时、鉴权、空响应等）
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 模型名（日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
