//! 后端预设：Gemini / OpenAI / DeepSeek（均为 OpenAI 兼容格式）与 Mock
//!
//! - Gemini: https://generativelanguage.googleapis.com/v1beta/openai/
//! - DeepSeek: https://api.deepseek.com
//! - OpenAI: 官方默认端点，或 [llm].base_url 指向的自建代理

use std::sync::Arc;

use thiserror::Error;

use crate::config::LlmSection;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";
pub const GEMINI_PRO: &str = "gemini-1.5-pro";
pub const GEMINI_FLASH_LITE: &str = "gemini-2.0-flash-lite";

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

/// 后端构建失败（配置不完整）
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("llm.api_key is required for provider '{0}'")]
    MissingApiKey(String),

    #[error("unknown llm provider '{0}' (expected gemini, openai, deepseek or mock)")]
    UnknownProvider(String),
}

/// 去掉 LiteLLM 风格的 `gemini/` 前缀，OpenAI 兼容端点只认裸模型名
fn bare_model(model: &str) -> &str {
    model.split_once('/').map(|(_, m)| m).unwrap_or(model)
}

/// 根据 [llm] 段构建执行后端；除 mock 外都必须显式提供 api_key
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, BackendError> {
    let provider = cfg.provider.to_lowercase();
    if provider == "mock" {
        tracing::warn!("Using Mock LLM, reports will not contain real research");
        return Ok(Arc::new(MockLlmClient));
    }

    let (default_base, default_model) = match provider.as_str() {
        "gemini" => (Some(GEMINI_BASE_URL), GEMINI_PRO),
        "deepseek" => (Some(DEEPSEEK_BASE_URL), DEEPSEEK_CHAT),
        "openai" => (None, OPENAI_DEFAULT_MODEL),
        other => return Err(BackendError::UnknownProvider(other.to_string())),
    };

    let api_key = cfg
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| BackendError::MissingApiKey(provider.clone()))?;

    let model = cfg
        .model
        .as_deref()
        .map(bare_model)
        .unwrap_or(default_model);
    let base = cfg.base_url.as_deref().or(default_base);

    tracing::info!(provider = %provider, model = %model, "Using OpenAI-compatible LLM");
    let client = OpenAiClient::new(base, model, api_key)
        .with_temperature(cfg.temperature)
        .with_request_timeout(cfg.timeouts.request);
    Ok(Arc::new(client))
}
