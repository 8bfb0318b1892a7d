//! Mock LLM 客户端（离线运行与测试，无需 API）
//!
//! - MockLlmClient：取最后一条 User 消息的首行，回显为一段 Markdown，结构稳定、内容可预测
//! - ScriptedLlmClient：按顺序返回预设回复并记录每次调用的消息，便于断言「后端是否被调用」

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：回显用户最后一条消息的首行
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let headline = last_user.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

        Ok(format!("## Mock answer\n\n{}", headline.trim()))
    }
}

/// 回复脚本：固定文本，或根据本次消息动态生成
type Responder = Box<dyn Fn(&[Message]) -> Result<String, String> + Send + Sync>;

/// 脚本化客户端：队列中的回复依次消费；队列耗尽后使用 fallback（若有）
pub struct ScriptedLlmClient {
    queue: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<Responder>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 依次返回给定回复
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        if let Ok(mut q) = client.queue.lock() {
            q.extend(replies.into_iter().map(|r| Ok(r.into())));
        }
        client
    }

    /// 队列耗尽后按 responder 生成回复
    pub fn with_fallback(
        mut self,
        responder: impl Fn(&[Message]) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.fallback = Some(Box::new(responder));
        self
    }

    /// 追加一条失败回复（模拟后端错误）
    pub fn push_error(&self, error: impl Into<String>) {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(Err(error.into()));
        }
    }

    /// 已发生的调用次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 所有调用的消息快照
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match (queued, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(messages),
            (None, None) => Err("scripted client exhausted".to_string()),
        }
    }
}
