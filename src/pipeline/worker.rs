//! Worker：绑定一个执行后端的角色化 LLM 调用单元
//!
//! 一次 invoke 是一个有界的 plan → act → observe 循环：
//! - 模型输出 `{"tool": "...", "args": {...}}` 调用工具（只限能力集合对应的工具）；
//! - 输出 `{"delegate": "Name", "task": "..."}` 请求委派（只限 delegates 集合，委派对象不再继续委派）；
//! - 其他任何文本都视为最终答案。
//!
//! 工具失败与被拒绝的委派都作为 observation 回灌给模型；超过 max_tool_rounds 则本次调用失败。
//! 指令模板没有嵌入的前序阶段输出统一附在指令之后，委派任务不附带。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::core::WorkerError;
use crate::knowledge::KnowledgeAttachment;
use crate::llm::{LlmClient, Message};
use crate::pipeline::events::{preview, send_event, EventSender, PipelineEvent};
use crate::pipeline::template::PromptTemplate;
use crate::pipeline::types::{InputContext, StageOutputs};
use crate::tools::ToolExecutor;

const OBSERVATION_MAX_CHARS: usize = 6000;
const DELEGATE_EXPECTED_OUTPUT: &str = "A concise, factual answer to the delegated task.";

/// Worker 能力：决定可挂载哪些工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WebSearch,
}

impl Capability {
    /// 对应的工具名
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// 角色化的执行单元；跨运行无状态
#[derive(Clone)]
pub struct Worker {
    pub name: String,
    pub role: String,
    /// 可引用输入字段，不可引用阶段输出
    pub goal: PromptTemplate,
    pub backstory: PromptTemplate,
    pub capabilities: BTreeSet<Capability>,
    pub allow_delegation: bool,
    /// 封闭的委派对象集合
    pub delegates: BTreeSet<String>,
    backend: Arc<dyn LlmClient>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("capabilities", &self.capabilities)
            .field("allow_delegation", &self.allow_delegation)
            .field("delegates", &self.delegates)
            .field("backend", &self.backend.model_name())
            .finish()
    }
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        goal: PromptTemplate,
        backstory: PromptTemplate,
        backend: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            goal,
            backstory,
            capabilities: BTreeSet::new(),
            allow_delegation: false,
            delegates: BTreeSet::new(),
            backend,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// 开启委派并限定委派对象
    pub fn with_delegates<I, S>(mut self, delegates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_delegation = true;
        self.delegates = delegates.into_iter().map(Into::into).collect();
        self
    }

    /// 第一个没有绑定工具的能力
    pub fn unbound_capability(&self, tools: &ToolExecutor) -> Option<Capability> {
        self.capabilities
            .iter()
            .copied()
            .find(|c| !tools.has_tool(c.tool_name()))
    }

    fn tool_names(&self) -> Vec<&'static str> {
        self.capabilities.iter().map(|c| c.tool_name()).collect()
    }

    /// 执行一次阶段任务；返回最终答案文本
    pub async fn invoke(
        &self,
        instruction: &str,
        expected_output: &str,
        ctx: &InvocationContext<'_>,
    ) -> Result<String, WorkerError> {
        if let Some(cap) = self.unbound_capability(ctx.tools) {
            return Err(WorkerError::CapabilityUnavailable(cap));
        }
        let instruction = match previous_context(ctx) {
            Some(context) => format!("{}\n\n{}", instruction, context),
            None => instruction.to_string(),
        };
        self.run_loop(instruction, expected_output.to_string(), ctx, self.allow_delegation)
            .await
    }

    fn system_prompt(&self, ctx: &InvocationContext<'_>, may_delegate: bool) -> Result<String, WorkerError> {
        let empty = StageOutputs::default();
        let goal = self.goal.render(ctx.inputs, &empty)?;
        let backstory = self.backstory.render(ctx.inputs, &empty)?;

        let mut prompt = format!(
            "You are {}, {}.\nGoal: {}\nBackground: {}\n",
            self.name, self.role, goal, backstory
        );

        let tool_names = self.tool_names();
        if !tool_names.is_empty() {
            prompt.push_str("\n## Tools\n");
            prompt.push_str(&ctx.tools.schema_json_for(&tool_names));
            prompt.push_str(
                "\nTo call a tool, reply with only a JSON object: {\"tool\": \"<name>\", \"args\": {...}}.\n",
            );
        }

        if may_delegate && !self.delegates.is_empty() {
            let names: Vec<&str> = self.delegates.iter().map(String::as_str).collect();
            prompt.push_str(&format!(
                "\n## Delegation\nYou may ask one of these coworkers for help: {}.\n\
                 Reply with only a JSON object: {{\"delegate\": \"<name>\", \"task\": \"<what you need>\"}}.\n",
                names.join(", ")
            ));
        }

        if let Some(knowledge) = ctx.knowledge.render(ctx.max_knowledge_chars) {
            prompt.push_str("\n## Reference documents\n");
            prompt.push_str(&knowledge);
            prompt.push('\n');
        }

        prompt.push_str("\nWhen you are done, reply with the final answer as plain text, not JSON.");
        Ok(prompt)
    }

    fn run_loop<'a>(
        &'a self,
        instruction: String,
        expected_output: String,
        ctx: &'a InvocationContext<'a>,
        may_delegate: bool,
    ) -> BoxFuture<'a, Result<String, WorkerError>> {
        async move {
            let mut messages = vec![
                Message::system(self.system_prompt(ctx, may_delegate)?),
                Message::user(format!(
                    "{}\n\n## Expected output\n{}",
                    instruction, expected_output
                )),
            ];
            let allowed_tools = self.tool_names();
            let mut rounds = 0usize;

            loop {
                let reply = self
                    .backend
                    .complete(&messages)
                    .await
                    .map_err(WorkerError::Backend)?;
                if reply.trim().is_empty() {
                    return Err(WorkerError::EmptyResponse);
                }

                let observation = match parse_worker_output(&reply) {
                    WorkerAction::Final(answer) => return Ok(answer),
                    _ if rounds >= ctx.max_tool_rounds => {
                        tracing::warn!(worker = %self.name, stage = %ctx.stage, rounds, "tool round limit reached");
                        return Err(WorkerError::RoundsExceeded(ctx.max_tool_rounds));
                    }
                    WorkerAction::ToolCall { tool, args } => {
                        self.call_tool(&tool, args, &allowed_tools, ctx).await
                    }
                    WorkerAction::Delegate { worker, task } => {
                        self.delegate(&worker, task, ctx, may_delegate).await?
                    }
                };
                rounds += 1;

                messages.push(Message::assistant(reply));
                messages.push(Message::user(format!(
                    "Observation:\n{}",
                    preview(&observation, OBSERVATION_MAX_CHARS)
                )));
            }
        }
        .boxed()
    }

    async fn call_tool(
        &self,
        tool: &str,
        args: serde_json::Value,
        allowed: &[&str],
        ctx: &InvocationContext<'_>,
    ) -> String {
        if !allowed.contains(&tool) {
            tracing::warn!(worker = %self.name, tool = %tool, "tool outside capability set");
            send_event(
                ctx.events,
                PipelineEvent::ToolCall {
                    stage: ctx.stage.to_string(),
                    worker: self.name.clone(),
                    tool: tool.to_string(),
                    args,
                    ok: false,
                },
            );
            return format!(
                "Error: tool '{}' is not available to you. Available tools: [{}]",
                tool,
                allowed.join(", ")
            );
        }

        let result = ctx.tools.execute(tool, args.clone()).await;
        send_event(
            ctx.events,
            PipelineEvent::ToolCall {
                stage: ctx.stage.to_string(),
                worker: self.name.clone(),
                tool: tool.to_string(),
                args,
                ok: result.is_ok(),
            },
        );
        match result {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(worker = %self.name, tool = %tool, error = %e, "tool failed");
                format!("Error: {}", e)
            }
        }
    }

    async fn delegate(
        &self,
        target: &str,
        task: String,
        ctx: &InvocationContext<'_>,
        may_delegate: bool,
    ) -> Result<String, WorkerError> {
        let delegate = if may_delegate && self.delegates.contains(target) {
            ctx.workers.get(target)
        } else {
            None
        };
        send_event(
            ctx.events,
            PipelineEvent::Delegation {
                stage: ctx.stage.to_string(),
                from: self.name.clone(),
                to: target.to_string(),
                accepted: delegate.is_some(),
            },
        );

        let Some(delegate) = delegate else {
            tracing::warn!(worker = %self.name, delegate = %target, "delegation rejected");
            let allowed: Vec<&str> = if may_delegate {
                self.delegates.iter().map(String::as_str).collect()
            } else {
                Vec::new()
            };
            return Ok(format!(
                "Delegation to '{}' rejected. You may delegate to: [{}]. Continue the task yourself.",
                target,
                allowed.join(", ")
            ));
        };

        tracing::info!(worker = %self.name, delegate = %target, stage = %ctx.stage, "delegating");
        if let Some(cap) = delegate.unbound_capability(ctx.tools) {
            return Ok(format!(
                "Delegation to '{}' failed: capability '{}' is not available.",
                target, cap
            ));
        }
        let answer = delegate
            .run_loop(task, DELEGATE_EXPECTED_OUTPUT.to_string(), ctx, false)
            .await?;
        Ok(format!("Answer from {}:\n{}", target, answer))
    }
}

/// 一次 Worker 调用可见的运行期环境（只读借用）
pub struct InvocationContext<'a> {
    pub stage: &'a str,
    pub inputs: &'a InputContext,
    pub knowledge: &'a KnowledgeAttachment,
    pub tools: &'a ToolExecutor,
    /// 委派时按名字查找
    pub workers: &'a BTreeMap<String, Arc<Worker>>,
    /// 本阶段之前的全部输出（只含 outputs[0..i]）
    pub previous: &'a StageOutputs,
    /// 指令模板已经用 {stage:..} 嵌入的阶段，不再重复附加
    pub referenced: &'a [&'a str],
    pub max_tool_rounds: usize,
    pub max_knowledge_chars: usize,
    pub events: Option<&'a EventSender>,
}

/// 模板未显式引用的前序输出，按执行顺序附在指令之后
fn previous_context(ctx: &InvocationContext<'_>) -> Option<String> {
    let blocks: Vec<String> = ctx
        .previous
        .iter()
        .filter(|o| !ctx.referenced.contains(&o.stage_name.as_str()))
        .map(|o| format!("### {}\n{}", o.stage_name, o.content.trim()))
        .collect();
    if blocks.is_empty() {
        return None;
    }
    Some(format!("## Context from previous stages\n{}", blocks.join("\n\n")))
}

/// 模型单轮输出的解释
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerAction {
    Final(String),
    ToolCall { tool: String, args: serde_json::Value },
    Delegate { worker: String, task: String },
}

/// 只有整段输出（可包在 ```json 代码块中）是一个 JSON 对象且带 tool / delegate 字段时才视为动作，
/// 其余一律是最终答案
pub fn parse_worker_output(output: &str) -> WorkerAction {
    let trimmed = output.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    if !(body.starts_with('{') && body.ends_with('}')) {
        return WorkerAction::Final(trimmed.to_string());
    }
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) else {
        return WorkerAction::Final(trimmed.to_string());
    };

    if let Some(tool) = map.get("tool").and_then(|v| v.as_str()).filter(|t| !t.is_empty()) {
        let args = map.get("args").cloned().unwrap_or(serde_json::Value::Null);
        return WorkerAction::ToolCall {
            tool: tool.to_string(),
            args,
        };
    }
    if let Some(worker) = map.get("delegate").and_then(|v| v.as_str()).filter(|w| !w.is_empty()) {
        let task = map
            .get("task")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        return WorkerAction::Delegate {
            worker: worker.to_string(),
            task,
        };
    }
    WorkerAction::Final(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::StageOutput;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::Value;

    struct StubSearch;

    #[async_trait]
    impl Tool for StubSearch {
        fn name(&self) -> &str {
            "web_search"
        }

        fn description(&self) -> &str {
            "stub search"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(format!("results for {}", args["query"].as_str().unwrap_or("")))
        }
    }

    fn template(s: &str) -> PromptTemplate {
        PromptTemplate::parse(s).unwrap()
    }

    fn worker(name: &str, backend: Arc<dyn LlmClient>) -> Worker {
        Worker::new(
            name,
            "research analyst",
            template("Find facts about {company_name}"),
            template("Seasoned researcher"),
            backend,
        )
    }

    struct Fixture {
        inputs: InputContext,
        knowledge: KnowledgeAttachment,
        tools: ToolExecutor,
        workers: BTreeMap<String, Arc<Worker>>,
        previous: StageOutputs,
    }

    impl Fixture {
        fn new(with_search: bool) -> Self {
            let mut registry = ToolRegistry::new();
            if with_search {
                registry.register(StubSearch);
            }
            Self {
                inputs: InputContext::new().with("company_name", "Acme Corp"),
                knowledge: KnowledgeAttachment::empty(),
                tools: ToolExecutor::new(registry, 5),
                workers: BTreeMap::new(),
                previous: StageOutputs::default(),
            }
        }

        fn ctx(&self, max_tool_rounds: usize) -> InvocationContext<'_> {
            InvocationContext {
                stage: "research",
                inputs: &self.inputs,
                knowledge: &self.knowledge,
                tools: &self.tools,
                workers: &self.workers,
                previous: &self.previous,
                referenced: &[],
                max_tool_rounds,
                max_knowledge_chars: 1000,
                events: None,
            }
        }
    }

    #[test]
    fn test_parse_worker_output() {
        assert_eq!(
            parse_worker_output("{\"tool\": \"web_search\", \"args\": {\"query\": \"acme\"}}"),
            WorkerAction::ToolCall {
                tool: "web_search".to_string(),
                args: serde_json::json!({"query": "acme"}),
            }
        );
        assert_eq!(
            parse_worker_output("```json\n{\"delegate\": \"JobScout\", \"task\": \"list roles\"}\n```"),
            WorkerAction::Delegate {
                worker: "JobScout".to_string(),
                task: "list roles".to_string(),
            }
        );
        assert!(matches!(
            parse_worker_output("## Report\nScore {80}"),
            WorkerAction::Final(_)
        ));
        assert!(matches!(
            parse_worker_output("{\"score\": 80}"),
            WorkerAction::Final(_)
        ));
    }

    #[tokio::test]
    async fn test_tool_round_then_final_answer() {
        let backend = Arc::new(ScriptedLlmClient::with_replies([
            "{\"tool\": \"web_search\", \"args\": {\"query\": \"Acme Corp careers\"}}",
            "Acme is hiring.",
        ]));
        let w = worker("Scout", backend.clone()).with_capability(Capability::WebSearch);
        let fx = Fixture::new(true);

        let out = w.invoke("Find roles", "A list", &fx.ctx(3)).await.unwrap();
        assert_eq!(out, "Acme is hiring.");

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        let last = calls[1].last().unwrap();
        assert!(last.content.contains("results for Acme Corp careers"));
        assert!(calls[0][0].content.contains("Find facts about Acme Corp"));
    }

    #[tokio::test]
    async fn test_unbound_capability_fails_before_backend() {
        let backend = Arc::new(ScriptedLlmClient::with_replies(["never"]));
        let w = worker("Scout", backend.clone()).with_capability(Capability::WebSearch);
        let fx = Fixture::new(false);

        let err = w.invoke("Find roles", "A list", &fx.ctx(3)).await.unwrap_err();
        assert!(matches!(err, WorkerError::CapabilityUnavailable(Capability::WebSearch)));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rounds_exceeded() {
        let backend = Arc::new(ScriptedLlmClient::new().with_fallback(|_| {
            Ok("{\"tool\": \"web_search\", \"args\": {\"query\": \"again\"}}".to_string())
        }));
        let w = worker("Scout", backend).with_capability(Capability::WebSearch);
        let fx = Fixture::new(true);

        let err = w.invoke("Loop", "Never", &fx.ctx(2)).await.unwrap_err();
        assert!(matches!(err, WorkerError::RoundsExceeded(2)));
    }

    #[tokio::test]
    async fn test_delegation_outside_set_is_observation() {
        let backend = Arc::new(ScriptedLlmClient::with_replies([
            "{\"delegate\": \"Stranger\", \"task\": \"help\"}",
            "Done alone.",
        ]));
        let w = worker("Lead", backend.clone()).with_delegates(["Helper"]);
        let fx = Fixture::new(false);

        let out = w.invoke("Task", "Answer", &fx.ctx(3)).await.unwrap();
        assert_eq!(out, "Done alone.");
        let calls = backend.calls();
        assert!(calls[1].last().unwrap().content.contains("rejected"));
    }

    #[tokio::test]
    async fn test_delegation_to_known_worker() {
        let lead_backend = Arc::new(ScriptedLlmClient::with_replies([
            "{\"delegate\": \"Helper\", \"task\": \"Summarise Acme\"}",
            "Final with help.",
        ]));
        let helper_backend = Arc::new(ScriptedLlmClient::with_replies([
            "{\"delegate\": \"Lead\", \"task\": \"bounce\"}",
            "Acme builds anvils.",
        ]));
        let lead = worker("Lead", lead_backend.clone()).with_delegates(["Helper"]);
        let helper = worker("Helper", helper_backend.clone()).with_delegates(["Lead"]);

        let mut fx = Fixture::new(false);
        fx.workers.insert("Helper".to_string(), Arc::new(helper));
        fx.workers.insert("Lead".to_string(), Arc::new(lead.clone()));

        let out = lead.invoke("Task", "Answer", &fx.ctx(3)).await.unwrap();
        assert_eq!(out, "Final with help.");

        // 委派对象不能再委派：其请求被拒绝后自行作答
        let helper_calls = helper_backend.calls();
        assert_eq!(helper_calls.len(), 2);
        assert!(helper_calls[1].last().unwrap().content.contains("rejected"));

        let lead_calls = lead_backend.calls();
        assert!(lead_calls[1]
            .last()
            .unwrap()
            .content
            .contains("Acme builds anvils."));
    }

    #[tokio::test]
    async fn test_empty_and_failing_backend() {
        let fx = Fixture::new(false);

        let backend = Arc::new(ScriptedLlmClient::with_replies(["   "]));
        let err = worker("W", backend).invoke("t", "e", &fx.ctx(1)).await.unwrap_err();
        assert!(matches!(err, WorkerError::EmptyResponse));

        let backend = Arc::new(ScriptedLlmClient::new());
        backend.push_error("401 unauthorized");
        let err = worker("W", backend).invoke("t", "e", &fx.ctx(1)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Backend(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_unreferenced_previous_outputs_are_attached() {
        let backend = Arc::new(ScriptedLlmClient::with_replies(["done"]));
        let mut fx = Fixture::new(false);
        fx.previous.push(StageOutput::new("scout", "Scout", "Find roles", "ROLES: Backend II"));
        fx.previous.push(StageOutput::new("news", "Insider", "News", "NEWS: new CEO"));

        let ctx = InvocationContext {
            referenced: &["news"],
            ..fx.ctx(1)
        };
        worker("W", backend.clone())
            .invoke("Prepare questions", "List", &ctx)
            .await
            .unwrap();

        let calls = backend.calls();
        let user = &calls[0][1].content;
        assert!(user.starts_with("Prepare questions"));
        assert!(user.contains("## Context from previous stages\n### scout\nROLES: Backend II"));
        assert!(!user.contains("NEWS: new CEO"));
    }
}
