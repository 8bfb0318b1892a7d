//! 流水线端到端测试：脚本化后端 + 桩搜索工具，不访问网络

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jobflow::core::{DefinitionError, PipelineError};
use jobflow::jobsearch::{self, JobSearchRequest, REPORT_SECTIONS, STAGE_ORDER};
use jobflow::knowledge::KnowledgeSource;
use jobflow::llm::{LlmClient, Message, Role, ScriptedLlmClient};
use jobflow::pipeline::{
    Capability, FailurePoint, InputContext, PipelineBuilder, PipelineEvent, PipelineRunner,
    PromptTemplate, RunOptions, RunState, RunnerConfig, Worker,
};
use jobflow::tools::{Tool, ToolExecutor, ToolRegistry};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

struct StubSearch {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for StubSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Offline search stub"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query = args["query"].as_str().unwrap_or_default();
        Ok(serde_json::json!({
            "query": query,
            "results": [{ "title": "Acme careers", "snippet": "Open roles", "url": "https://acme.example/careers" }]
        })
        .to_string())
    }
}

fn search_tools() -> (Arc<ToolExecutor>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry.register(StubSearch {
        calls: calls.clone(),
    });
    (Arc::new(ToolExecutor::new(registry, 5)), calls)
}

fn runner_with(tools: Arc<ToolExecutor>) -> PipelineRunner {
    PipelineRunner::new(RunnerConfig::default(), tools)
}

fn plain_runner() -> PipelineRunner {
    runner_with(Arc::new(ToolExecutor::empty()))
}

fn simple_worker(name: &str, backend: Arc<dyn LlmClient>) -> Worker {
    Worker::new(
        name,
        "research analyst",
        PromptTemplate::parse("Help the candidate").unwrap(),
        PromptTemplate::parse("Thorough and brief").unwrap(),
        backend,
    )
}

fn acme_inputs() -> InputContext {
    InputContext::new()
        .with("company_name", "Acme Corp")
        .with("role", "Backend Engineer")
        .with("experience", "3 years")
        .with("university_name", "State University")
}

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

fn canned_report() -> String {
    REPORT_SECTIONS
        .iter()
        .map(|s| format!("## {}\nDetails for {}.\n", s, s))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 研究阶段先搜索一次再作答；汇总阶段直接返回固定报告
fn preset_backend() -> Arc<ScriptedLlmClient> {
    Arc::new(ScriptedLlmClient::new().with_fallback(|messages| {
        let last = last_user(messages);
        if last.contains("Material from the previous stages") {
            Ok(canned_report())
        } else if last.starts_with("Observation:") {
            Ok("Findings based on search results.".to_string())
        } else {
            Ok("{\"tool\": \"web_search\", \"args\": {\"query\": \"Acme Corp\"}}".to_string())
        }
    }))
}

#[tokio::test]
async fn test_acme_three_stage_outputs_flow_forward() {
    let backend = Arc::new(ScriptedLlmClient::with_replies([
        "A-OUT: Acme Corp makes anvils",
        "B-OUT: Backend Engineer II, Platform Engineer",
        "C-OUT: combined",
    ]));
    let pipeline = PipelineBuilder::new("acme")
        .worker(simple_worker("W", backend.clone()))
        .stage("a", "W", "Research {company_name}", "Facts")
        .stage("b", "W", "Find {role} openings matching:\n{stage:a}", "Roles")
        .stage("c", "W", "Combine:\n{stage:a}\n---\n{stage:b}", "Summary")
        .build()
        .unwrap();

    let run = plain_runner()
        .run(&pipeline, acme_inputs(), &[])
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.outputs.stage_names(), vec!["a", "b", "c"]);
    let outputs = run.outputs.as_slice();
    assert_eq!(outputs[0].resolved_instruction, "Research Acme Corp");
    assert!(outputs[1]
        .resolved_instruction
        .contains("A-OUT: Acme Corp makes anvils"));
    assert!(outputs[2]
        .resolved_instruction
        .contains("A-OUT: Acme Corp makes anvils"));
    assert!(outputs[2]
        .resolved_instruction
        .contains("B-OUT: Backend Engineer II, Platform Engineer"));
    assert_eq!(run.final_report().unwrap().content(), "C-OUT: combined");
    assert_eq!(backend.call_count(), 3);

    // 已由模板嵌入的输出不再重复附加
    let calls = backend.calls();
    assert_eq!(last_user(&calls[2]).matches("A-OUT").count(), 1);
    assert!(!last_user(&calls[2]).contains("Context from previous stages"));
}

#[tokio::test]
async fn test_unreferenced_stage_sees_every_earlier_output() {
    let backend = Arc::new(ScriptedLlmClient::with_replies([
        "A-OUT-MARKER",
        "B-OUT-MARKER",
        "C-OUT-MARKER",
    ]));
    let pipeline = PipelineBuilder::new("flow")
        .worker(simple_worker("W", backend.clone()))
        .stage("a", "W", "Research {company_name}", "Facts")
        .stage("b", "W", "Find openings", "Roles")
        .stage("c", "W", "Draft outreach", "Messages")
        .build()
        .unwrap();

    let run = plain_runner()
        .run(&pipeline, acme_inputs(), &[])
        .await
        .unwrap();
    assert_eq!(run.state, RunState::Completed);

    let calls = backend.calls();
    assert_eq!(calls.len(), 3);
    let first = last_user(&calls[0]);
    let second = last_user(&calls[1]);
    let third = last_user(&calls[2]);

    assert!(!first.contains("Context from previous stages"));
    assert!(second.contains("A-OUT-MARKER"));
    assert!(!second.contains("B-OUT-MARKER"));
    assert!(third.contains("A-OUT-MARKER"));
    assert!(third.contains("B-OUT-MARKER"));
    assert!(!third.contains("C-OUT-MARKER"));

    // resolved_instruction 只记录模板渲染结果
    assert_eq!(run.outputs.as_slice()[1].resolved_instruction, "Find openings");
}

#[tokio::test]
async fn test_missing_university_fails_without_backend_calls() {
    let backend = preset_backend();
    let pipeline = jobsearch::build_pipeline(backend.clone()).unwrap();
    let (tools, search_calls) = search_tools();

    let request = JobSearchRequest {
        company_name: "Acme Corp".to_string(),
        role: "Backend Engineer".to_string(),
        experience: "3 years".to_string(),
        university_name: String::new(),
        resume: None,
    };
    let failure = runner_with(tools)
        .run(&pipeline, request.to_inputs(), &request.knowledge_sources())
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        PipelineError::MissingParameter { ref missing } if missing == &vec!["university_name".to_string()]
    ));
    assert_eq!(failure.failed_at(), Some(&FailurePoint::Validation));
    assert!(failure.completed_stages.is_empty());
    assert_eq!(failure.inputs.get("company_name"), Some("Acme Corp"));
    assert_eq!(backend.call_count(), 0);
    assert_eq!(search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_all_missing_inputs_reported_sorted() {
    let pipeline = jobsearch::build_pipeline(preset_backend()).unwrap();
    let (tools, _) = search_tools();
    let failure = runner_with(tools)
        .run(&pipeline, InputContext::new().with("role", "SRE"), &[])
        .await
        .unwrap_err();
    match failure.error {
        PipelineError::MissingParameter { missing } => {
            assert_eq!(missing, vec!["company_name", "experience", "university_name"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_forward_reference_rejected_at_build_time() {
    let backend: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new());
    let err = PipelineBuilder::new("bad")
        .worker(simple_worker("W", backend))
        .stage("summary", "W", "Summarise {stage:research}", "x")
        .stage("research", "W", "Research {company_name}", "y")
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InvalidPipeline(DefinitionError::ForwardReference { ref stage, ref referenced })
            if stage == "summary" && referenced == "research"
    ));
}

#[tokio::test]
async fn test_knowledge_failure_aborts_before_first_stage() {
    let backend = Arc::new(ScriptedLlmClient::with_replies(["unused"]));
    let pipeline = PipelineBuilder::new("k")
        .worker(simple_worker("W", backend.clone()))
        .stage("a", "W", "Evaluate the resume for {role}", "Score")
        .build()
        .unwrap();

    let failure = plain_runner()
        .run(
            &pipeline,
            acme_inputs(),
            &[KnowledgeSource::pdf("/no/such/dir/resume.pdf")],
        )
        .await
        .unwrap_err();
    assert!(matches!(failure.error, PipelineError::KnowledgeLoad(_)));
    assert_eq!(failure.failed_at(), Some(&FailurePoint::Validation));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_knowledge_is_shared_with_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let resume = dir.path().join("resume.md");
    std::fs::write(&resume, "Jane Doe\nRust and PostgreSQL, 3 years").unwrap();

    let backend = Arc::new(ScriptedLlmClient::with_replies(["one", "two"]));
    let pipeline = PipelineBuilder::new("k")
        .worker(simple_worker("W", backend.clone()))
        .stage("a", "W", "Score the resume", "x")
        .stage("b", "W", "Questions about the resume", "y")
        .build()
        .unwrap();

    plain_runner()
        .run(&pipeline, InputContext::new(), &[KnowledgeSource::new(&resume)])
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert!(call[0].content.contains("Rust and PostgreSQL"));
    }
}

#[tokio::test]
async fn test_cancellation_takes_effect_at_stage_boundary() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let backend = Arc::new(ScriptedLlmClient::new().with_fallback(move |_| {
        trigger.cancel();
        Ok("finished anyway".to_string())
    }));
    let pipeline = PipelineBuilder::new("c")
        .worker(simple_worker("W", backend.clone()))
        .stage("a", "W", "First", "x")
        .stage("b", "W", "Second {stage:a}", "y")
        .build()
        .unwrap();

    let failure = plain_runner()
        .run_with(
            &pipeline,
            InputContext::new(),
            &[],
            RunOptions {
                cancel: Some(cancel),
                events: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        PipelineError::Cancelled { ref next_stage } if next_stage == "b"
    ));
    assert_eq!(failure.completed_stages, vec!["a".to_string()]);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_preset_without_search_tool_is_capability_unavailable() {
    let backend = preset_backend();
    let pipeline = jobsearch::build_pipeline(backend.clone()).unwrap();

    let failure = plain_runner()
        .run(&pipeline, acme_inputs(), &[])
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        PipelineError::CapabilityUnavailable { ref stage, capability: Capability::WebSearch, .. }
            if stage == "job_scout"
    ));
    assert_eq!(failure.failed_stage(), Some("job_scout"));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_preset_runs_end_to_end_with_stub_search() {
    let backend = preset_backend();
    let pipeline = jobsearch::build_pipeline(backend.clone()).unwrap();
    let (tools, search_calls) = search_tools();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let run = runner_with(tools)
        .run_with(
            &pipeline,
            acme_inputs(),
            &[],
            RunOptions {
                cancel: None,
                events: Some(tx),
            },
        )
        .await
        .unwrap();

    assert_eq!(run.outputs.stage_names(), STAGE_ORDER.to_vec());
    assert_eq!(search_calls.load(Ordering::SeqCst), 9);

    let report_stage = run.outputs.last().unwrap();
    assert_eq!(report_stage.worker_name, "ReportMaster");
    assert_eq!(
        report_stage
            .resolved_instruction
            .matches("Findings based on search results.")
            .count(),
        9
    );

    let mut tool_events = 0;
    while let Ok(ev) = rx.try_recv() {
        if let PipelineEvent::ToolCall { ok, .. } = ev {
            assert!(ok);
            tool_events += 1;
        }
    }
    assert_eq!(tool_events, 9);

    let report = run.final_report().unwrap();
    assert!(report.follows_section_order());
    assert!(report.missing_sections().is_empty());
}

#[tokio::test]
async fn test_report_section_order_is_idempotent() {
    let (tools, _) = search_tools();
    let runner = runner_with(tools);

    let mut orders = Vec::new();
    for _ in 0..2 {
        let pipeline = jobsearch::build_pipeline(preset_backend()).unwrap();
        let run = runner.run(&pipeline, acme_inputs(), &[]).await.unwrap();
        let report = run.final_report().unwrap();
        assert!(report.follows_section_order());
        orders.push(report.sections());
    }
    assert_eq!(orders[0], orders[1]);
    assert_eq!(orders[0], REPORT_SECTIONS.to_vec());
}
