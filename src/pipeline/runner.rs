//! 流水线执行器
//!
//! 一次运行：校验输入 → 校验能力绑定 → 加载知识附件 → 按声明顺序逐个执行阶段。
//! 阶段严格串行；第 i 个阶段只能看到前 i 个阶段的输出。任何失败都终止运行，不产出部分报告。
//! 取消只在阶段边界生效，进行中的阶段会先完成。执行器本身无运行间状态，可被多个并发运行共享。

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{DefinitionError, PipelineError, WorkerError};
use crate::knowledge::{KnowledgeLoader, KnowledgeSource};
use crate::pipeline::builder::Pipeline;
use crate::pipeline::events::{preview, send_event, EventSender, PipelineEvent};
use crate::pipeline::report::FinalReport;
use crate::pipeline::types::{FailurePoint, InputContext, RunState, StageOutput, StageOutputs};
use crate::pipeline::worker::InvocationContext;
use crate::tools::ToolExecutor;

const EVENT_PREVIEW_CHARS: usize = 200;

/// 执行器参数（由 [pipeline] 与 [app] 段得出）
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// None 表示不限制单阶段时长
    pub stage_timeout: Option<Duration>,
    pub max_tool_rounds: usize,
    pub max_knowledge_chars: usize,
    pub knowledge_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stage_timeout: None,
            max_tool_rounds: 6,
            max_knowledge_chars: 12_000,
            knowledge_dir: None,
        }
    }
}

impl From<&AppConfig> for RunnerConfig {
    fn from(cfg: &AppConfig) -> Self {
        let p = &cfg.pipeline;
        Self {
            stage_timeout: (p.stage_timeout_secs > 0).then(|| Duration::from_secs(p.stage_timeout_secs)),
            max_tool_rounds: p.max_tool_rounds,
            max_knowledge_chars: p.max_knowledge_chars,
            knowledge_dir: Some(
                cfg.app
                    .knowledge_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("knowledge")),
            ),
        }
    }
}

/// 单次运行的可选控制项
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cancel: Option<CancellationToken>,
    pub events: Option<EventSender>,
}

/// 成功完成的运行
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: String,
    pub pipeline: String,
    pub inputs: InputContext,
    pub outputs: StageOutputs,
    pub state: RunState,
    report_sections: Vec<String>,
}

impl PipelineRun {
    /// 最后一个阶段的输出即最终报告
    pub fn final_report(&self) -> Option<FinalReport> {
        self.outputs
            .last()
            .cloned()
            .map(|output| FinalReport::new(output, self.report_sections.clone()))
    }
}

/// 失败诊断：失败位置、原因与输入快照；不含任何部分报告
#[derive(Debug)]
pub struct RunFailure {
    pub run_id: String,
    pub state: RunState,
    pub error: PipelineError,
    pub inputs: InputContext,
    pub completed_stages: Vec<String>,
}

impl RunFailure {
    pub fn failed_at(&self) -> Option<&FailurePoint> {
        match &self.state {
            RunState::Failed { at, .. } => Some(at),
            _ => None,
        }
    }

    /// 失败的阶段名；校验期发现的能力缺失归到使用该能力的阶段
    pub fn failed_stage(&self) -> Option<&str> {
        match self.failed_at() {
            Some(FailurePoint::Stage(name)) => Some(name),
            _ => self.error.stage(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = self
            .failed_at()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        write!(f, "run {} failed at {}: {}", self.run_id, at, self.error)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// 单次运行的状态跟踪
struct RunTracker<'a> {
    run_id: String,
    state: RunState,
    events: Option<&'a EventSender>,
}

impl RunTracker<'_> {
    fn advance(&mut self, next: RunState) {
        if let Err(e) = self.state.transition(next) {
            tracing::error!(run_id = %self.run_id, error = %e, "run state machine violated");
        }
    }

    fn fail(
        mut self,
        at: FailurePoint,
        error: PipelineError,
        inputs: &InputContext,
        outputs: &StageOutputs,
    ) -> RunFailure {
        tracing::warn!(run_id = %self.run_id, at = %at, error = %error, "run failed");
        send_event(
            self.events,
            PipelineEvent::RunFailed {
                run_id: self.run_id.clone(),
                at: at.to_string(),
                error: error.to_string(),
            },
        );
        self.advance(RunState::Failed {
            at,
            cause: error.to_string(),
        });
        RunFailure {
            run_id: self.run_id,
            state: self.state,
            error,
            inputs: inputs.clone(),
            completed_stages: outputs.stage_names().into_iter().map(str::to_string).collect(),
        }
    }
}

/// 流水线执行器：持有配置与工具执行器
pub struct PipelineRunner {
    config: RunnerConfig,
    tools: Arc<ToolExecutor>,
}

impl PipelineRunner {
    pub fn new(config: RunnerConfig, tools: Arc<ToolExecutor>) -> Self {
        Self { config, tools }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub async fn run(
        &self,
        pipeline: &Pipeline,
        inputs: InputContext,
        knowledge: &[KnowledgeSource],
    ) -> Result<PipelineRun, RunFailure> {
        self.run_with(pipeline, inputs, knowledge, RunOptions::default())
            .await
    }

    pub async fn run_with(
        &self,
        pipeline: &Pipeline,
        inputs: InputContext,
        knowledge: &[KnowledgeSource],
        options: RunOptions,
    ) -> Result<PipelineRun, RunFailure> {
        let mut tracker = RunTracker {
            run_id: uuid::Uuid::new_v4().to_string(),
            state: RunState::Pending,
            events: options.events.as_ref(),
        };
        let run_id = tracker.run_id.clone();
        let mut outputs = StageOutputs::default();

        tracing::info!(run_id = %run_id, pipeline = %pipeline.name(), stages = pipeline.stages().len(), "run started");
        send_event(
            tracker.events,
            PipelineEvent::RunStarted {
                run_id: run_id.clone(),
                pipeline: pipeline.name().to_string(),
                stages: pipeline.stage_names().into_iter().map(str::to_string).collect(),
            },
        );
        tracker.advance(RunState::Validating);

        let missing = pipeline.missing_inputs(&inputs);
        if !missing.is_empty() {
            let err = PipelineError::MissingParameter { missing };
            return Err(tracker.fail(FailurePoint::Validation, err, &inputs, &outputs));
        }

        for stage in pipeline.stages() {
            let Some(worker) = pipeline.worker(&stage.worker) else {
                let err = DefinitionError::UnknownWorker {
                    stage: stage.name.clone(),
                    worker: stage.worker.clone(),
                };
                return Err(tracker.fail(FailurePoint::Validation, err.into(), &inputs, &outputs));
            };
            if let Some(capability) = worker.unbound_capability(&self.tools) {
                let err = PipelineError::CapabilityUnavailable {
                    stage: stage.name.clone(),
                    worker: worker.name.clone(),
                    capability,
                };
                return Err(tracker.fail(FailurePoint::Validation, err, &inputs, &outputs));
            }
        }

        let loader = KnowledgeLoader::new(self.config.knowledge_dir.clone());
        let attachment = match loader.load(knowledge).await {
            Ok(a) => a,
            Err(e) => return Err(tracker.fail(FailurePoint::Validation, e.into(), &inputs, &outputs)),
        };

        for (index, stage) in pipeline.stages().iter().enumerate() {
            if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                let at = if index == 0 {
                    FailurePoint::Validation
                } else {
                    FailurePoint::Stage(stage.name.clone())
                };
                let err = PipelineError::Cancelled {
                    next_stage: stage.name.clone(),
                };
                return Err(tracker.fail(at, err, &inputs, &outputs));
            }

            tracker.advance(RunState::Running {
                index,
                stage: stage.name.clone(),
            });
            let at = FailurePoint::Stage(stage.name.clone());
            let Some(worker) = pipeline.worker(&stage.worker) else {
                let err = DefinitionError::UnknownWorker {
                    stage: stage.name.clone(),
                    worker: stage.worker.clone(),
                };
                return Err(tracker.fail(at, err.into(), &inputs, &outputs));
            };
            send_event(
                tracker.events,
                PipelineEvent::StageStarted {
                    run_id: run_id.clone(),
                    index,
                    stage: stage.name.clone(),
                    worker: worker.name.clone(),
                },
            );
            tracing::info!(run_id = %run_id, stage = %stage.name, worker = %worker.name, index, "stage started");

            let rendered = stage
                .instruction
                .render(&inputs, &outputs)
                .and_then(|i| Ok((i, stage.expected_output.render(&inputs, &outputs)?)));
            let (instruction, expected_output) = match rendered {
                Ok(pair) => pair,
                Err(e) => return Err(tracker.fail(at, e.into(), &inputs, &outputs)),
            };

            let started_at = Utc::now();
            let result = {
                let referenced = stage.stage_refs();
                let ctx = InvocationContext {
                    stage: &stage.name,
                    inputs: &inputs,
                    knowledge: &attachment,
                    tools: &self.tools,
                    workers: pipeline.workers(),
                    previous: &outputs,
                    referenced: &referenced,
                    max_tool_rounds: self.config.max_tool_rounds,
                    max_knowledge_chars: self.config.max_knowledge_chars,
                    events: tracker.events,
                };
                let call = worker.invoke(&instruction, &expected_output, &ctx);
                match self.config.stage_timeout {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(r) => r,
                        Err(_) => Err(WorkerError::Timeout(limit)),
                    },
                    None => call.await,
                }
            };

            let content = match result {
                Ok(content) => content,
                Err(WorkerError::CapabilityUnavailable(capability)) => {
                    let err = PipelineError::CapabilityUnavailable {
                        stage: stage.name.clone(),
                        worker: worker.name.clone(),
                        capability,
                    };
                    return Err(tracker.fail(at, err, &inputs, &outputs));
                }
                Err(source) => {
                    let err = PipelineError::StageExecution {
                        stage: stage.name.clone(),
                        source,
                    };
                    return Err(tracker.fail(at, err, &inputs, &outputs));
                }
            };

            let output = StageOutput::new(&stage.name, &worker.name, instruction, content)
                .with_timing(started_at, Utc::now());
            tracing::info!(
                run_id = %run_id,
                stage = %stage.name,
                worker = %worker.name,
                duration_ms = output.duration_ms(),
                chars = output.content.chars().count(),
                "stage completed"
            );
            send_event(
                tracker.events,
                PipelineEvent::StageCompleted {
                    run_id: run_id.clone(),
                    index,
                    stage: stage.name.clone(),
                    duration_ms: output.duration_ms(),
                    preview: preview(&output.content, EVENT_PREVIEW_CHARS),
                },
            );
            outputs.push(output);
        }

        tracker.advance(RunState::Completed);
        tracing::info!(run_id = %run_id, stages = outputs.len(), "run completed");
        send_event(
            tracker.events,
            PipelineEvent::RunCompleted {
                run_id: run_id.clone(),
                stages: outputs.len(),
            },
        );

        Ok(PipelineRun {
            run_id,
            pipeline: pipeline.name().to_string(),
            inputs,
            outputs,
            state: tracker.state,
            report_sections: pipeline.report_sections().to_vec(),
        })
    }
}
