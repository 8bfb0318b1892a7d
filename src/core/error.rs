//! 流水线错误分类
//!
//! - 运行前：MissingParameter（参数校验）、KnowledgeLoad（知识附件前置条件）、InvalidPipeline（定义校验）
//! - 运行中：CapabilityUnavailable（能力与工具绑定不匹配）、StageExecution（后端失败）、Cancelled（阶段边界取消）
//!
//! 任何一种都会终止整次运行，不返回部分报告。

use std::time::Duration;

use thiserror::Error;

use crate::knowledge::KnowledgeError;
use crate::pipeline::{Capability, TemplateError};

/// 一次流水线运行的致命错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("missing required parameters: {}", .missing.join(", "))]
    MissingParameter { missing: Vec<String> },

    #[error("knowledge load failed: {0}")]
    KnowledgeLoad(#[from] KnowledgeError),

    #[error("stage '{stage}': worker '{worker}' requires capability '{capability}' but no tool is bound")]
    CapabilityUnavailable {
        stage: String,
        worker: String,
        capability: Capability,
    },

    #[error("stage '{stage}' failed: {source}")]
    StageExecution {
        stage: String,
        #[source]
        source: WorkerError,
    },

    #[error("invalid pipeline definition: {0}")]
    InvalidPipeline(#[from] DefinitionError),

    #[error("invalid template: {0}")]
    Template(#[from] TemplateError),

    #[error("run cancelled before stage '{next_stage}'")]
    Cancelled { next_stage: String },
}

impl PipelineError {
    /// 错误所指的阶段（如果有）
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::CapabilityUnavailable { stage, .. } | Self::StageExecution { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

/// 流水线定义错误（构建期发现，任何阶段都不会执行）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("pipeline '{0}' has no stages")]
    Empty(String),

    #[error("duplicate worker name '{0}'")]
    DuplicateWorker(String),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage '{stage}' is assigned to unknown worker '{worker}'")]
    UnknownWorker { stage: String, worker: String },

    #[error("stage '{stage}' references unknown stage '{referenced}'")]
    UnknownStageReference { stage: String, referenced: String },

    #[error("stage '{stage}' references '{referenced}', which does not run before it")]
    ForwardReference { stage: String, referenced: String },

    #[error("worker '{worker}' templates may only reference inputs, found stage '{referenced}'")]
    WorkerStageReference { worker: String, referenced: String },

    #[error("worker '{worker}' delegates to unknown worker '{delegate}'")]
    UnknownDelegate { worker: String, delegate: String },

    #[error("worker '{0}' cannot delegate to itself")]
    SelfDelegation(String),

    #[error("malformed pipeline definition: {0}")]
    Malformed(String),
}

/// 单次 Worker 调用失败
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("no final answer after {0} tool/delegation rounds")]
    RoundsExceeded(usize),

    #[error("capability '{0}' is not bound to a tool")]
    CapabilityUnavailable(Capability),

    #[error("template: {0}")]
    Template(#[from] TemplateError),
}

/// 工具调用失败（作为 observation 回灌给模型，不直接终止运行）
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("tool execution failed: {0}")]
    Failed(String),

    #[error("tool timeout: {0}")]
    Timeout(String),
}
