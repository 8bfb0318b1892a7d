//! 顺序多阶段流水线
//!
//! - template: `{field}` / `{stage:name}` 类型化模板
//! - worker: 角色化执行单元（工具与委派循环）
//! - builder: 声明与静态校验
//! - runner: 串行执行、失败即停、阶段边界取消
//! - report: 最终报告的小节顺序检查
//! - definition: TOML 声明式定义

pub mod builder;
pub mod definition;
pub mod events;
pub mod report;
pub mod runner;
pub mod stage;
pub mod template;
pub mod types;
pub mod worker;

pub use builder::{Pipeline, PipelineBuilder};
pub use definition::{AggregateDefinition, PipelineDefinition, WorkerDefinition};
pub use events::{EventSender, PipelineEvent};
pub use report::{markdown_sections, FinalReport};
pub use runner::{PipelineRun, PipelineRunner, RunFailure, RunOptions, RunnerConfig};
pub use stage::StageDescriptor;
pub use template::{Placeholder, PromptTemplate, TemplateError};
pub use types::{FailurePoint, InputContext, InvalidTransition, RunState, StageOutput, StageOutputs};
pub use worker::{parse_worker_output, Capability, InvocationContext, Worker, WorkerAction};
