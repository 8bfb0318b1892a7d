//! JobFlow - 求职助手流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量），凭据只经由显式配置传入
//! - **core**: 错误分类（MissingParameter / KnowledgeLoad / CapabilityUnavailable / StageExecution 等）
//! - **jobsearch**: 求职调研流水线预设（10 个 Worker / Stage，最后一步汇总报告）
//! - **knowledge**: 知识附件（简历 PDF / 文本），每次运行加载一次、只读共享
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Gemini / DeepSeek / Mock）
//! - **observability**: tracing 日志初始化
//! - **pipeline**: 顺序多阶段流水线（模板、Worker、Stage、Builder、Runner、事件、报告）
//! - **preferences**: 求职偏好表单记录的解析与校验（与流水线无关的独立入口）
//! - **tools**: 工具注册表、执行器与 Web 搜索工具

pub mod config;
pub mod core;
pub mod jobsearch;
pub mod knowledge;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod preferences;
pub mod tools;

pub use crate::core::PipelineError;
pub use pipeline::{
    InputContext, Pipeline, PipelineBuilder, PipelineRun, PipelineRunner, RunFailure,
    RunnerConfig, StageDescriptor, Worker,
};
