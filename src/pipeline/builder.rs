//! 流水线构建器
//!
//! 提供流畅的 API 声明 Worker 与有序阶段；build() 一次性做全部静态校验：
//! 名字唯一、阶段指向已声明的 Worker、阶段引用只能指向在其之前执行的阶段、委派集合封闭。

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::core::{DefinitionError, PipelineError};
use crate::pipeline::stage::StageDescriptor;
use crate::pipeline::template::PromptTemplate;
use crate::pipeline::types::InputContext;
use crate::pipeline::worker::Worker;

/// 已校验的流水线定义；Clone 只复制 Arc<Worker>，可在并发运行间共享
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    workers: BTreeMap<String, Arc<Worker>>,
    stages: Vec<StageDescriptor>,
    report_sections: Vec<String>,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn workers(&self) -> &BTreeMap<String, Arc<Worker>> {
        &self.workers
    }

    pub fn worker(&self, name: &str) -> Option<&Arc<Worker>> {
        self.workers.get(name)
    }

    /// 终止聚合阶段要求的报告小节（未使用 aggregate 时为空）
    pub fn report_sections(&self) -> &[String] {
        &self.report_sections
    }

    /// 所有模板（阶段指令、期望输出、Worker 的 goal / backstory）引用的输入字段
    pub fn required_inputs(&self) -> BTreeSet<&str> {
        let mut refs = BTreeSet::new();
        for stage in &self.stages {
            refs.extend(stage.input_refs());
        }
        for worker in self.workers.values() {
            refs.extend(worker.goal.input_refs());
            refs.extend(worker.backstory.input_refs());
        }
        refs
    }

    /// 缺失的输入字段（已排序）
    pub fn missing_inputs(&self, inputs: &InputContext) -> Vec<String> {
        self.required_inputs()
            .into_iter()
            .filter(|name| !inputs.contains(name))
            .map(str::to_string)
            .collect()
    }
}

/// 流水线构建器
pub struct PipelineBuilder {
    name: String,
    workers: Vec<Worker>,
    stages: Vec<StageDescriptor>,
    report_sections: Vec<String>,
    aggregator: Option<String>,
    error: Option<PipelineError>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: Vec::new(),
            stages: Vec::new(),
            report_sections: Vec::new(),
            aggregator: None,
            error: None,
        }
    }

    fn record(&mut self, err: PipelineError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// 声明 Worker
    pub fn worker(mut self, worker: Worker) -> Self {
        self.workers.push(worker);
        self
    }

    /// 追加阶段（模板文本在此解析，错误延迟到 build 报告）
    pub fn stage(
        mut self,
        name: impl Into<String>,
        worker: impl Into<String>,
        instruction: &str,
        expected_output: &str,
    ) -> Self {
        match (PromptTemplate::parse(instruction), PromptTemplate::parse(expected_output)) {
            (Ok(instruction), Ok(expected_output)) => {
                let stage = StageDescriptor::new(name, worker, instruction, expected_output);
                self = self.stage_descriptor(stage);
            }
            (Err(e), _) | (_, Err(e)) => self.record(e.into()),
        }
        self
    }

    /// 追加已构造的阶段
    pub fn stage_descriptor(mut self, stage: StageDescriptor) -> Self {
        if let Some(agg) = &self.aggregator {
            let err = DefinitionError::Malformed(format!(
                "stage '{}' declared after aggregator stage '{}'",
                stage.name, agg
            ));
            self.record(err.into());
        }
        self.stages.push(stage);
        self
    }

    /// 追加终止聚合阶段：指令按声明顺序引用此前所有阶段的输出，期望输出固定小节顺序
    pub fn aggregate(
        mut self,
        name: impl Into<String>,
        worker: impl Into<String>,
        intro: &str,
        sections: &[&str],
    ) -> Self {
        let name = name.into();
        let mut instruction = intro.trim_end().to_string();
        instruction.push_str("\n\nMaterial from the previous stages:\n");
        for stage in &self.stages {
            instruction.push_str(&format!("\n### {0}\n{{stage:{0}}}\n", stage.name));
        }

        let mut expected = String::from(
            "A markdown report with exactly these level-2 sections, in this order, and nothing before the first one:\n",
        );
        for (i, section) in sections.iter().enumerate() {
            expected.push_str(&format!("{}. ## {}\n", i + 1, escape_braces(section)));
        }

        match (PromptTemplate::parse(&instruction), PromptTemplate::parse(&expected)) {
            (Ok(instruction), Ok(expected_output)) => {
                let stage = StageDescriptor::new(name.clone(), worker, instruction, expected_output);
                self = self.stage_descriptor(stage);
                self.aggregator = Some(name);
                self.report_sections = sections.iter().map(|s| s.to_string()).collect();
            }
            (Err(e), _) | (_, Err(e)) => self.record(e.into()),
        }
        self
    }

    /// 构建并校验
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.stages.is_empty() {
            return Err(DefinitionError::Empty(self.name).into());
        }

        let mut workers = BTreeMap::new();
        for worker in self.workers {
            if workers.contains_key(&worker.name) {
                return Err(DefinitionError::DuplicateWorker(worker.name).into());
            }
            workers.insert(worker.name.clone(), Arc::new(worker));
        }

        for worker in workers.values() {
            if let Some(referenced) = worker
                .goal
                .stage_refs()
                .into_iter()
                .chain(worker.backstory.stage_refs())
                .next()
            {
                return Err(DefinitionError::WorkerStageReference {
                    worker: worker.name.clone(),
                    referenced: referenced.to_string(),
                }
                .into());
            }
            for delegate in &worker.delegates {
                if delegate == &worker.name {
                    return Err(DefinitionError::SelfDelegation(worker.name.clone()).into());
                }
                if !workers.contains_key(delegate) {
                    return Err(DefinitionError::UnknownDelegate {
                        worker: worker.name.clone(),
                        delegate: delegate.clone(),
                    }
                    .into());
                }
            }
        }

        let all_stages: HashSet<&str> = self.stages.iter().map(|s| s.name.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            if seen.contains(stage.name.as_str()) {
                return Err(DefinitionError::DuplicateStage(stage.name.clone()).into());
            }
            if !workers.contains_key(&stage.worker) {
                return Err(DefinitionError::UnknownWorker {
                    stage: stage.name.clone(),
                    worker: stage.worker.clone(),
                }
                .into());
            }
            for referenced in stage.stage_refs() {
                if seen.contains(referenced) {
                    continue;
                }
                let err = if all_stages.contains(referenced) {
                    DefinitionError::ForwardReference {
                        stage: stage.name.clone(),
                        referenced: referenced.to_string(),
                    }
                } else {
                    DefinitionError::UnknownStageReference {
                        stage: stage.name.clone(),
                        referenced: referenced.to_string(),
                    }
                };
                return Err(err.into());
            }
            seen.insert(stage.name.as_str());
        }

        tracing::debug!(pipeline = %self.name, stages = self.stages.len(), workers = workers.len(), "pipeline built");
        Ok(Pipeline {
            name: self.name,
            workers,
            stages: self.stages,
            report_sections: self.report_sections,
        })
    }
}

fn escape_braces(s: &str) -> String {
    s.replace('{', "{{").replace('}', "}}")
}
