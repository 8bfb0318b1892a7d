//! 声明式流水线定义（TOML）
//!
//! ```toml
//! name = "quick-research"
//!
//! [[workers]]
//! name = "Researcher"
//! role = "company researcher"
//! goal = "Research {company_name}"
//! backstory = "Analyst with a knack for public filings"
//! capabilities = ["web_search"]
//!
//! [[stages]]
//! name = "overview"
//! worker = "Researcher"
//! instruction = "Summarise {company_name}"
//! expected_output = "Three bullet points"
//!
//! [aggregate]
//! name = "final_report"
//! worker = "Researcher"
//! intro = "Compile the findings"
//! sections = ["Company Overview", "Sources"]
//! ```
//!
//! 定义同样经过 PipelineBuilder 校验；所有 Worker 共用调用方传入的后端。

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{DefinitionError, PipelineError};
use crate::llm::LlmClient;
use crate::pipeline::builder::{Pipeline, PipelineBuilder};
use crate::pipeline::stage::StageDescriptor;
use crate::pipeline::template::PromptTemplate;
use crate::pipeline::worker::{Capability, Worker};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDefinition {
    pub name: String,
    pub role: String,
    pub goal: PromptTemplate,
    pub backstory: PromptTemplate,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// 非空即开启委派
    #[serde(default)]
    pub delegates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateDefinition {
    pub name: String,
    pub worker: String,
    pub intro: String,
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub workers: Vec<WorkerDefinition>,
    #[serde(default)]
    pub stages: Vec<StageDescriptor>,
    pub aggregate: Option<AggregateDefinition>,
}

impl PipelineDefinition {
    pub fn from_toml_str(s: &str) -> Result<Self, DefinitionError> {
        toml::from_str(s).map_err(|e| DefinitionError::Malformed(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DefinitionError::Malformed(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 绑定后端并构建（经过完整校验）
    pub fn into_pipeline(self, backend: Arc<dyn LlmClient>) -> Result<Pipeline, PipelineError> {
        let mut builder = PipelineBuilder::new(self.name);
        for w in self.workers {
            let mut worker = Worker::new(w.name, w.role, w.goal, w.backstory, backend.clone());
            for cap in w.capabilities {
                worker = worker.with_capability(cap);
            }
            if !w.delegates.is_empty() {
                worker = worker.with_delegates(w.delegates);
            }
            builder = builder.worker(worker);
        }
        for stage in self.stages {
            builder = builder.stage_descriptor(stage);
        }
        if let Some(agg) = self.aggregate {
            let sections: Vec<&str> = agg.sections.iter().map(String::as_str).collect();
            builder = builder.aggregate(agg.name, agg.worker, &agg.intro, &sections);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    const QUICK: &str = r#"
name = "quick-research"

[[workers]]
name = "Researcher"
role = "company researcher"
goal = "Research {company_name}"
backstory = "Analyst"
capabilities = ["web_search"]
delegates = ["Writer"]

[[workers]]
name = "Writer"
role = "report writer"
goal = "Write clearly"
backstory = "Editor"

[[stages]]
name = "overview"
worker = "Researcher"
instruction = "Summarise {company_name} for a {role} candidate"
expected_output = "Three bullet points"

[aggregate]
name = "final_report"
worker = "Writer"
intro = "Compile the findings"
sections = ["Company Overview", "Sources"]
"#;

    #[test]
    fn test_toml_definition_builds() {
        let def = PipelineDefinition::from_toml_str(QUICK).unwrap();
        let pipeline = def.into_pipeline(Arc::new(MockLlmClient)).unwrap();
        assert_eq!(pipeline.stage_names(), vec!["overview", "final_report"]);

        let researcher = pipeline.worker("Researcher").unwrap();
        assert!(researcher.capabilities.contains(&Capability::WebSearch));
        assert!(researcher.allow_delegation);
        assert!(!pipeline.worker("Writer").unwrap().allow_delegation);
        assert_eq!(
            pipeline.required_inputs().into_iter().collect::<Vec<_>>(),
            vec!["company_name", "role"]
        );
    }

    #[test]
    fn test_bad_template_is_malformed() {
        let bad = QUICK.replace("Summarise {company_name}", "Summarise {company_name");
        let err = PipelineDefinition::from_toml_str(&bad).unwrap_err();
        assert!(matches!(err, DefinitionError::Malformed(_)));
    }

    #[test]
    fn test_definition_errors_surface_from_builder() {
        let bad = QUICK.replace("worker = \"Writer\"", "worker = \"Ghost\"");
        let err = PipelineDefinition::from_toml_str(&bad)
            .unwrap()
            .into_pipeline(Arc::new(MockLlmClient))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidPipeline(DefinitionError::UnknownWorker { .. })
        ));
    }
}
