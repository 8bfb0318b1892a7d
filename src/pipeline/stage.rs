//! 阶段描述：名字、负责的 Worker、指令模板、期望输出模板

use serde::{Deserialize, Serialize};

use crate::pipeline::template::PromptTemplate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub name: String,
    /// 负责执行的 Worker 名
    pub worker: String,
    pub instruction: PromptTemplate,
    /// 期望输出的形状描述，同样可引用输入与前序阶段
    pub expected_output: PromptTemplate,
}

impl StageDescriptor {
    pub fn new(
        name: impl Into<String>,
        worker: impl Into<String>,
        instruction: PromptTemplate,
        expected_output: PromptTemplate,
    ) -> Self {
        Self {
            name: name.into(),
            worker: worker.into(),
            instruction,
            expected_output,
        }
    }

    /// 两个模板引用的全部阶段名（按首次出现去重）
    pub fn stage_refs(&self) -> Vec<&str> {
        let mut refs = self.instruction.stage_refs();
        for r in self.expected_output.stage_refs() {
            if !refs.contains(&r) {
                refs.push(r);
            }
        }
        refs
    }

    /// 两个模板引用的全部输入字段
    pub fn input_refs(&self) -> std::collections::BTreeSet<&str> {
        let mut refs = self.instruction.input_refs();
        refs.extend(self.expected_output.input_refs());
        refs
    }
}
