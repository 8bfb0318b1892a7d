//! 流水线运行期数据类型
//!
//! InputContext 在运行开始后不可变；StageOutputs 只追加、按声明顺序排列；
//! RunState 约束一次运行的状态迁移。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 用户输入参数：字段名 → 字符串值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputContext {
    fields: BTreeMap<String, String>,
}

impl InputContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式设置一个字段
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for InputContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl fmt::Display for InputContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", k, v)?;
        }
        Ok(())
    }
}

/// 单个阶段的产出，创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage_name: String,
    pub worker_name: String,
    /// 渲染后实际发给 Worker 的指令
    pub resolved_instruction: String,
    pub content: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StageOutput {
    pub fn new(
        stage_name: impl Into<String>,
        worker_name: impl Into<String>,
        resolved_instruction: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            stage_name: stage_name.into(),
            worker_name: worker_name.into(),
            resolved_instruction: resolved_instruction.into(),
            content: content.into(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.finished_at = finished_at;
        self
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// 只追加的阶段输出序列
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageOutputs {
    items: Vec<StageOutput>,
}

impl StageOutputs {
    pub fn push(&mut self, output: StageOutput) {
        self.items.push(output);
    }

    /// 按阶段名查找
    pub fn get(&self, stage_name: &str) -> Option<&StageOutput> {
        self.items.iter().find(|o| o.stage_name == stage_name)
    }

    pub fn as_slice(&self) -> &[StageOutput] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StageOutput> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&StageOutput> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.items.iter().map(|o| o.stage_name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a StageOutputs {
    type Item = &'a StageOutput;
    type IntoIter = std::slice::Iter<'a, StageOutput>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// 失败发生的位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "stage", rename_all = "snake_case")]
pub enum FailurePoint {
    /// 运行前校验（参数、知识附件）
    Validation,
    /// 某个阶段执行中
    Stage(String),
}

impl fmt::Display for FailurePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => f.write_str("validation"),
            Self::Stage(name) => write!(f, "stage '{}'", name),
        }
    }
}

/// 运行状态机：Pending → Validating → Running(0..n) → Completed，任一阶段可进入 Failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Validating,
    Running { index: usize, stage: String },
    Completed,
    Failed { at: FailurePoint, cause: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid run state transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// 合法迁移：不可重入、不可跳过阶段
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Pending, Validating) => true,
            (Validating, Running { index: 0, .. }) => true,
            (Validating, Failed { at: FailurePoint::Validation, .. }) => true,
            (Running { index: i, .. }, Running { index: j, .. }) => *j == i + 1,
            (Running { .. }, Completed) => true,
            (Running { .. }, Failed { at: FailurePoint::Stage(_), .. }) => true,
            _ => false,
        }
    }

    pub fn transition(&mut self, next: RunState) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.clone(),
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Validating => f.write_str("validating"),
            Self::Running { index, stage } => write!(f, "running #{} ({})", index, stage),
            Self::Completed => f.write_str("completed"),
            Self::Failed { at, cause } => write!(f, "failed at {}: {}", at, cause),
        }
    }
}
