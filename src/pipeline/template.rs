//! 类型化指令模板
//!
//! 语法：`{field}` 引用输入参数，`{stage:name}` 引用前序阶段的输出，`{{` / `}}` 为字面量花括号。
//! 模板在构造时一次性解析，占位符集合可在执行前静态检查；未闭合的花括号与非法名字在解析期即报错。

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::types::{InputContext, StageOutputs};

const STAGE_PREFIX: &str = "stage:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unbalanced brace near '{0}'")]
    Unbalanced(String),

    #[error("invalid placeholder '{{{0}}}'")]
    InvalidPlaceholder(String),

    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("missing output of stage '{0}'")]
    MissingStageOutput(String),
}

/// 占位符：输入字段或阶段输出
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placeholder {
    Input(String),
    Stage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Placeholder),
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("static regex"))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), TemplateError> {
    if let Some(pos) = text.find(['{', '}']) {
        let context: String = text[pos..].chars().take(24).collect();
        return Err(TemplateError::Unbalanced(context));
    }
    if text.is_empty() {
        return Ok(());
    }
    match segments.last_mut() {
        Some(Segment::Literal(prev)) => prev.push_str(text),
        _ => segments.push(Segment::Literal(text.to_string())),
    }
    Ok(())
}

/// 已解析的模板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        for caps in token_regex().captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            push_literal(&mut segments, &source[cursor..whole.start()])?;
            cursor = whole.end();

            match (whole.as_str(), caps.get(1)) {
                ("{{", _) => append_raw(&mut segments, "{"),
                ("}}", _) => append_raw(&mut segments, "}"),
                (_, Some(inner)) => {
                    let name = inner.as_str().trim();
                    let placeholder = match name.strip_prefix(STAGE_PREFIX) {
                        Some(stage) => Placeholder::Stage(stage.trim().to_string()),
                        None => Placeholder::Input(name.to_string()),
                    };
                    let ident = match &placeholder {
                        Placeholder::Input(n) | Placeholder::Stage(n) => n,
                    };
                    if !is_identifier(ident) {
                        return Err(TemplateError::InvalidPlaceholder(name.to_string()));
                    }
                    segments.push(Segment::Slot(placeholder));
                }
                _ => {}
            }
        }
        push_literal(&mut segments, &source[cursor..])?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// 原始模板文本
    pub fn source(&self) -> &str {
        &self.source
    }

    fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Slot(p) => Some(p),
            Segment::Literal(_) => None,
        })
    }

    /// 引用的输入字段（去重、有序）
    pub fn input_refs(&self) -> BTreeSet<&str> {
        self.placeholders()
            .filter_map(|p| match p {
                Placeholder::Input(n) => Some(n.as_str()),
                Placeholder::Stage(_) => None,
            })
            .collect()
    }

    /// 引用的阶段名（按首次出现顺序去重）
    pub fn stage_refs(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.placeholders()
            .filter_map(|p| match p {
                Placeholder::Stage(n) => Some(n.as_str()),
                Placeholder::Input(_) => None,
            })
            .filter(|n| seen.insert(*n))
            .collect()
    }

    /// 用输入与已完成的阶段输出替换占位符
    pub fn render(&self, inputs: &InputContext, outputs: &StageOutputs) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(Placeholder::Input(name)) => {
                    let value = inputs
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingInput(name.clone()))?;
                    out.push_str(value);
                }
                Segment::Slot(Placeholder::Stage(name)) => {
                    let output = outputs
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingStageOutput(name.clone()))?;
                    out.push_str(&output.content);
                }
            }
        }
        Ok(out)
    }
}

/// 转义得到的花括号直接并入字面量，不再做平衡检查
fn append_raw(segments: &mut Vec<Segment>, text: &str) {
    match segments.last_mut() {
        Some(Segment::Literal(prev)) => prev.push_str(text),
        _ => segments.push(Segment::Literal(text.to_string())),
    }
}

impl FromStr for PromptTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PromptTemplate {
    type Error = TemplateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PromptTemplate> for String {
    fn from(t: PromptTemplate) -> Self {
        t.source
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for PromptTemplate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for PromptTemplate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::StageOutput;

    fn inputs() -> InputContext {
        InputContext::new()
            .with("company_name", "Acme Corp")
            .with("role", "Backend Engineer")
    }

    #[test]
    fn test_parse_collects_references() {
        let t = PromptTemplate::parse(
            "Openings at {company_name} for {role}; see {stage:job_scout} and {company_name} and { stage: job_scout }",
        )
        .unwrap();
        assert_eq!(
            t.input_refs().into_iter().collect::<Vec<_>>(),
            vec!["company_name", "role"]
        );
        assert_eq!(t.stage_refs(), vec!["job_scout"]);
    }

    #[test]
    fn test_render_substitutes_inputs_and_outputs() {
        let t = PromptTemplate::parse("Evaluate {role} roles:\n{stage:job_scout}").unwrap();
        let mut outputs = StageOutputs::default();
        outputs.push(StageOutput::new("job_scout", "JobScout", "", "1. Platform Engineer"));
        let text = t.render(&inputs(), &outputs).unwrap();
        assert_eq!(text, "Evaluate Backend Engineer roles:\n1. Platform Engineer");
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        let t = PromptTemplate::parse("Return JSON like {{\"score\": 80}} for {role}").unwrap();
        assert!(t.stage_refs().is_empty());
        let text = t.render(&inputs(), &StageOutputs::default()).unwrap();
        assert_eq!(text, "Return JSON like {\"score\": 80} for Backend Engineer");
    }

    #[test]
    fn test_unbalanced_and_invalid_rejected() {
        assert!(matches!(
            PromptTemplate::parse("Research {company_name"),
            Err(TemplateError::Unbalanced(_))
        ));
        assert!(matches!(
            PromptTemplate::parse("stray } brace"),
            Err(TemplateError::Unbalanced(_))
        ));
        assert!(matches!(
            PromptTemplate::parse("bad {company name}"),
            Err(TemplateError::InvalidPlaceholder(_))
        ));
        assert!(matches!(
            PromptTemplate::parse("empty {}"),
            Err(TemplateError::InvalidPlaceholder(_))
        ));
    }

    #[test]
    fn test_render_reports_missing_values() {
        let t = PromptTemplate::parse("{university_name}").unwrap();
        assert_eq!(
            t.render(&inputs(), &StageOutputs::default()),
            Err(TemplateError::MissingInput("university_name".to_string()))
        );
        let t = PromptTemplate::parse("{stage:later}").unwrap();
        assert_eq!(
            t.render(&inputs(), &StageOutputs::default()),
            Err(TemplateError::MissingStageOutput("later".to_string()))
        );
    }

    #[test]
    fn test_serde_round_trip_through_string() {
        let t: PromptTemplate = serde_json::from_str("\"Hi {role}\"").unwrap();
        assert_eq!(t.source(), "Hi {role}");
        assert!(serde_json::from_str::<PromptTemplate>("\"Hi {role\"").is_err());
    }
}
