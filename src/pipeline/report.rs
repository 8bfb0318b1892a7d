//! 最终报告：聚合阶段的输出，附带 Markdown 小节顺序检查

use crate::pipeline::types::StageOutput;

/// 终止阶段的输出与其要求的小节顺序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalReport {
    output: StageOutput,
    expected_sections: Vec<String>,
}

impl FinalReport {
    pub fn new(output: StageOutput, expected_sections: Vec<String>) -> Self {
        Self {
            output,
            expected_sections,
        }
    }

    pub fn output(&self) -> &StageOutput {
        &self.output
    }

    /// Markdown 正文
    pub fn content(&self) -> &str {
        &self.output.content
    }

    pub fn expected_sections(&self) -> &[String] {
        &self.expected_sections
    }

    /// 报告中的二级标题（跳过代码块内的行）
    pub fn sections(&self) -> Vec<String> {
        markdown_sections(&self.output.content)
    }

    /// 期望的小节全部出现且相对顺序一致（大小写不敏感，允许穿插其他小节）
    pub fn follows_section_order(&self) -> bool {
        let found: Vec<String> = self.sections().iter().map(|s| s.to_lowercase()).collect();
        let mut cursor = 0;
        for expected in &self.expected_sections {
            let expected = expected.to_lowercase();
            match found[cursor..].iter().position(|s| *s == expected) {
                Some(pos) => cursor += pos + 1,
                None => return false,
            }
        }
        true
    }

    /// 缺失的期望小节
    pub fn missing_sections(&self) -> Vec<String> {
        let found: Vec<String> = self.sections().iter().map(|s| s.to_lowercase()).collect();
        self.expected_sections
            .iter()
            .filter(|s| !found.contains(&s.to_lowercase()))
            .cloned()
            .collect()
    }
}

/// 提取 `## Heading` 形式的标题文本，去掉 `**`、结尾 `#` 与冒号
pub fn markdown_sections(markdown: &str) -> Vec<String> {
    let mut in_fence = false;
    let mut sections = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let Some(rest) = trimmed.strip_prefix("## ") else {
            continue;
        };
        let title = rest
            .trim()
            .trim_end_matches('#')
            .trim()
            .trim_end_matches(':')
            .trim_matches('*')
            .trim_end_matches(':')
            .trim();
        if !title.is_empty() {
            sections.push(title.to_string());
        }
    }
    sections
}
