//! 流水线运行事件：供 CLI 的 --events 或上层界面实时展示进度

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 运行过程事件（可序列化为 JSON Lines）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        pipeline: String,
        stages: Vec<String>,
    },
    /// 阶段开始（index 从 0 计）
    StageStarted {
        run_id: String,
        index: usize,
        stage: String,
        worker: String,
    },
    StageCompleted {
        run_id: String,
        index: usize,
        stage: String,
        duration_ms: i64,
        preview: String,
    },
    /// Worker 调用工具
    ToolCall {
        stage: String,
        worker: String,
        tool: String,
        args: serde_json::Value,
        ok: bool,
    },
    /// Worker 请求委派；accepted=false 表示被拒绝（不在委派集合内）
    Delegation {
        stage: String,
        from: String,
        to: String,
        accepted: bool,
    },
    RunCompleted {
        run_id: String,
        stages: usize,
    },
    RunFailed {
        run_id: String,
        at: String,
        error: String,
    },
}

/// 可选事件通道
pub type EventSender = UnboundedSender<PipelineEvent>;

/// 接收端已关闭时静默丢弃
pub(crate) fn send_event(tx: Option<&EventSender>, ev: PipelineEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 预览：最多 max_chars 个字符
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let ev = PipelineEvent::Delegation {
            stage: "ats_evaluation".to_string(),
            from: "AtsEvaluator".to_string(),
            to: "JobScout".to_string(),
            accepted: true,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "delegation");
        assert_eq!(json["to"], "JobScout");
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ab", 3), "ab");
    }
}
