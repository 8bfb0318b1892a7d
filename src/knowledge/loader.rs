//! 知识附件加载器
//!
//! 支持 PDF 文本提取（pdf-extract）与纯文本 / Markdown；相对路径先按原样查找，找不到再到 base_dir 下查找。
//! 任一文档不可读、解析失败或提取为空都会返回 KnowledgeError，整次运行在第一个阶段之前终止。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 文本提取策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// 按扩展名选择：.pdf 走 PdfText，其余走 PlainText
    #[default]
    Auto,
    PdfText,
    PlainText,
}

/// 文档引用：路径 + 提取策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub path: PathBuf,
    #[serde(default)]
    pub strategy: ExtractionStrategy,
}

impl KnowledgeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            strategy: ExtractionStrategy::Auto,
        }
    }

    pub fn pdf(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            strategy: ExtractionStrategy::PdfText,
        }
    }

    fn effective_strategy(&self) -> ExtractionStrategy {
        match self.strategy {
            ExtractionStrategy::Auto => {
                let is_pdf = self
                    .path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false);
                if is_pdf {
                    ExtractionStrategy::PdfText
                } else {
                    ExtractionStrategy::PlainText
                }
            }
            other => other,
        }
    }
}

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot extract text from {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("{0} contains no extractable text")]
    Empty(PathBuf),
}

/// 加载后的单个文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeDocument {
    pub source: PathBuf,
    pub text: String,
}

impl KnowledgeDocument {
    /// 文件名（prompt 中的小标题）
    pub fn title(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// 一次运行共享的只读知识附件；Clone 只复制 Arc
#[derive(Debug, Clone, Default)]
pub struct KnowledgeAttachment {
    documents: Arc<[KnowledgeDocument]>,
}

impl KnowledgeAttachment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: Vec<KnowledgeDocument>) -> Self {
        Self {
            documents: documents.into(),
        }
    }

    pub fn documents(&self) -> &[KnowledgeDocument] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// 渲染为 prompt 段落；总长度超过 max_chars 时截断并追加 ...[truncated]
    pub fn render(&self, max_chars: usize) -> Option<String> {
        if self.documents.is_empty() {
            return None;
        }
        let full = self
            .documents
            .iter()
            .map(|d| format!("### {}\n{}", d.title(), d.text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");

        if full.chars().count() > max_chars {
            Some(full.chars().take(max_chars).collect::<String>() + "\n...[truncated]")
        } else {
            Some(full)
        }
    }
}

/// 加载器：持有相对路径的查找目录
#[derive(Debug, Clone, Default)]
pub struct KnowledgeLoader {
    base_dir: Option<PathBuf>,
}

impl KnowledgeLoader {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.exists() {
            return path.to_path_buf();
        }
        match &self.base_dir {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }

    /// 依次加载所有文档；PDF 提取在阻塞线程池中进行
    pub async fn load(&self, sources: &[KnowledgeSource]) -> Result<KnowledgeAttachment, KnowledgeError> {
        let mut documents = Vec::with_capacity(sources.len());
        for source in sources {
            let path = self.resolve(&source.path);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| KnowledgeError::Unreadable {
                    path: path.clone(),
                    source: e,
                })?;

            let text = match source.effective_strategy() {
                ExtractionStrategy::PdfText => {
                    let p = path.clone();
                    tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
                        .await
                        .map_err(|e| KnowledgeError::Extraction {
                            path: p,
                            reason: e.to_string(),
                        })?
                        .map_err(|reason| KnowledgeError::Extraction {
                            path: path.clone(),
                            reason,
                        })?
                }
                _ => String::from_utf8(bytes).map_err(|e| KnowledgeError::Extraction {
                    path: path.clone(),
                    reason: e.to_string(),
                })?,
            };

            if text.trim().is_empty() {
                return Err(KnowledgeError::Empty(path));
            }
            tracing::info!(path = %path.display(), chars = text.chars().count(), "knowledge document loaded");
            documents.push(KnowledgeDocument { source: path, text });
        }
        Ok(KnowledgeAttachment::from_documents(documents))
    }
}

/// pdf-extract 在部分损坏文件上会 panic，这里统一转为错误
fn extract_pdf_text(bytes: &[u8]) -> Result<String, String> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("PDF parser panicked on malformed input".to_string()),
    }
}
