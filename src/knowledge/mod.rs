//! 知识附件：运行前加载一次，只读共享给所有 Worker

pub mod loader;

pub use loader::{
    ExtractionStrategy, KnowledgeAttachment, KnowledgeDocument, KnowledgeError, KnowledgeLoader,
    KnowledgeSource,
};
