pub mod executor;
pub mod registry;
pub mod search;

pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use search::{parse_search_response, SearchHit, WebSearchTool};
