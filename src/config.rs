//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `JOBFLOW__*` 覆盖（双下划线表示嵌套，如 `JOBFLOW__LLM__API_KEY=...`）。
//! 加载完成后配置以值的形式传给各构造函数，运行期间不再读取进程环境。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// [app] 段：应用名、知识附件目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 相对路径的简历等文档在此目录下查找，未设置时用 ./knowledge
    pub knowledge_dir: Option<PathBuf>,
}

/// [llm] 段：后端选择、凭据与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：gemini / openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 模型名；未设置时使用 provider 的默认模型
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_temperature() -> f32 {
    0.5
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒），0 表示沿用后端默认
    #[serde(default)]
    pub request: u64,
}

/// [search] 段：Serper 搜索 API
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    /// 未设置时不注册 web_search 工具，声明该能力的 Worker 会报 CapabilityUnavailable
    pub api_key: Option<String>,
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// 地区代码（Serper 的 gl 参数），如 in、us
    pub country: Option<String>,
}

fn default_search_endpoint() -> String {
    "https://google.serper.dev/search".to_string()
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_max_results() -> usize {
    8
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_search_endpoint(),
            timeout_secs: default_search_timeout_secs(),
            max_results: default_max_results(),
            country: None,
        }
    }
}

/// [pipeline] 段：阶段超时、工具轮数、知识注入长度
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// 单个阶段（一次 Worker 调用）的超时（秒），0 表示不限制
    #[serde(default)]
    pub stage_timeout_secs: u64,
    /// 单个阶段内最多的工具 / 委派往返次数
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// 注入 prompt 的知识文本最大字符数
    #[serde(default = "default_max_knowledge_chars")]
    pub max_knowledge_chars: usize,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_tool_rounds() -> usize {
    6
}

fn default_max_knowledge_chars() -> usize {
    12_000
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 0,
            max_tool_rounds: default_max_tool_rounds(),
            max_knowledge_chars: default_max_knowledge_chars(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 JOBFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 JOBFLOW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("JOBFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "gemini");
        assert!((cfg.llm.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(cfg.search.endpoint, "https://google.serper.dev/search");
        assert_eq!(cfg.pipeline.max_tool_rounds, 6);
        assert_eq!(cfg.pipeline.stage_timeout_secs, 0);
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key = "sk-test"

[pipeline]
max_tool_rounds = 2
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.pipeline.max_tool_rounds, 2);
        assert_eq!(cfg.pipeline.max_knowledge_chars, 12_000);
    }
}
