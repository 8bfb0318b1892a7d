//! Web 搜索工具（Serper 兼容 API）
//!
//! POST {endpoint}，请求头 X-API-KEY，请求体 {"q": ..., "num": ..., "gl": ...}；
//! 从响应的 organic 列表中提取 (title, snippet, url)，按排名顺序返回。
//! 配额耗尽、HTTP 错误、响应无法解析都不是致命错误：Worker 看到的是空结果集。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SearchSection;
use crate::tools::Tool;

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// 返回给模型的结果体
#[derive(Debug, Serialize)]
struct SearchResults<'a> {
    query: &'a str,
    results: Vec<SearchHit>,
}

/// 搜索工具：api_key、端点、超时、最大条数由 [search] 段决定
pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
    country: Option<String>,
}

/// 从 Serper 响应中提取 organic 结果；缺字段的条目跳过
pub fn parse_search_response(body: &Value, max_results: usize) -> Vec<SearchHit> {
    body.get("organic")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let title = item.get("title")?.as_str()?.trim();
                    let url = item.get("link")?.as_str()?.trim();
                    if url.is_empty() {
                        return None;
                    }
                    let snippet = item
                        .get("snippet")
                        .and_then(|s| s.as_str())
                        .unwrap_or("")
                        .trim();
                    Some(SearchHit {
                        title: title.to_string(),
                        snippet: snippet.to_string(),
                        url: url.to_string(),
                    })
                })
                .take(max_results)
                .collect()
        })
        .unwrap_or_default()
}

impl WebSearchTool {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
        max_results: usize,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            max_results,
            country: None,
        }
    }

    /// 根据 [search] 段构建；未配置 api_key 时返回 None（不注册该工具）
    pub fn from_config(cfg: &SearchSection) -> Option<Self> {
        let key = cfg.api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        let mut tool = Self::new(&cfg.endpoint, key, cfg.timeout_secs, cfg.max_results);
        tool.country = cfg.country.clone();
        Some(tool)
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
        let mut body = serde_json::json!({ "q": query, "num": self.max_results });
        if let Some(gl) = &self.country {
            body["gl"] = Value::String(gl.clone());
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        Ok(parse_search_response(&json, self.max_results))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a ranked list of {title, snippet, url}. Args: {\"query\": \"search terms\"}."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        tracing::info!(query = %query, "web search");

        let results = match self.search(query).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "web search failed, returning no results");
                Vec::new()
            }
        };
        serde_json::to_string(&SearchResults { query, results }).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_organic_results() {
        let body = serde_json::json!({
            "searchParameters": { "q": "Acme Corp careers" },
            "organic": [
                { "title": "Careers at Acme", "link": "https://acme.example/careers", "snippet": "Open roles", "position": 1 },
                { "title": "No link here" },
                { "title": "Acme on LinkedIn", "link": "https://linkedin.example/acme", "position": 3 }
            ]
        });
        let hits = parse_search_response(&body, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://acme.example/careers");
        assert_eq!(hits[1].snippet, "");
    }

    #[test]
    fn test_parse_respects_limit_and_missing_organic() {
        let body = serde_json::json!({
            "organic": [
                { "title": "a", "link": "https://a.example" },
                { "title": "b", "link": "https://b.example" }
            ]
        });
        assert_eq!(parse_search_response(&body, 1).len(), 1);
        assert!(parse_search_response(&serde_json::json!({"message": "quota"}), 5).is_empty());
    }

    #[test]
    fn test_from_config_requires_key() {
        let cfg = SearchSection::default();
        assert!(WebSearchTool::from_config(&cfg).is_none());
        let cfg = SearchSection {
            api_key: Some("serper-key".to_string()),
            ..SearchSection::default()
        };
        assert!(WebSearchTool::from_config(&cfg).is_some());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_empty_results() {
        let tool = WebSearchTool::new("http://127.0.0.1:9/search", "k", 2, 5);
        let out = tool
            .execute(serde_json::json!({"query": "Acme Corp"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["query"], "Acme Corp");
        assert_eq!(parsed["results"].as_array().map(|a| a.len()), Some(0));
    }

    #[tokio::test]
    async fn test_missing_query_is_error() {
        let tool = WebSearchTool::new("http://127.0.0.1:9/search", "k", 2, 5);
        assert!(tool.execute(serde_json::json!({})).await.is_err());
    }
}
