//! web-fetch 工具：抓取网页/文档文本，域名白名单、超时、结果长度限制
//!
//! 仅允许配置中的域名及其子域；HTML 响应用 html2text 转为可读文本；
//! 超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::tools::Tool;

const USER_AGENT: &str = concat!("taskbee/", env!("CARGO_PKG_VERSION"));

pub struct WebFetchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

/// 判断内容是否像 HTML
fn looks_like_html(s: &str) -> bool {
    let head: String = s.trim_start().chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.contains("<head") || head.contains("<body")
}

impl WebFetchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains: allowed_domains.into_iter().map(|s| s.to_lowercase()).collect(),
            max_result_chars,
        }
    }

    /// 校验 URL：仅 http/https，host 为白名单域名或其子域
    fn check_url(&self, raw: &str) -> Result<Url, String> {
        let url = Url::parse(raw).map_err(|e| format!("Invalid URL '{}': {}", raw, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("Unsupported scheme: {}", url.scheme()));
        }
        let host = url
            .host_str()
            .map(|h| h.to_lowercase())
            .ok_or_else(|| "URL has no host".to_string())?;
        let allowed = self
            .allowed_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)));
        if allowed {
            Ok(url)
        } else {
            Err(format!("Domain not in allowlist: {}", host))
        }
    }

    fn truncate(&self, body: String) -> String {
        if body.chars().count() > self.max_result_chars {
            body.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]"
        } else {
            body
        }
    }

    async fn fetch(&self, url: Url) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            html2text::from_read(body.as_bytes(), 120).unwrap_or_else(|_| body.to_string())
        } else {
            body.to_string()
        };
        Ok(self.truncate(text))
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web-fetch"
    }

    fn description(&self) -> &str {
        "Fetch the readable text of a web page or online document (allow-listed domains only)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Absolute http(s) URL" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let raw = args
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if raw.is_empty() {
            return Err("Missing url".to_string());
        }
        let url = self.check_url(raw)?;
        tracing::info!(url = %url, "web-fetch tool execute");
        self.fetch(url).await.map(Value::String)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> WebFetchTool {
        WebFetchTool::new(vec!["docs.rs".into(), "Wikipedia.org".into()], 5, 10)
    }

    #[test]
    fn test_allowlist_accepts_subdomains() {
        let t = tool();
        assert!(t.check_url("https://docs.rs/tokio").is_ok());
        assert!(t.check_url("https://en.wikipedia.org/wiki/Rust").is_ok());
        assert!(t.check_url("https://evil-docs.rs/").is_err());
        assert!(t.check_url("https://example.com/").is_err());
    }

    #[test]
    fn test_rejects_bad_scheme_and_garbage() {
        let t = tool();
        assert!(t.check_url("ftp://docs.rs/x").is_err());
        assert!(t.check_url("not a url").is_err());
    }

    #[test]
    fn test_truncate_and_html_detection() {
        let t = tool();
        assert_eq!(t.truncate("short".into()), "short");
        assert_eq!(t.truncate("0123456789abc".into()), "0123456789\n...[truncated]");
        assert!(looks_like_html("<!DOCTYPE html><html></html>"));
        assert!(!looks_like_html("{\"json\": true}"));
    }
}
