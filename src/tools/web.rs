//! Web tools: DuckDuckGo search and readable-text page fetch.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::tool::{Approval, Tool, ToolContext, ToolResult};
use crate::error::Result;
use crate::provider::http::shared_client;

const SEARCH_URL: &str = "https://html.duckduckgo.com/html";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_RESULTS: usize = 5;
const MAX_RESULTS: usize = 10;
const DEFAULT_MAX_CHARS: usize = 10_000;
const FETCH_BODY_LIMIT: usize = 5 * 1024 * 1024;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn result_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="[^"]*result__a[^"]*"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("valid regex")
    })
}

fn result_snippet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<a class="result__snippet[^"]*"[^>]*>(.*?)</a>"#).expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

/// Searches the web through DuckDuckGo's HTML endpoint.
pub struct WebSearchTool {
    base_url: String,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            base_url: SEARCH_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn extract_results(&self, html: &str, count: usize, query: &str) -> String {
        let links: Vec<_> = result_link_re().captures_iter(html).take(count).collect();
        if links.is_empty() {
            return format!("No results found for: {query}");
        }
        let snippets: Vec<_> = result_snippet_re()
            .captures_iter(html)
            .take(count)
            .collect();

        let mut lines = vec![format!("Search results for: {query}")];
        for (i, link) in links.iter().enumerate() {
            let url = resolve_redirect(&link[1]);
            let title = strip_tags(&link[2]);
            lines.push(format!("\n{}. {}", i + 1, title.trim()));
            lines.push(format!("   URL: {url}"));
            if let Some(snippet) = snippets.get(i) {
                let snippet = strip_tags(&snippet[1]);
                let snippet = snippet.trim();
                if !snippet.is_empty() {
                    lines.push(format!("   {snippet}"));
                }
            }
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "websearch"
    }

    fn description(&self) -> &str {
        "Search the web using DuckDuckGo. Returns search results with titles, URLs, and \
         snippets. Use this to find current information, news, or any content beyond \
         your knowledge cutoff."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query" },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (default: 5)",
                    "minimum": 1,
                    "maximum": 10
                }
            },
            "required": ["query"]
        })
    }

    fn make_approval(&self, args: &serde_json::Value) -> Option<Approval> {
        let query = args["query"].as_str()?;
        Some(Approval::new(
            "Agent wants to search the web",
            format!("Search: {query}"),
        ))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let Some(query) = args["query"].as_str().filter(|q| !q.is_empty()) else {
            return Ok(ToolResult::error("query is required"));
        };
        let count = args["num_results"]
            .as_u64()
            .map(|n| (n as usize).clamp(1, MAX_RESULTS))
            .unwrap_or(DEFAULT_RESULTS);

        let response = shared_client()
            .get(&self.base_url)
            .query(&[("q", query)])
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => return Ok(ToolResult::error(format!("request failed: {err}"))),
        };
        let html = match response.text().await {
            Ok(html) => html,
            Err(err) => return Ok(ToolResult::error(format!("failed to read response: {err}"))),
        };

        Ok(ToolResult::ok(self.extract_results(&html, count, query)))
    }
}

/// Fetches a URL and extracts readable text from HTML pages.
pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "webfetch"
    }

    fn description(&self) -> &str {
        "Fetch content from a URL. Extracts readable text from web pages. Use this to \
         get detailed content from a specific URL found via web search."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to fetch content from" },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default: 10000)",
                    "minimum": 1000,
                    "maximum": 50000
                }
            },
            "required": ["url"]
        })
    }

    fn make_approval(&self, args: &serde_json::Value) -> Option<Approval> {
        let url = args["url"].as_str()?;
        Some(Approval::new(
            "Agent wants to fetch web content",
            format!("Fetch: {url}"),
        ))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let Some(url) = args["url"].as_str().filter(|u| !u.is_empty()) else {
            return Ok(ToolResult::error("url is required"));
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(ToolResult::error("URL must start with http:// or https://"));
        }
        let max_chars = args["max_chars"]
            .as_u64()
            .map(|n| n as usize)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CHARS);

        let response = shared_client()
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,text/plain;q=0.8,*/*;q=0.1",
            )
            .timeout(FETCH_TIMEOUT)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => return Ok(ToolResult::error(format!("request failed: {err}"))),
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolResult::error(format!(
                "request failed with status: {}",
                status.as_u16()
            )));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/html"))
            .unwrap_or(false);
        let body = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return Ok(ToolResult::error(format!("failed to read response: {err}"))),
        };
        let body = &body[..body.len().min(FETCH_BODY_LIMIT)];
        let mut content = String::from_utf8_lossy(body).into_owned();

        if is_html || looks_like_html(&content) {
            content = extract_text(&content);
        }
        if content.chars().count() > max_chars {
            let cut: String = content.chars().take(max_chars).collect();
            content = format!("{cut}\n... (truncated)");
        }

        Ok(ToolResult::ok(format!("Content from {url}:\n\n{content}")))
    }
}

fn strip_tags(html: &str) -> String {
    tag_re().replace_all(html, "").into_owned()
}

/// DuckDuckGo wraps result links in a redirect with the target in `uddg=`.
fn resolve_redirect(url: &str) -> String {
    let Some(start) = url.find("uddg=") else {
        return url.to_string();
    };
    let encoded = &url[start + 5..];
    let encoded = encoded.split('&').next().unwrap_or(encoded);
    percent_decode(encoded)
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn looks_like_html(content: &str) -> bool {
    let trimmed = content.trim_start();
    trimmed.starts_with("<!DOCTYPE")
        || trimmed.to_lowercase().starts_with("<html")
        || (trimmed.contains('<') && trimmed.contains('>'))
}

/// Drop script/style blocks and tags, then collapse blank lines.
fn extract_text(html: &str) -> String {
    static SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
    static STYLE_RE: OnceLock<Regex> = OnceLock::new();
    let without_script = SCRIPT_RE
        .get_or_init(|| Regex::new(r"(?is)<script.*?</script>").expect("valid regex"))
        .replace_all(html, "");
    let without_style = STYLE_RE
        .get_or_init(|| Regex::new(r"(?is)<style.*?</style>").expect("valid regex"))
        .replace_all(&without_script, "");

    strip_tags(&without_style)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
