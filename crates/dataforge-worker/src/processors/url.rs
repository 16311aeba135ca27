//! URL processor family: crawling and content extraction over HTTP.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use serde_json::{Value, json};
use tracing::{debug, warn};

use dataforge_entity::task::Task;

use crate::processor::{ExecutionContext, Processor, ProcessorError};

/// Default maximum number of pages fetched by a crawl.
const DEFAULT_MAX_PAGES: usize = 20;
/// Default crawl depth.
const DEFAULT_CRAWL_DEPTH: u64 = 1;
/// Number of items kept as sample data in the result.
const SAMPLE_ITEMS: usize = 5;

/// Processor for HTTP fetching tasks.
///
/// Supported types: `url_crawl` (same-host breadth-first crawl bounded by
/// `crawl_depth` and `max_pages`) and `url_extract` (regex extraction over
/// one fetched page). Cancellation checkpoint granularity: one check per
/// fetched page, so worst-case cancellation latency is one HTTP request.
#[derive(Debug)]
pub struct UrlProcessor {
    client: reqwest::Client,
}

impl UrlProcessor {
    /// Create a new URL processor with a dedicated HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for UrlProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for UrlProcessor {
    fn supported_types(&self) -> &[&'static str] {
        &["url_crawl", "url_extract"]
    }

    fn validate_parameters(&self, task_type: &str, parameters: &Value) -> bool {
        let has_url = parameters
            .get("url")
            .and_then(|v| v.as_str())
            .is_some_and(|u| Url::parse(u).is_ok());
        match task_type {
            "url_crawl" => {
                has_url
                    && parameters
                        .get("crawl_depth")
                        .is_none_or(|v| v.as_u64().is_some())
                    && parameters
                        .get("max_pages")
                        .is_none_or(|v| v.as_u64().is_some())
            }
            "url_extract" => {
                has_url
                    && parameters
                        .get("pattern")
                        .and_then(|v| v.as_str())
                        .is_some_and(|p| Regex::new(p).is_ok())
            }
            _ => false,
        }
    }

    async fn run(&self, task: &Task, ctx: &ExecutionContext) -> Result<Value, ProcessorError> {
        let parameters = task.parameters.clone().unwrap_or(Value::Null);
        let url = parameters
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProcessorError::failed("Missing 'url' parameter"))?;
        let start = Url::parse(url)
            .map_err(|e| ProcessorError::failed(format!("Invalid URL '{url}': {e}")))?;

        match task.task_type.as_str() {
            "url_crawl" => self.crawl(start, &parameters, ctx).await,
            "url_extract" => self.extract(start, &parameters, ctx).await,
            other => Err(ProcessorError::failed(format!(
                "Unsupported task type: '{other}'"
            ))),
        }
    }
}

impl UrlProcessor {
    /// Breadth-first crawl from the start URL, restricted to the start
    /// host unless `follow_external` is set.
    async fn crawl(
        &self,
        start: Url,
        parameters: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ProcessorError> {
        let max_depth = parameters
            .get("crawl_depth")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_CRAWL_DEPTH);
        let max_pages = parameters
            .get("max_pages")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_PAGES as u64) as usize;
        let follow_external = parameters
            .get("follow_external")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let origin_host = start.host_str().map(str::to_string);
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Url, u64)> = VecDeque::from([(start, 0)]);
        let mut fetched = 0usize;
        let mut links_found = 0usize;
        let mut samples: Vec<Value> = Vec::new();

        while let Some((url, depth)) = queue.pop_front() {
            if fetched >= max_pages {
                break;
            }
            if !visited.insert(url.to_string()) {
                continue;
            }

            ctx.checkpoint()?;
            let body = match self.fetch(&url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %url, "Fetch failed during crawl: {e}");
                    continue;
                }
            };
            fetched += 1;
            if samples.len() < SAMPLE_ITEMS {
                samples.push(json!(url.to_string()));
            }
            ctx.report_progress((fetched * 95 / max_pages.max(1)) as i32).await;

            if depth >= max_depth {
                continue;
            }
            for link in extract_links(&url, &body) {
                links_found += 1;
                let same_host = origin_host.as_deref() == link.host_str();
                if (follow_external || same_host) && !visited.contains(link.as_str()) {
                    queue.push_back((link, depth + 1));
                }
            }
        }

        debug!(fetched, links_found, "Crawl finished");
        Ok(json!({
            "success": true,
            "pages": fetched,
            "links_found": links_found,
            "sample_data": samples,
        }))
    }

    /// Fetch one page and collect regex matches over its body.
    async fn extract(
        &self,
        url: Url,
        parameters: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ProcessorError> {
        let pattern = parameters
            .get("pattern")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProcessorError::failed("Missing 'pattern' parameter"))?;
        let regex = Regex::new(pattern)
            .map_err(|e| ProcessorError::failed(format!("Invalid pattern: {e}")))?;

        ctx.checkpoint()?;
        let body = self.fetch(&url).await?;
        ctx.report_progress(60).await;

        ctx.checkpoint()?;
        let matches: Vec<&str> = regex.find_iter(&body).map(|m| m.as_str()).collect();
        let samples: Vec<Value> = matches
            .iter()
            .take(SAMPLE_ITEMS)
            .map(|m| json!(m))
            .collect();

        Ok(json!({
            "success": true,
            "count": matches.len(),
            "sample_data": samples,
        }))
    }

    async fn fetch(&self, url: &Url) -> Result<String, ProcessorError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ProcessorError::failed(format!("Request to '{url}' failed: {e}")))?;
        let response = response
            .error_for_status()
            .map_err(|e| ProcessorError::failed(format!("Request to '{url}' failed: {e}")))?;
        response
            .text()
            .await
            .map_err(|e| ProcessorError::failed(format!("Failed to read body of '{url}': {e}")))
    }
}

/// Pull `href` targets out of an HTML body, resolved against the page URL.
/// Only http(s) links are kept.
fn extract_links(base: &Url, body: &str) -> Vec<Url> {
    // Good enough for crawling; a full HTML parser is the content layer's
    // concern, not the orchestrator's.
    static HREF: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let href = HREF.get_or_init(|| Regex::new(r#"href\s*=\s*["']([^"'#]+)["']"#).unwrap());

    href.captures_iter(body)
        .filter_map(|captures| base.join(&captures[1]).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_requires_valid_url() {
        let processor = UrlProcessor::new();
        assert!(!processor.validate_parameters("url_crawl", &json!({"url": "not a url"})));
        assert!(processor.validate_parameters("url_crawl", &json!({"url": "https://example.com"})));
    }

    #[test]
    fn test_extract_requires_valid_pattern() {
        let processor = UrlProcessor::new();
        assert!(!processor.validate_parameters(
            "url_extract",
            &json!({"url": "https://example.com", "pattern": "("})
        ));
        assert!(processor.validate_parameters(
            "url_extract",
            &json!({"url": "https://example.com", "pattern": r"\d+"})
        ));
    }

    #[test]
    fn test_extract_links_resolves_and_filters() {
        let base = Url::parse("https://example.com/docs/").unwrap();
        let body = r#"
            <a href="page.html">rel</a>
            <a href="https://other.org/x">abs</a>
            <a href="mailto:team@example.com">mail</a>
        "#;
        let links = extract_links(&base, body);
        assert_eq!(
            links,
            vec![
                Url::parse("https://example.com/docs/page.html").unwrap(),
                Url::parse("https://other.org/x").unwrap(),
            ]
        );
    }
}
