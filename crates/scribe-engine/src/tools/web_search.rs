use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use scribe_core::tools::{LatencyClass, Tool, ToolContext, ToolError, ToolOutput};

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
pub const API_KEY_VAR: &str = "BRAVE_SEARCH_API_KEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RESULTS: u64 = 20;

/// Web search through the Brave Search API.
pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    default_count: u64,
}

impl WebSearchTool {
    /// Build with the API key from the environment, if set.
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);
        Self::new(api_key)
    }

    pub fn new(api_key: Option<SecretString>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("scribe/0.1")
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            default_count: 5,
        }
    }

    pub fn with_default_count(mut self, count: u32) -> Self {
        self.default_count = u64::from(count).clamp(1, MAX_RESULTS);
        self
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for research material"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results (default: 5, max: 20)"
                }
            }
        })
    }

    fn latency_class(&self) -> LatencyClass {
        LatencyClass::Network
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = args["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("query is required".into()))?;

        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ToolError::ExecutionFailed(format!(
                "{API_KEY_VAR} not set. Web search requires an API key."
            ))
        })?;

        let count = args["count"]
            .as_u64()
            .unwrap_or(self.default_count)
            .clamp(1, MAX_RESULTS)
            .to_string();

        let response = self
            .client
            .get(BRAVE_SEARCH_URL)
            .header("X-Subscription-Token", api_key.expose_secret())
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionFailed(format!(
                "search failed: HTTP {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to parse response: {e}")))?;

        Ok(ToolOutput::text(format_search_results(&body)))
    }
}

fn format_search_results(body: &Value) -> String {
    let mut output = String::new();

    if let Some(results) = body["web"]["results"].as_array() {
        for (i, result) in results.iter().enumerate() {
            let title = result["title"].as_str().unwrap_or("(untitled)");
            let url = result["url"].as_str().unwrap_or("");
            let description = result["description"].as_str().unwrap_or("");

            output.push_str(&format!("{}. [{}]({})\n", i + 1, title, url));
            if !description.is_empty() {
                output.push_str(&format!("   {description}\n"));
            }
            output.push('\n');
        }
    }

    if output.is_empty() {
        output = "No search results found.".to_string();
    }

    output
}
