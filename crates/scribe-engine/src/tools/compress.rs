use async_trait::async_trait;
use serde_json::Value;

use scribe_core::tools::{SessionEffect, Tool, ToolContext, ToolError, ToolOutput};

/// Lets the model ask for older turns to be summarized before its next request.
pub struct CompressContextTool;

#[async_trait]
impl Tool for CompressContextTool {
    fn name(&self) -> &str {
        "compress_context"
    }

    fn description(&self) -> &str {
        "Summarize older conversation turns before the next request to free context space. \
         Recent turns are kept verbatim."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text("Context compaction scheduled before the next request")
            .with_effect(SessionEffect::RequestCompaction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::ctx_without_project;

    #[tokio::test]
    async fn requests_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let out = CompressContextTool
            .execute(serde_json::json!({}), &ctx_without_project(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.effect, Some(SessionEffect::RequestCompaction));
    }
}
