use async_trait::async_trait;
use serde_json::Value;

use scribe_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

/// Lists regular files in the active project with their sizes.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the files in the active project with their sizes in bytes"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let project = ctx.require_project()?;

        let mut entries = tokio::fs::read_dir(&project.root).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to list {}: {e}", project.root.display()))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            files.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
        }
        files.sort();

        if files.is_empty() {
            return Ok(ToolOutput::text(format!("Project '{}' has no files yet", project.id)));
        }

        let mut out = format!("{} file(s) in project '{}':\n", files.len(), project.id);
        for (name, size) in &files {
            out.push_str(&format!("- {name} ({size} bytes)\n"));
        }
        Ok(ToolOutput::text(out))
    }
}
