use async_trait::async_trait;
use serde_json::Value;

use scribe_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

use super::{resolve_project_file, str_arg};

/// Reads a file from the active project.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the active project. A name without an extension is read as '.md'."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["filename"],
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Plain file name inside the project, e.g. 'chapter_01'"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let filename = str_arg(&args, "filename")?;
        let path = resolve_project_file(ctx, filename)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::ExecutionFailed(format!(
                    "file not found: {}",
                    path.file_name().map_or_else(|| filename.into(), |n| n.to_string_lossy())
                )));
            }
            Err(e) => {
                return Err(ToolError::ExecutionFailed(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        if content.is_empty() {
            return Ok(ToolOutput::text("(empty file)"));
        }
        Ok(ToolOutput::text(content))
    }
}
