use std::io::ErrorKind;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use scribe_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

use super::{resolve_project_file, str_arg};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if the file exists.
    Create,
    Overwrite,
    /// Add to the end, creating the file if absent.
    Append,
}

impl WriteMode {
    fn parse(raw: Option<&str>) -> Result<Self, ToolError> {
        match raw.unwrap_or("create") {
            "create" => Ok(Self::Create),
            "overwrite" => Ok(Self::Overwrite),
            "append" => Ok(Self::Append),
            other => Err(ToolError::InvalidArguments(format!("unknown mode: {other}"))),
        }
    }
}

/// Writes a file in the active project.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file in the active project. mode 'create' (default) fails if the file exists, \
         'overwrite' replaces it, 'append' adds to the end. A name without an extension gets '.md'."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["filename", "content"],
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Plain file name inside the project"
                },
                "content": {
                    "type": "string",
                    "description": "Text to write"
                },
                "mode": {
                    "type": "string",
                    "enum": ["create", "overwrite", "append"],
                    "description": "How to treat an existing file (default: create)"
                }
            }
        })
    }

    fn mutates(&self) -> bool {
        true
    }

    // Running an append twice duplicates the text.
    fn is_retry_safe(&self, args: &Value) -> bool {
        !matches!(WriteMode::parse(args["mode"].as_str()), Ok(WriteMode::Append))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let filename = str_arg(&args, "filename")?;
        let content = str_arg(&args, "content")?;
        let mode = WriteMode::parse(args["mode"].as_str())?;
        let path = resolve_project_file(ctx, filename)?;

        let mut options = tokio::fs::OpenOptions::new();
        match mode {
            WriteMode::Create => options.write(true).create_new(true),
            WriteMode::Overwrite => options.write(true).create(true).truncate(true),
            WriteMode::Append => options.append(true).create(true),
        };

        let mut file = options.open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                ToolError::ExecutionFailed(format!(
                    "{} already exists; use mode 'overwrite' or 'append'",
                    path.display()
                ))
            } else {
                ToolError::ExecutionFailed(format!("failed to open {}: {e}", path.display()))
            }
        })?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        let verb = match mode {
            WriteMode::Create => "Created",
            WriteMode::Overwrite => "Overwrote",
            WriteMode::Append => "Appended to",
        };
        Ok(ToolOutput::text(format!(
            "{verb} {} ({} bytes, {} lines)",
            path.file_name().map_or_else(|| filename.into(), |n| n.to_string_lossy()),
            content.len(),
            content.lines().count()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{ctx_with_project, ctx_without_project};
    use std::fs;

    fn write_args(filename: &str, content: &str, mode: &str) -> Value {
        serde_json::json!({"filename": filename, "content": content, "mode": mode})
    }

    #[tokio::test]
    async fn create_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_project(dir.path());
        let out = WriteFileTool
            .execute(write_args("outline", "hello world\n", "create"), &ctx)
            .await
            .unwrap();
        assert!(out.content.contains("12 bytes"));
        let root = &ctx.project.as_ref().unwrap().root;
        assert_eq!(fs::read_to_string(root.join("outline.md")).unwrap(), "hello world\n");
    }

    #[tokio::test]
    async fn create_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_project(dir.path());
        let root = ctx.project.as_ref().unwrap().root.clone();
        fs::write(root.join("chapter_01.md"), "original").unwrap();

        let err = WriteFileTool
            .execute(write_args("chapter_01", "replacement", "create"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(ref m) if m.contains("already exists")));
        assert_eq!(fs::read_to_string(root.join("chapter_01.md")).unwrap(), "original");
    }

    #[tokio::test]
    async fn mode_defaults_to_create() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_project(dir.path());
        let args = serde_json::json!({"filename": "notes", "content": "a"});
        WriteFileTool.execute(args.clone(), &ctx).await.unwrap();
        assert!(WriteFileTool.execute(args, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn overwrite_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_project(dir.path());
        let root = ctx.project.as_ref().unwrap().root.clone();

        WriteFileTool.execute(write_args("draft", "one", "overwrite"), &ctx).await.unwrap();
        WriteFileTool.execute(write_args("draft", "two", "overwrite"), &ctx).await.unwrap();
        assert_eq!(fs::read_to_string(root.join("draft.md")).unwrap(), "two");

        let out = WriteFileTool
            .execute(write_args("draft", "\nthree", "append"), &ctx)
            .await
            .unwrap();
        assert!(out.content.starts_with("Appended to draft.md"));
        assert_eq!(fs::read_to_string(root.join("draft.md")).unwrap(), "two\nthree");
    }

    #[tokio::test]
    async fn append_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_project(dir.path());
        WriteFileTool.execute(write_args("log.txt", "entry", "append"), &ctx).await.unwrap();
        let root = &ctx.project.as_ref().unwrap().root;
        assert_eq!(fs::read_to_string(root.join("log.txt")).unwrap(), "entry");
    }

    #[tokio::test]
    async fn path_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_project(dir.path());
        let err = WriteFileTool
            .execute(write_args("../escape", "x", "overwrite"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(!dir.path().join("escape.md").exists());
    }

    #[tokio::test]
    async fn requires_project() {
        let dir = tempfile::tempdir().unwrap();
        let err = WriteFileTool
            .execute(write_args("a", "b", "create"), &ctx_without_project(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[test]
    fn only_append_is_unsafe_to_retry() {
        let tool = WriteFileTool;
        assert!(tool.mutates());
        assert!(tool.is_retry_safe(&write_args("a", "b", "create")));
        assert!(tool.is_retry_safe(&write_args("a", "b", "overwrite")));
        assert!(tool.is_retry_safe(&serde_json::json!({"filename": "a", "content": "b"})));
        assert!(!tool.is_retry_safe(&write_args("a", "b", "append")));
    }
}
