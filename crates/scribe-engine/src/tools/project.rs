use async_trait::async_trait;
use serde_json::Value;

use scribe_core::ids::ProjectId;
use scribe_core::tools::{Project, SessionEffect, Tool, ToolContext, ToolError, ToolOutput};

use super::str_arg;

/// Creates (or re-opens) a project folder and makes it the active project.
pub struct CreateProjectTool;

#[async_trait]
impl Tool for CreateProjectTool {
    fn name(&self) -> &str {
        "create_project"
    }

    fn description(&self) -> &str {
        "Create a project folder for the manuscript and make it the active project. \
         All file tools operate inside the active project."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["project_name"],
            "properties": {
                "project_name": {
                    "type": "string",
                    "description": "Project name; letters, digits, '-' and '_' are kept, spaces become '_'"
                }
            }
        })
    }

    fn mutates(&self) -> bool {
        true
    }

    // Creating a folder that already exists just re-activates it.
    fn is_retry_safe(&self, _args: &Value) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let raw = str_arg(&args, "project_name")?;
        let id = ProjectId::sanitize(raw).ok_or_else(|| {
            ToolError::InvalidArguments(format!(
                "project name {raw:?} has no usable characters"
            ))
        })?;

        let root = ctx.output_dir.join(id.as_str());
        let existed = tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir());
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to create {}: {e}", root.display()))
        })?;

        let message = if existed {
            format!("Project '{id}' already exists at {}; it is now active", root.display())
        } else {
            format!("Created project '{id}' at {}; it is now active", root.display())
        };
        Ok(ToolOutput::text(message)
            .with_effect(SessionEffect::ActivateProject(Project { id, root })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::ctx_without_project;

    #[tokio::test]
    async fn creates_folder_and_activates() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_without_project(dir.path());
        let out = CreateProjectTool
            .execute(serde_json::json!({"project_name": "My Novel: Part 2"}), &ctx)
            .await
            .unwrap();

        let expected = dir.path().join("My_Novel_Part_2");
        assert!(expected.is_dir());
        assert!(out.content.contains("Created project 'My_Novel_Part_2'"));
        match out.effect {
            Some(SessionEffect::ActivateProject(p)) => {
                assert_eq!(p.id.as_str(), "My_Novel_Part_2");
                assert_eq!(p.root, expected);
            }
            other => panic!("expected activation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn existing_folder_is_reactivated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("saga")).unwrap();
        let ctx = ctx_without_project(dir.path());
        let out = CreateProjectTool
            .execute(serde_json::json!({"project_name": "saga"}), &ctx)
            .await
            .unwrap();
        assert!(out.content.contains("already exists"));
        assert!(out.effect.is_some());
    }

    #[tokio::test]
    async fn unusable_name_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_without_project(dir.path());
        let err = CreateProjectTool
            .execute(serde_json::json!({"project_name": "!!!"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn metadata() {
        let tool = CreateProjectTool;
        assert!(tool.mutates());
        assert!(tool.is_retry_safe(&serde_json::json!({"project_name": "x"})));
    }
}
