pub mod compress;
pub mod list_files;
pub mod project;
pub mod read_file;
pub mod web_search;
pub mod write_file;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use scribe_core::tools::{ToolContext, ToolError};

use crate::registry::ToolRegistry;

/// Extension given to filenames that have none.
pub const DEFAULT_EXTENSION: &str = "md";

/// Create a ToolRegistry with all built-in tools.
pub fn create_default_registry(web_search_results: u32) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(project::CreateProjectTool));

    // Files in the active project
    registry.register(Arc::new(list_files::ListFilesTool));
    registry.register(Arc::new(read_file::ReadFileTool));
    registry.register(Arc::new(write_file::WriteFileTool));

    // Web
    registry.register(Arc::new(
        web_search::WebSearchTool::from_env().with_default_count(web_search_results),
    ));

    // Context management
    registry.register(Arc::new(compress::CompressContextTool));

    registry
}

/// Resolve a plain filename inside the active project folder.
///
/// Names with separators, parent references or a root are rejected, and a
/// name without an extension gets [`DEFAULT_EXTENSION`].
pub fn resolve_project_file(ctx: &ToolContext, filename: &str) -> Result<PathBuf, ToolError> {
    let project = ctx.require_project()?;
    let name = filename.trim();
    if name.is_empty() {
        return Err(ToolError::InvalidArguments("filename must not be empty".into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ToolError::InvalidArguments(format!(
            "filename must not contain path separators: {name}"
        )));
    }
    let path = Path::new(name);
    let plain = path.components().count() == 1
        && matches!(path.components().next(), Some(Component::Normal(_)));
    if !plain {
        return Err(ToolError::InvalidArguments(format!("not a plain filename: {name}")));
    }

    let mut resolved = project.root.join(name);
    if resolved.extension().is_none() {
        resolved.set_extension(DEFAULT_EXTENSION);
    }
    Ok(resolved)
}

/// Required string argument.
pub(crate) fn str_arg<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("{key} is required")))
}
