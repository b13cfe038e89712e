use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(SessionId, "sess");
branded_id!(ToolCallId, "call");

/// Maximum length of a sanitized project name.
pub const MAX_PROJECT_NAME_LEN: usize = 100;

/// Identifier of a project folder under the output directory.
///
/// Unlike session ids this is not generated: it is the sanitized folder name,
/// so it is stable across sessions and recoveries.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Sanitize a free-form name into a folder-safe id.
    ///
    /// Whitespace becomes `_`, anything other than ASCII alphanumerics, `-`
    /// and `_` is dropped. Returns `None` when nothing usable remains.
    pub fn sanitize(name: &str) -> Option<Self> {
        let cleaned: String = name
            .trim()
            .chars()
            .filter_map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    Some(c)
                } else if c.is_whitespace() {
                    Some('_')
                } else {
                    None
                }
            })
            .take(MAX_PROJECT_NAME_LEN)
            .collect();
        if cleaned.is_empty() {
            None
        } else {
            Some(Self(cleaned))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_prefix() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("sess_"), "got: {id}");
    }

    #[test]
    fn tool_call_id_has_prefix() {
        let id = ToolCallId::new();
        assert!(id.as_str().starts_with("call_"), "got: {id}");
    }

    #[test]
    fn session_ids_sort_by_creation() {
        let ids: Vec<SessionId> = (0..50).map(|_| SessionId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn provider_assigned_call_ids_are_kept() {
        let id: ToolCallId = "call_abc123".parse().unwrap();
        assert_eq!(id.as_str(), "call_abc123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""call_abc123""#);
    }

    #[test]
    fn project_id_sanitizes_whitespace_and_symbols() {
        let id = ProjectId::sanitize("  My Novel: Part 2!  ").unwrap();
        assert_eq!(id.as_str(), "My_Novel_Part_2");
    }

    #[test]
    fn project_id_rejects_empty_and_traversal() {
        assert!(ProjectId::sanitize("").is_none());
        assert!(ProjectId::sanitize("../..").is_none());
        assert_eq!(ProjectId::sanitize("../etc").unwrap().as_str(), "etc");
    }

    #[test]
    fn project_id_is_length_capped() {
        let long = "a".repeat(300);
        let id = ProjectId::sanitize(&long).unwrap();
        assert_eq!(id.as_str().len(), MAX_PROJECT_NAME_LEN);
    }
}
