//! Projection of host settings into the vendored tool's `config/config.json`.
//!
//! The host hands repository entries over in two shapes: structured objects
//! and JSON-encoded strings. Both decode into [`RepositoryTarget`]; anything
//! else is dropped with a warning. The output file is always rewritten whole.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::GitHubSettings;
use crate::error::{BridgeError, Result};
use crate::vendor::VendorLayout;

/// One watched repository as the vendored tool stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryTarget {
    #[serde(deserialize_with = "null_as_empty")]
    pub owner: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub repo: String,
    #[serde(deserialize_with = "null_as_main")]
    pub branch: String,
    /// Last revision the vendored tool has seen; maintained by the tool.
    #[serde(deserialize_with = "null_as_empty")]
    pub lastsha: String,
}

// A `null` field reads the same as a missing one.
fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn null_as_main<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(|| "main".to_string()))
}

impl Default for RepositoryTarget {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            lastsha: String::new(),
        }
    }
}

impl RepositoryTarget {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            lastsha: String::new(),
        }
    }

    /// Only targets with both owner and name are polled.
    pub fn is_checkable(&self) -> bool {
        !self.owner.trim().is_empty() && !self.repo.trim().is_empty()
    }

    pub fn same_repository(&self, other: &RepositoryTarget) -> bool {
        self.owner.eq_ignore_ascii_case(&other.owner) && self.repo.eq_ignore_ascii_case(&other.repo)
    }
}

impl std::fmt::Display for RepositoryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

/// Repository list used when the host supplies none.
pub fn default_repositories() -> Vec<RepositoryTarget> {
    vec![RepositoryTarget::new(
        "FengYing1314",
        "astrbot_plugin_YumeCard",
        "main",
    )]
}

/// The vendored tool's configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendoredConfig {
    #[serde(rename = "GitHub")]
    pub github: VendoredGitHub,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendoredGitHub {
    pub username: String,
    /// `"true"` or `"false"`; the tool expects a string.
    pub backgrounds: String,
    pub token: String,
    pub repository: Vec<RepositoryTarget>,
    pub refresh_interval_seconds: u64,
}

/// Decode a raw `repository` value into targets, preserving order.
pub fn decode_repositories(raw: Option<&Value>) -> Vec<RepositoryTarget> {
    let Some(Value::Array(items)) = raw else {
        warn!(
            found = raw.map(value_kind).unwrap_or("nothing"),
            "'repository' is not a list, using the default repository list"
        );
        return default_repositories();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match decode_entry(item) {
            Ok(target) => Some(target),
            Err(e) => {
                warn!(index, "Skipping repository entry: {}", e);
                None
            }
        })
        .collect()
}

fn decode_entry(item: &Value) -> Result<RepositoryTarget> {
    match item {
        Value::Object(_) => serde_json::from_value(item.clone())
            .map_err(|e| BridgeError::ConfigProjection(format!("invalid object: {}", e))),
        Value::String(encoded) => {
            let decoded: Value = serde_json::from_str(encoded).map_err(|e| {
                BridgeError::ConfigProjection(format!("cannot decode '{}': {}", encoded, e))
            })?;
            if !decoded.is_object() {
                return Err(BridgeError::ConfigProjection(format!(
                    "'{}' decodes to {}, expected an object",
                    encoded,
                    value_kind(&decoded)
                )));
            }
            serde_json::from_value(decoded)
                .map_err(|e| BridgeError::ConfigProjection(format!("invalid object: {}", e)))
        }
        other => Err(BridgeError::ConfigProjection(format!(
            "unsupported entry type {}",
            value_kind(other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Pure transform from host settings to the vendored schema.
pub fn project(github: &GitHubSettings) -> VendoredConfig {
    VendoredConfig {
        github: VendoredGitHub {
            username: github.username.clone(),
            backgrounds: github.backgrounds.to_string(),
            token: github.token.clone(),
            repository: decode_repositories(github.repository.as_ref()),
            refresh_interval_seconds: github.refresh_interval_seconds,
        },
    }
}

/// Writes projections into a vendor root.
#[derive(Debug, Clone)]
pub struct ConfigProjector {
    path: PathBuf,
}

impl ConfigProjector {
    pub fn new(layout: &VendorLayout) -> Self {
        Self {
            path: layout.config_file(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Project `github` and overwrite the on-disk file.
    pub fn write(&self, github: &GitHubSettings) -> Result<VendoredConfig> {
        let projected = project(github);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BridgeError::Filesystem(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let content = serde_json::to_string_pretty(&projected)?;
        std::fs::write(&self.path, content).map_err(|e| {
            BridgeError::Filesystem(format!("cannot write {}: {}", self.path.display(), e))
        })?;

        info!(
            path = %self.path.display(),
            repositories = projected.github.repository.len(),
            "Vendored config written"
        );
        Ok(projected)
    }

    /// Read the on-disk file back, `None` when it does not exist.
    pub fn read(&self) -> Result<Option<VendoredConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(repository: Option<Value>) -> GitHubSettings {
        GitHubSettings {
            username: "octo".to_string(),
            token: "ghp_x".to_string(),
            backgrounds: false,
            repository,
            refresh_interval_seconds: 900,
            notification_targets: vec![],
        }
    }

    #[test]
    fn test_object_and_encoded_string_decode_alike() {
        let raw = json!([
            {"owner": "octo", "repo": "demo", "branch": "main", "lastsha": ""},
            "{\"owner\": \"octo\", \"repo\": \"demo\", \"branch\": \"main\", \"lastsha\": \"\"}",
            "{not json",
            {"owner": "octo", "repo": "tail", "branch": "dev", "lastsha": "abc"}
        ]);

        let targets = decode_repositories(Some(&raw));

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], targets[1]);
        assert_eq!(targets[0], RepositoryTarget::new("octo", "demo", "main"));
        assert_eq!(targets[2].repo, "tail");
        assert_eq!(targets[2].lastsha, "abc");
    }

    #[test]
    fn test_unsupported_entries_dropped() {
        let raw = json!([42, null, "\"just a string\"", {"owner": "a", "repo": "b"}]);
        let targets = decode_repositories(Some(&raw));
        assert_eq!(targets, vec![RepositoryTarget::new("a", "b", "main")]);
    }

    #[test]
    fn test_null_fields_read_as_missing() {
        let raw = json!([
            {"owner": "o", "repo": "r", "branch": "dev", "lastsha": null},
            {"owner": "o", "repo": "s", "branch": null},
            "{\"owner\": \"o\", \"repo\": \"t\", \"lastsha\": null}"
        ]);
        let targets = decode_repositories(Some(&raw));

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], RepositoryTarget::new("o", "r", "dev"));
        assert_eq!(targets[1], RepositoryTarget::new("o", "s", "main"));
        assert_eq!(targets[2].lastsha, "");
    }

    #[test]
    fn test_object_with_wrong_field_type_dropped() {
        let raw = json!([{"owner": 5, "repo": "b"}, {"owner": "ok", "repo": "fine"}]);
        let targets = decode_repositories(Some(&raw));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].owner, "ok");
    }

    #[test]
    fn test_missing_or_non_list_uses_default() {
        assert_eq!(decode_repositories(None), default_repositories());
        assert_eq!(
            decode_repositories(Some(&json!({"owner": "x"}))),
            default_repositories()
        );
        assert!(decode_repositories(Some(&json!([]))).is_empty());
    }

    #[test]
    fn test_project_shapes_output() {
        let projected = project(&settings(Some(json!([{"owner": "o", "repo": "r"}]))));
        assert_eq!(projected.github.backgrounds, "false");
        assert_eq!(projected.github.refresh_interval_seconds, 900);

        let value = serde_json::to_value(&projected).unwrap();
        assert_eq!(value["GitHub"]["backgrounds"], json!("false"));
        assert_eq!(value["GitHub"]["repository"][0]["branch"], json!("main"));
    }

    #[test]
    fn test_write_overwrites_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let projector = ConfigProjector::new(&VendorLayout::new(dir.path()));
        std::fs::create_dir_all(projector.path().parent().unwrap()).unwrap();
        std::fs::write(projector.path(), r#"{"GitHub": {}, "stale": true}"#).unwrap();

        projector
            .write(&settings(Some(json!([{"owner": "o", "repo": "r"}]))))
            .unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(projector.path()).unwrap()).unwrap();
        assert!(raw.get("stale").is_none());
        let back = projector.read().unwrap().unwrap();
        assert_eq!(back.github.username, "octo");
        assert_eq!(back.github.repository.len(), 1);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let projector = ConfigProjector::new(&VendorLayout::new(dir.path()));
        assert!(projector.read().unwrap().is_none());
    }

    #[test]
    fn test_checkable_requires_owner_and_repo() {
        assert!(RepositoryTarget::new("o", "r", "main").is_checkable());
        assert!(!RepositoryTarget::new("", "r", "main").is_checkable());
        assert!(!RepositoryTarget::new("o", " ", "main").is_checkable());
    }
}
