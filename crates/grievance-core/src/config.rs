use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::io::IsTerminal;
use std::path::Path;

use crate::changeset::SchemaMode;
use crate::model::field::{FieldKind, FieldRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub adjudication: AdjudicationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Fail decomposition on fields without a kind instead of keeping them opaque.
    #[serde(default)]
    pub strict_schema: bool,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, FieldKind>,
    #[serde(default)]
    pub extra_flex_fields: BTreeMap<String, FieldKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjudicationConfig {
    #[serde(default = "default_score_precision")]
    pub score_precision: usize,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            score_precision: default_score_precision(),
        }
    }
}

impl ProjectConfig {
    /// Built-in field registry extended with the configured fields.
    #[must_use]
    pub fn registry(&self) -> FieldRegistry {
        let mut registry = FieldRegistry::builtin();
        for (name, kind) in &self.review.extra_fields {
            registry.register_fixed(name.clone(), *kind);
        }
        for (name, kind) in &self.review.extra_flex_fields {
            registry.register_flex(name.clone(), *kind);
        }
        registry
    }

    #[must_use]
    pub const fn schema_mode(&self) -> SchemaMode {
        if self.review.strict_schema {
            SchemaMode::Strict
        } else {
            SchemaMode::Lenient
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

/// Load `<root>/.grievance/config.toml`, defaulting every missing section.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(".grievance/config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load the per-user config from the platform config directory.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("grievance/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// # Errors
///
/// Returns an error if either config file is unreadable.
pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.as_deref(), env_format.as_deref());

    Ok(EffectiveConfig {
        project,
        user,
        resolved_output,
    })
}

/// Output mode: `--json`, then `FORMAT`, then user config, then TTY detection.
#[must_use]
pub fn resolve_output(cli_json: bool, user_output: Option<&str>, env_format: Option<&str>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_score_precision() -> usize {
    1
}
