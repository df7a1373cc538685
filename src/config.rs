use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::plan::{self, ExecutionPlan};

/// Default location of the credentials file.
pub const DEFAULT_CREDENTIALS_FILE: &str = "~/.runjenkinscreds.yml";

/// Default location of the plan file, relative to the working directory.
pub const DEFAULT_PLAN_FILE: &str = "./runjenkins.yml";

/// Jenkins connection details, kept in a file outside the repository:
///
/// ```yaml
/// url: https://myjenkins.example.com/
/// user: foo
/// password: bah
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub url: String,
    pub user: String,
    /// Password or API token
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Load credentials from a file.
    ///
    /// The format follows the extension: `.toml`, `.json`, `.yaml` or `.yml`.
    /// Other extensions are tried as TOML, then JSON, then YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_home(path);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents).with_context(|| {
                format!("Failed to parse TOML credentials: {}", path.display())
            }),
            "json" => serde_json::from_str(&contents).with_context(|| {
                format!("Failed to parse JSON credentials: {}", path.display())
            }),
            "yaml" | "yml" => serde_yaml::from_str(&contents).with_context(|| {
                format!("Failed to parse YAML credentials: {}", path.display())
            }),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse credentials file: {}", path.display())),
        }
    }
}

/// Load and validate the execution plan. Nothing is submitted if this fails.
pub fn load_plan(path: &Path) -> Result<ExecutionPlan> {
    let path = expand_home(path);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

    let raw: serde_yaml::Value = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse plan file: {}", path.display()))?;

    plan::parse(&raw).with_context(|| format!("Invalid plan file: {}", path.display()))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
