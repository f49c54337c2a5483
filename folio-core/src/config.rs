use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use url::Url;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Servlet path including host, prefixed to every generated URL.
    pub base_url: String,
    pub default_page_type: String,
    /// Consecutive reloads allowed before a record is reported as missing.
    pub max_reloads: u32,
    pub list_all_volumes_in_toc: bool,
    /// Anchor TOC pagination, 0 disables it.
    pub toc_elements_per_page: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub lock_max_age: Duration,
    pub docstruct_navigation: DocstructNavigation,
}

/// Docstruct types offered for previous/next element navigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocstructNavigation {
    pub default: Vec<String>,
    /// Per top element docstruct type.
    pub types: HashMap<String, Vec<String>>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/viewer".to_string(),
            default_page_type: "object".to_string(),
            max_reloads: 3,
            list_all_volumes_in_toc: true,
            toc_elements_per_page: 0,
            lock_max_age: Duration::from_secs(3600),
            docstruct_navigation: DocstructNavigation::default(),
        }
    }
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ViewerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)
            .with_context(|| format!("base_url {:?} is not a valid URL", self.base_url))?;
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Navigable docstruct types for records whose top element has type
    /// `top_docstruct_type`, falling back to the default list.
    pub fn docstruct_navigation_types(&self, top_docstruct_type: &str) -> &[String] {
        self.docstruct_navigation
            .types
            .get(top_docstruct_type)
            .filter(|types| !types.is_empty())
            .unwrap_or(&self.docstruct_navigation.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ViewerConfig::from_toml_str("").unwrap();
        assert_eq!(config.max_reloads, 3);
        assert_eq!(config.default_page_type, "object");
        assert_eq!(config.lock_max_age, Duration::from_secs(3600));
        assert!(config.docstruct_navigation_types("monograph").is_empty());
    }

    #[test]
    fn loads_navigation_types_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
base_url = "https://viewer.example.org/viewer/"
lock_max_age = 60

[docstruct_navigation]
default = ["chapter"]

[docstruct_navigation.types]
periodical_volume = ["issue", "article"]
"#,
        )
        .unwrap();

        let config = ViewerConfig::load(&path).unwrap();
        assert_eq!(config.base_url(), "https://viewer.example.org/viewer");
        assert_eq!(config.lock_max_age, Duration::from_secs(60));
        assert_eq!(config.docstruct_navigation_types("monograph"), ["chapter"]);
        assert_eq!(
            config.docstruct_navigation_types("periodical_volume"),
            ["issue", "article"]
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let err = ViewerConfig::from_toml_str(r#"base_url = "not a url""#).unwrap_err();
        assert!(format!("{err:#}").contains("base_url"));
    }
}
