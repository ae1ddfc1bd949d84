use anyhow::{Context, Result, bail};
use convergence::ResourceDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// Definition File
// ============================================================================

/// On-disk format of a definitions file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

impl Format {
    /// `.json` files are JSON, everything else is TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Declared keys, one `[keys.<name>]` table each
///
/// ```toml
/// [keys.app-data]
/// region = "us-east-1"
/// alias = "alias/app-data"
/// description = "application data"
///
/// [[keys.app-data.grants]]
/// grantee_principal = "arn:aws:iam::123456789012:role/app"
/// operations = ["Encrypt", "Decrypt"]
/// ```
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DefinitionFile {
    #[serde(default)]
    pub keys: BTreeMap<String, ResourceDefinition>,
}

impl DefinitionFile {
    /// Load definitions from `path`, picking the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content, Format::from_path(path))
            .with_context(|| format!("Invalid definitions in {}", path.display()))
    }

    /// Parse definitions and fill each key's name from its table name
    pub fn parse(content: &str, format: Format) -> Result<Self> {
        let mut file: Self = match format {
            Format::Toml => toml::from_str(content).context("Invalid TOML")?,
            Format::Json => serde_json::from_str(content).context("Invalid JSON")?,
        };

        for (name, definition) in &mut file.keys {
            if definition.name.is_empty() {
                definition.name.clone_from(name);
            } else if definition.name != *name {
                bail!(
                    "key '{name}' declares a different name '{}'",
                    definition.name
                );
            }
        }

        Ok(file)
    }

    /// Definitions to act on, all of them or just `target`
    pub fn select(&self, target: Option<&str>) -> Result<Vec<&ResourceDefinition>> {
        match target {
            Some(name) => match self.keys.get(name) {
                Some(definition) => Ok(vec![definition]),
                None => bail!("No key named '{name}' in definitions"),
            },
            None => Ok(self.keys.values().collect()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TOML: &str = r#"
[keys.app-data]
region = "us-east-1"
alias = "alias/app-data"
enabled = false

[[keys.app-data.grants]]
grantee_principal = "role/app"
operations = ["Encrypt", "Decrypt"]

[keys.logs]
region = "eu-west-1"
access_key_id = "AKIALOGS"
"#;

    #[test]
    fn test_parse_toml_fills_names() {
        let file = DefinitionFile::parse(TOML, Format::Toml).unwrap();

        let app = &file.keys["app-data"];
        assert_eq!(app.name, "app-data");
        assert_eq!(app.alias, "alias/app-data");
        assert_eq!(app.enabled, Some(false));
        assert_eq!(app.grants.len(), 1);
        assert!(app.grants[0].operations.contains("Decrypt"));

        let logs = &file.keys["logs"];
        assert_eq!(logs.name, "logs");
        assert_eq!(logs.access_key_id, "AKIALOGS");
        assert_eq!(logs.enabled, None);
        assert!(logs.policy.is_empty());
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"keys": {"app": {"region": "us-west-2", "key_usage": "ENCRYPT/DECRYPT"}}}"#;
        let file = DefinitionFile::parse(json, Format::Json).unwrap();
        assert_eq!(file.keys["app"].name, "app");
        assert_eq!(file.keys["app"].region, "us-west-2");
    }

    #[test]
    fn test_conflicting_name_is_rejected() {
        let toml = "[keys.app]\nname = \"other\"\nregion = \"us-east-1\"\n";
        let err = DefinitionFile::parse(toml, Format::Toml).unwrap_err();
        assert!(err.to_string().contains("different name"));
    }

    #[test]
    fn test_select_target() {
        let file = DefinitionFile::parse(TOML, Format::Toml).unwrap();

        assert_eq!(file.select(None).unwrap().len(), 2);
        let only = file.select(Some("logs")).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].region, "eu-west-1");
        assert!(file.select(Some("nope")).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_path(Path::new("keys.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("keys.toml")), Format::Toml);
        assert_eq!(Format::from_path(Path::new("keys")), Format::Toml);
    }

    #[test]
    fn test_load_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.toml");

        let err = DefinitionFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("keys.toml"));

        fs::write(&path, TOML).unwrap();
        assert_eq!(DefinitionFile::load(&path).unwrap().keys.len(), 2);
    }
}
