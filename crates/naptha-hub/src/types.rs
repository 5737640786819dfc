//! Registry records.

use naptha_core::{Error, ModuleRef, ModuleType, Params, Result};
use serde::{Deserialize, Serialize};

/// A module as listed in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// `type:name`, e.g. `agent:hello_world`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub url: String,
    /// Packaging type (e.g. `package`, `docker`); personas have none.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
    #[serde(default)]
    pub version: String,
}

impl ModuleRecord {
    /// Build a record from `key=value` parameters. `description`, `url` and
    /// `version` are required, and `type` too unless it is a persona.
    pub fn from_params(module_type: ModuleType, name: &str, params: &Params, author: &str) -> Result<Self> {
        let mut required = vec!["description", "url", "version"];
        if module_type != ModuleType::Persona {
            required.push("type");
        }
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|k| params.get_str(k).map_or(true, str::is_empty))
            .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidInput(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )));
        }
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::InvalidInput(format!("invalid module name: {:?}", name)));
        }

        let field = |k: &str| params.get_str(k).unwrap_or_default().to_string();
        Ok(Self {
            id: ModuleRef::new(module_type, name).qualified_name(),
            name: name.to_string(),
            description: field("description"),
            author: author.to_string(),
            url: field("url"),
            package_type: params.get_str("type").map(str::to_string),
            version: field("version"),
        })
    }

    /// Registry kind, taken from the id prefix.
    pub fn module_type(&self) -> Option<ModuleType> {
        self.id.split_once(':').and_then(|(t, _)| t.parse().ok())
    }

    pub fn module_ref(&self) -> Result<ModuleRef> {
        let mut module = ModuleRef::parse(&self.id)?;
        if !self.version.is_empty() {
            module = module.with_version(self.version.clone());
        }
        if !self.url.is_empty() {
            module = module.with_url(self.url.clone());
        }
        Ok(module)
    }
}

/// Credentials returned by sign-in and sign-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSession {
    pub token: String,
    pub user_id: String,
}
