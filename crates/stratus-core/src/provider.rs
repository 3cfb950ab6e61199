//! Provider identity as the orchestrator sees it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name, optional alias and planned work of one provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProviderIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Units of work known at scheduling time. Zero means nothing to do.
    pub total_count: u64,
}

impl ProviderIdentity {
    /// A provider with one unit of planned work.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            total_count: 1,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_total(mut self, total_count: u64) -> Self {
        self.total_count = total_count;
        self
    }

    /// The alias, defaulting to the name.
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Display key: `name`, or `name(alias)` when the alias differs.
    pub fn key(&self) -> String {
        match self.alias.as_deref() {
            Some(alias) if alias != self.name => format!("{}({})", self.name, alias),
            _ => self.name.clone(),
        }
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
