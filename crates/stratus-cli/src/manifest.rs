//! Provider manifest: which plugins exist and how to launch them.
//!
//! ```json
//! {
//!   "providers": [
//!     {
//!       "name": "aws",
//!       "alias": "aws-prod",
//!       "command": ["stratus-provider-aws", "--region", "eu-west-1"],
//!       "env": { "AWS_PROFILE": "prod" },
//!       "secrets": ["AWS_SECRET_ACCESS_KEY"],
//!       "total_count": 40,
//!       "timeout_secs": 900
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratus_core::{Diagnostic, DiagnosticKind, Diagnostics, ProviderIdentity};

/// Manifest loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("provider '{provider}' has an empty command")]
    EmptyCommand { provider: String },

    #[error("provider '{key}' is declared more than once")]
    DuplicateProvider { key: String },
}

pub type Result<T> = std::result::Result<T, ManifestError>;

fn default_total() -> u64 {
    1
}

/// One provider plugin entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Program followed by its fixed arguments.
    pub command: Vec<String>,

    /// Extra environment for the plugin process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Names of environment variables whose values must never be printed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    /// Planned units of work; zero skips the provider.
    #[serde(default = "default_total")]
    pub total_count: u64,

    /// Overrides the CLI-wide plugin timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ProviderSpec {
    pub fn identity(&self) -> ProviderIdentity {
        let identity = ProviderIdentity::new(&self.name).with_total(self.total_count);
        match &self.alias {
            Some(alias) => identity.with_alias(alias),
            None => identity,
        }
    }

    /// Resolved values of the declared secrets, from `env` first, then the
    /// process environment. Unset or empty secrets are skipped.
    pub fn secret_values(&self) -> Vec<String> {
        self.secrets
            .iter()
            .filter_map(|var| {
                self.env
                    .get(var)
                    .cloned()
                    .or_else(|| std::env::var(var).ok())
            })
            .filter(|value| !value.is_empty())
            .collect()
    }

    fn matches(&self, selector: &str) -> bool {
        self.name == selector || self.alias.as_deref() == Some(selector)
    }
}

/// The set of configured providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &self.providers {
            if spec.command.first().map_or(true, |program| program.is_empty()) {
                return Err(ManifestError::EmptyCommand {
                    provider: spec.name.clone(),
                });
            }
            let key = spec.identity().key();
            if !seen.insert(key.clone()) {
                return Err(ManifestError::DuplicateProvider { key });
            }
        }
        Ok(())
    }

    /// Providers to run, in manifest order. An empty selection means all.
    ///
    /// Each selector matches a provider name or alias. Unknown selectors are
    /// reported together as user errors.
    pub fn select(&self, selectors: &[String]) -> std::result::Result<Vec<ProviderSpec>, Diagnostics> {
        if selectors.is_empty() {
            return Ok(self.providers.clone());
        }

        let missing: Diagnostics = selectors
            .iter()
            .filter(|sel| !self.providers.iter().any(|p| p.matches(sel)))
            .map(|sel| {
                Diagnostic::error(DiagnosticKind::User, "provider not found")
                    .with_detail(format!("no provider named '{sel}' in the manifest"))
                    .with_resource(sel.as_str())
            })
            .collect();
        if missing.has_diags() {
            return Err(missing);
        }

        Ok(self
            .providers
            .iter()
            .filter(|p| selectors.iter().any(|sel| p.matches(sel)))
            .cloned()
            .collect())
    }
}
