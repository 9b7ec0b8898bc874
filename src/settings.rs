use serde::Deserialize;

use crate::error::{ComposeError, Result};
use crate::strength::StrengthTable;

// ------------- Settings -------------
/// Engine settings, loadable from `laminate.toml` (plus `LAMINATE_*`
/// environment overrides) through the `config` crate, or constructed
/// in code via `Default`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Arc expansion stops (with an error) past this recursion depth.
    pub max_depth: usize,
    /// When false, payload arcs produce unloaded placeholder nodes.
    pub include_payloads: bool,
    pub cache: CacheSettings,
    pub strength: StrengthSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
}

/// Optional override of the arc-type strength order, strongest first.
/// Deployments validate this against their documented composition
/// rules; the built-in default is not universal.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StrengthSettings {
    pub order: Option<Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_depth: 64,
            include_payloads: true,
            cache: CacheSettings::default(),
            strength: StrengthSettings::default(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Settings {
    /// Reads `laminate.toml` from the working directory (if present)
    /// and applies `LAMINATE_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("laminate").required(false))
            .add_source(config::Environment::with_prefix("LAMINATE"))
            .build()
            .map_err(|e| ComposeError::Config(e.to_string()))?;
        config
            .try_deserialize()
            .map_err(|e| ComposeError::Config(e.to_string()))
    }

    /// The strength table these settings describe; the configured
    /// order must mention every arc type exactly once.
    pub fn strength_table(&self) -> Result<StrengthTable> {
        match &self.strength.order {
            Some(order) => StrengthTable::from_labels(order),
            None => Ok(StrengthTable::default()),
        }
    }
}
