use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// One entry of a module's metric catalog. Immutable after load.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub display_name: String,
    /// PromQL template; `{{label}}` placeholders are substituted with the
    /// instance's identity labels at collection time.
    pub query: String,
    pub category: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_active() -> bool {
    return true;
}

/// Load a catalog file. Duplicate metric names are a load-time error, the
/// result map downstream would silently drop one of them otherwise.
pub fn load(path: &Path) -> Result<Vec<MetricDefinition>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot read metric catalog {}", path.display()))?;
    let definitions: Vec<MetricDefinition> = serde_yaml::from_str(&raw)
        .with_context(|| format!("cannot parse metric catalog {}", path.display()))?;
    let mut seen = HashSet::new();
    for definition in &definitions {
        if definition.name.is_empty() {
            bail!("metric catalog {}: empty metric name", path.display());
        }
        if !seen.insert(definition.name.as_str()) {
            bail!(
                "metric catalog {}: duplicate metric '{}'",
                path.display(),
                definition.name
            );
        }
    }
    return Ok(definitions);
}

pub fn count_active(definitions: &[MetricDefinition]) -> usize {
    return definitions.iter().filter(|d| d.active).count();
}

/// Substitute `{{label}}` placeholders from the instance identity labels.
/// Unknown placeholders are left verbatim so a broken template shows up in
/// upstream error messages instead of vanishing.
pub fn render_query(template: &str, labels: &BTreeMap<String, String>) -> String {
    let mut query = template.to_string();
    for (name, value) in labels {
        query = query.replace(&format!("{{{{{}}}}}", name), value);
    }
    return query;
}
