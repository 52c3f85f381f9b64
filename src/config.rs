use crate::model::ModuleKind;
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Duration fields accept humantime strings ("10s", "5m", "1h30m").
mod duration_format {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        return humantime::parse_duration(&value).map_err(serde::de::Error::custom);
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub datasources: Datasources,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub inspection: InspectionConfig,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Threshold>,
    #[serde(default)]
    pub mysql: MysqlConfig,
    #[serde(default)]
    pub redis: ModuleConfig,
    #[serde(default)]
    pub nginx: ModuleConfig,
    #[serde(default)]
    pub tomcat: ModuleConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory the config file lives in; relative paths resolve here.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Datasources {
    pub n9e: N9eConfig,
    pub victoriametrics: VictoriaMetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct N9eConfig {
    pub endpoint: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_source_timeout", with = "duration_format")]
    pub timeout: Duration,
    /// Optional server-side target filter appended to listing calls.
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VictoriaMetricsConfig {
    pub endpoint: String,
    #[serde(default = "default_source_timeout", with = "duration_format")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HttpConfig {
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay", with = "duration_format")]
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        return RetryConfig {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
        };
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InspectionConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_host_timeout", with = "duration_format")]
    pub host_timeout: Duration,
    #[serde(default)]
    pub host_filter: HostFilter,
    /// Override for the host metric catalog path.
    #[serde(default)]
    pub metrics: Option<PathBuf>,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        return InspectionConfig {
            concurrency: default_concurrency(),
            host_timeout: default_host_timeout(),
            host_filter: HostFilter::default(),
            metrics: None,
        };
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HostFilter {
    #[serde(default)]
    pub business_groups: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModuleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub instance_filter: InstanceFilter,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Threshold>,
    /// Override for this module's metric catalog path.
    #[serde(default)]
    pub metrics: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MysqlConfig {
    #[serde(flatten)]
    pub base: ModuleConfig,
    /// Expected MGR group size; member loss is judged against this.
    #[serde(default = "default_mgr_members")]
    pub mgr_expected_members: u32,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        return MysqlConfig {
            base: ModuleConfig::default(),
            mgr_expected_members: default_mgr_members(),
        };
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InstanceFilter {
    /// Shell-glob patterns matched against the instance hostname.
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub business_groups: Vec<String>,
    /// Exact-match requirements on discovery labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl InstanceFilter {
    pub fn is_empty(&self) -> bool {
        return self.hostnames.is_empty()
            && self.business_groups.is_empty()
            && self.labels.is_empty();
    }

    /// Glob semantics for hostnames, equality for labels. The business
    /// group, when present on the series, comes in as the `busigroup` label.
    pub fn matches(&self, hostname: &str, labels: &BTreeMap<String, String>) -> bool {
        if !self.hostnames.is_empty() {
            let matched = self.hostnames.iter().any(|pattern| {
                glob::Pattern::new(pattern)
                    .map(|p| p.matches(hostname))
                    .unwrap_or(false)
            });
            if !matched {
                return false;
            }
        }
        if !self.business_groups.is_empty() {
            let group = labels.get("busigroup").map(|v| v.as_str()).unwrap_or("");
            if !self.business_groups.iter().any(|g| g == group) {
                return false;
            }
        }
        for (name, expected) in &self.labels {
            if labels.get(name).map(|v| v.as_str()) != Some(expected.as_str()) {
                return false;
            }
        }
        return true;
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
    #[serde(default)]
    pub html_template: Option<PathBuf>,
    #[serde(default)]
    pub excel_template: Option<PathBuf>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        return ReportConfig {
            output_dir: default_output_dir(),
            formats: default_formats(),
            filename_template: default_filename_template(),
            html_template: None,
            excel_template: None,
            timezone: default_timezone(),
        };
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        return LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        };
    }
}

fn default_source_timeout() -> Duration {
    return Duration::from_secs(10);
}
fn default_max_retries() -> u32 {
    return 3;
}
fn default_base_delay() -> Duration {
    return Duration::from_secs(1);
}
fn default_concurrency() -> usize {
    return 20;
}
fn default_host_timeout() -> Duration {
    return Duration::from_secs(5 * 60);
}
fn default_mgr_members() -> u32 {
    return 3;
}
fn default_output_dir() -> PathBuf {
    return PathBuf::from("reports");
}
fn default_formats() -> Vec<String> {
    return vec!["excel".to_string()];
}
fn default_filename_template() -> String {
    return "inspection-report-{{.Date}}".to_string();
}
fn default_timezone() -> String {
    return "Asia/Shanghai".to_string();
}
fn default_log_level() -> String {
    return "info".to_string();
}
fn default_log_format() -> String {
    return "console".to_string();
}

/// Replace `${VAR}` with the environment value. Unset variables are left
/// verbatim so a missing token shows up in validation instead of becoming
/// an empty string silently.
pub fn substitute_env(raw: &str) -> String {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    return pattern
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            match std::env::var(&caps[1]) {
                Ok(value) => value,
                Err(_) => {
                    log::warn!("Environment variable {} is not set", &caps[1]);
                    caps[0].to_string()
                }
            }
        })
        .into_owned();
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let raw = substitute_env(&raw);
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("cannot parse config {}", path.display()))?;
        config.base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        config.validate()?;
        return Ok(config);
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.datasources.n9e.endpoint)
            .with_context(|| format!("invalid n9e endpoint '{}'", self.datasources.n9e.endpoint))?;
        url::Url::parse(&self.datasources.victoriametrics.endpoint).with_context(|| {
            format!(
                "invalid victoriametrics endpoint '{}'",
                self.datasources.victoriametrics.endpoint
            )
        })?;
        if self.datasources.n9e.token.contains("${") {
            bail!("n9e token still contains an unresolved ${{VAR}} placeholder");
        }
        if self.inspection.concurrency == 0 {
            bail!("inspection.concurrency must be at least 1");
        }
        self.timezone()?;
        for (metric, threshold) in self.all_thresholds() {
            if threshold.warning > threshold.critical {
                bail!(
                    "threshold '{}': warning {} exceeds critical {}",
                    metric,
                    threshold.warning,
                    threshold.critical
                );
            }
        }
        if self.report.formats.is_empty() {
            bail!("report.formats must name at least one format");
        }
        match self.logging.level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            level => bail!("unknown logging.level '{}'", level),
        }
        match self.logging.format.as_str() {
            "json" | "console" => {}
            format => bail!("unknown logging.format '{}'", format),
        }
        return Ok(());
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        return self
            .report
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("invalid report.timezone: {}", e));
    }

    fn all_thresholds(&self) -> impl Iterator<Item = (&String, &Threshold)> {
        return self
            .thresholds
            .iter()
            .chain(self.mysql.base.thresholds.iter())
            .chain(self.redis.thresholds.iter())
            .chain(self.nginx.thresholds.iter())
            .chain(self.tomcat.thresholds.iter());
    }

    pub fn module_enabled(&self, module: ModuleKind) -> bool {
        match module {
            ModuleKind::Host => true,
            ModuleKind::Mysql => self.mysql.base.enabled,
            ModuleKind::Redis => self.redis.enabled,
            ModuleKind::Nginx => self.nginx.enabled,
            ModuleKind::Tomcat => self.tomcat.enabled,
        }
    }

    pub fn instance_filter(&self, module: ModuleKind) -> Option<&InstanceFilter> {
        match module {
            ModuleKind::Host => None,
            ModuleKind::Mysql => Some(&self.mysql.base.instance_filter),
            ModuleKind::Redis => Some(&self.redis.instance_filter),
            ModuleKind::Nginx => Some(&self.nginx.instance_filter),
            ModuleKind::Tomcat => Some(&self.tomcat.instance_filter),
        }
    }

    /// Warning/critical pair for a metric: module thresholds first, then the
    /// global table.
    pub fn threshold(&self, module: ModuleKind, metric: &str) -> Option<Threshold> {
        let module_table = match module {
            ModuleKind::Host => None,
            ModuleKind::Mysql => Some(&self.mysql.base.thresholds),
            ModuleKind::Redis => Some(&self.redis.thresholds),
            ModuleKind::Nginx => Some(&self.nginx.thresholds),
            ModuleKind::Tomcat => Some(&self.tomcat.thresholds),
        };
        if let Some(table) = module_table {
            if let Some(threshold) = table.get(metric) {
                return Some(*threshold);
            }
        }
        return self.thresholds.get(metric).copied();
    }

    /// Path of a module's metric catalog: explicit config override, or the
    /// conventional `metrics/<module>.yaml` next to the config file.
    pub fn catalog_path(&self, module: ModuleKind) -> PathBuf {
        let explicit = match module {
            ModuleKind::Host => self.inspection.metrics.clone(),
            ModuleKind::Mysql => self.mysql.base.metrics.clone(),
            ModuleKind::Redis => self.redis.metrics.clone(),
            ModuleKind::Nginx => self.nginx.metrics.clone(),
            ModuleKind::Tomcat => self.tomcat.metrics.clone(),
        };
        let path =
            explicit.unwrap_or_else(|| PathBuf::from(format!("metrics/{}.yaml", module.as_str())));
        if path.is_absolute() {
            return path;
        }
        return self.base_dir.join(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const MINIMAL: &str = r#"
datasources:
  n9e:
    endpoint: http://n9e.example:17000
    token: tok
  victoriametrics:
    endpoint: http://vm.example:8428
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        return file;
    }

    #[test]
    fn test_defaults() {
        let file = write_config(MINIMAL);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.inspection.concurrency, 20);
        assert_eq!(config.inspection.host_timeout, Duration::from_secs(300));
        assert_eq!(config.http.retry.max_retries, 3);
        assert_eq!(config.http.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.report.timezone, "Asia/Shanghai");
        assert_eq!(config.report.formats, ["excel"]);
        assert!(!config.mysql.base.enabled);
        assert_eq!(config.mysql.mgr_expected_members, 3);
        assert!(config.module_enabled(ModuleKind::Host));
    }

    #[test]
    fn test_full_config() {
        let file = write_config(
            r#"
datasources:
  n9e:
    endpoint: http://n9e.example:17000
    token: tok
    timeout: 30s
  victoriametrics:
    endpoint: http://vm.example:8428
    timeout: 15s
http:
  retry:
    max_retries: 5
    base_delay: 500ms
inspection:
  concurrency: 8
  host_timeout: 2m
  host_filter:
    business_groups: [pay]
thresholds:
  cpu_usage: {warning: 70, critical: 90}
mysql:
  enabled: true
  mgr_expected_members: 5
  thresholds:
    connection_usage: {warning: 60, critical: 80}
redis:
  enabled: true
  instance_filter:
    hostnames: ["cache-*"]
report:
  output_dir: /tmp/reports
  formats: [excel, html]
  timezone: UTC
logging:
  level: debug
  format: json
"#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.inspection.concurrency, 8);
        assert_eq!(config.http.retry.max_retries, 5);
        assert_eq!(config.mysql.mgr_expected_members, 5);
        assert_eq!(
            config
                .threshold(ModuleKind::Host, "cpu_usage")
                .unwrap()
                .warning,
            70.0
        );
        // Module table wins over the global one.
        assert_eq!(
            config
                .threshold(ModuleKind::Mysql, "connection_usage")
                .unwrap()
                .critical,
            80.0
        );
        assert_eq!(config.timezone().unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn test_env_substitution() {
        unsafe { std::env::set_var("INFRADIG_TEST_TOKEN", "sekrit") };
        let out = substitute_env("token: ${INFRADIG_TEST_TOKEN} and ${INFRADIG_TEST_UNSET}");
        assert_eq!(out, "token: sekrit and ${INFRADIG_TEST_UNSET}");
    }

    #[test]
    fn test_invalid_threshold_pair() {
        let file = write_config(&format!(
            "{}\nthresholds:\n  cpu_usage: {{warning: 95, critical: 90}}\n",
            MINIMAL
        ));
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("warning 95 exceeds critical 90"));
    }

    #[test]
    fn test_invalid_timezone() {
        let file = write_config(&format!(
            "{}\nreport:\n  timezone: Mars/Olympus\n",
            MINIMAL
        ));
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_instance_filter_globs() {
        let filter = InstanceFilter {
            hostnames: vec!["web-*".to_string(), "edge-??".to_string()],
            business_groups: Vec::new(),
            labels: BTreeMap::new(),
        };
        let labels = BTreeMap::new();
        assert!(filter.matches("web-01", &labels));
        assert!(filter.matches("edge-ab", &labels));
        assert!(!filter.matches("db-01", &labels));
        assert!(!filter.matches("edge-abc", &labels));
    }

    #[test]
    fn test_instance_filter_labels_and_groups() {
        let mut wanted = BTreeMap::new();
        wanted.insert("app_type".to_string(), "openresty".to_string());
        let filter = InstanceFilter {
            hostnames: Vec::new(),
            business_groups: vec!["pay".to_string()],
            labels: wanted,
        };
        let mut labels = BTreeMap::new();
        labels.insert("busigroup".to_string(), "pay".to_string());
        labels.insert("app_type".to_string(), "openresty".to_string());
        assert!(filter.matches("any", &labels));
        labels.insert("busigroup".to_string(), "core".to_string());
        assert!(!filter.matches("any", &labels));
    }

    #[test]
    fn test_catalog_path_defaults_next_to_config() {
        let file = write_config(MINIMAL);
        let config = Config::load(file.path()).unwrap();
        let path = config.catalog_path(ModuleKind::Nginx);
        assert!(path.ends_with("metrics/nginx.yaml"));
        assert!(path.starts_with(&config.base_dir));
    }
}
