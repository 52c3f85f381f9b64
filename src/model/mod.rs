mod instance;
mod report;

pub use instance::DiskMount;
pub use instance::container_identifier;
pub use instance::HostInstance;
pub use instance::Instance;
pub use instance::MysqlClusterMode;
pub use instance::MysqlInstance;
pub use instance::NginxInstance;
pub use instance::RedisInstance;
pub use instance::RedisRole;
pub use instance::TomcatInstance;
pub use report::ClusterGroup;
pub use report::ModuleBundle;
pub use report::Report;
pub use report::redis_cluster_groups;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// The inspected subsystems, in the fixed order sections appear in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Host,
    Mysql,
    Redis,
    Nginx,
    Tomcat,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 5] = [
        ModuleKind::Host,
        ModuleKind::Mysql,
        ModuleKind::Redis,
        ModuleKind::Nginx,
        ModuleKind::Tomcat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Host => "host",
            ModuleKind::Mysql => "mysql",
            ModuleKind::Redis => "redis",
            ModuleKind::Nginx => "nginx",
            ModuleKind::Tomcat => "tomcat",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModuleKind::Host => "Host",
            ModuleKind::Mysql => "MySQL",
            ModuleKind::Redis => "Redis",
            ModuleKind::Nginx => "Nginx",
            ModuleKind::Tomcat => "Tomcat",
        }
    }

    /// Header of the module-specific descriptor column in the report
    /// listings, when the module carries one (see `Instance::detail`).
    pub fn detail_header(&self) -> Option<&'static str> {
        match self {
            ModuleKind::Mysql => Some("Cluster Mode"),
            ModuleKind::Redis => Some("Role"),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a single evaluated metric.
///
/// Pending marks a metric whose upstream had no data (NA); it never
/// contributes to alerts or to the instance rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricStatus {
    Normal,
    Pending,
    Warning,
    Critical,
}

impl MetricStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricStatus::Normal => "NORMAL",
            MetricStatus::Pending => "PENDING",
            MetricStatus::Warning => "WARNING",
            MetricStatus::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        }
    }

    pub fn metric_status(&self) -> MetricStatus {
        match self {
            AlertLevel::Warning => MetricStatus::Warning,
            AlertLevel::Critical => MetricStatus::Critical,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolled-up state of one inspected instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceStatus {
    Normal,
    Warning,
    Critical,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Normal => "NORMAL",
            InstanceStatus::Warning => "WARNING",
            InstanceStatus::Critical => "CRITICAL",
            InstanceStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed sample. `raw == None` is NA: the upstream had no series for
/// the query. NA must never decay to a numeric default.
#[derive(Debug, Clone, Serialize)]
pub struct MetricValue {
    pub name: String,
    pub raw: Option<f64>,
    pub formatted: String,
    pub status: MetricStatus,
    pub labels: BTreeMap<String, String>,
}

impl MetricValue {
    pub fn new(name: &str, raw: f64, formatted: String, labels: BTreeMap<String, String>) -> Self {
        return MetricValue {
            name: name.to_string(),
            raw: Some(raw),
            formatted,
            status: MetricStatus::Normal,
            labels,
        };
    }

    /// NA placeholder: no data, Pending, excluded from evaluation.
    pub fn na(name: &str) -> Self {
        return MetricValue {
            name: name.to_string(),
            raw: None,
            formatted: "N/A".to_string(),
            status: MetricStatus::Pending,
            labels: BTreeMap::new(),
        };
    }

    pub fn is_na(&self) -> bool {
        return self.raw.is_none();
    }
}

/// A Warning or Critical observation. Normal observations produce no record.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub instance: String,
    pub metric: String,
    pub metric_display: String,
    pub value: f64,
    pub formatted_value: String,
    pub warning_threshold: String,
    pub critical_threshold: String,
    pub level: AlertLevel,
    pub message: String,
}

/// Everything collected and evaluated for one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceResult {
    pub instance: Instance,
    pub metrics: BTreeMap<String, MetricValue>,
    pub alerts: Vec<Alert>,
    pub status: InstanceStatus,
    pub collected_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl InstanceResult {
    pub fn new(instance: Instance) -> Self {
        return InstanceResult {
            instance,
            metrics: BTreeMap::new(),
            alerts: Vec::new(),
            status: InstanceStatus::Normal,
            collected_at: Utc::now(),
            error: None,
        };
    }

    pub fn failed(instance: Instance, error: String) -> Self {
        let mut result = Self::new(instance);
        result.error = Some(error);
        result.status = InstanceStatus::Failed;
        return result;
    }

    pub fn identifier(&self) -> &str {
        return self.instance.identifier();
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        return self.metrics.get(name);
    }
}
