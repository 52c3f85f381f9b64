use super::{Alert, AlertLevel, Instance, InstanceResult, InstanceStatus, ModuleKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub normal: usize,
    pub warning: usize,
    pub critical: usize,
    pub failed: usize,
}

impl StatusSummary {
    pub fn add(&mut self, status: InstanceStatus) {
        self.total += 1;
        match status {
            InstanceStatus::Normal => self.normal += 1,
            InstanceStatus::Warning => self.warning += 1,
            InstanceStatus::Critical => self.critical += 1,
            InstanceStatus::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &StatusSummary) {
        self.total += other.total;
        self.normal += other.normal;
        self.warning += other.warning;
        self.critical += other.critical;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AlertSummary {
    pub warning: usize,
    pub critical: usize,
}

impl AlertSummary {
    pub fn add(&mut self, level: AlertLevel) {
        match level {
            AlertLevel::Warning => self.warning += 1,
            AlertLevel::Critical => self.critical += 1,
        }
    }
}

/// A set of Redis instances sharing an IPv4 /24 prefix.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterGroup {
    pub prefix: String,
    pub members: Vec<String>,
}

/// Per-module result: every instance, the flattened ranked alerts, counters.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleBundle {
    pub module: ModuleKind,
    pub inspection_time: DateTime<Utc>,
    #[serde(skip)]
    pub duration: Duration,
    pub results: Vec<InstanceResult>,
    pub alerts: Vec<Alert>,
    pub summary: StatusSummary,
    pub alert_summary: AlertSummary,
    pub version: String,
    /// Module-fatal discovery error; results are empty when set.
    pub error: Option<String>,
    /// Redis only: present when more than one /24 prefix was seen.
    pub clusters: Vec<ClusterGroup>,
}

impl ModuleBundle {
    pub fn empty(module: ModuleKind, version: &str) -> Self {
        return ModuleBundle {
            module,
            inspection_time: Utc::now(),
            duration: Duration::ZERO,
            results: Vec::new(),
            alerts: Vec::new(),
            summary: StatusSummary::default(),
            alert_summary: AlertSummary::default(),
            version: version.to_string(),
            error: None,
            clusters: Vec::new(),
        };
    }

    pub fn failed(module: ModuleKind, version: &str, error: String) -> Self {
        let mut bundle = Self::empty(module, version);
        bundle.error = Some(error);
        return bundle;
    }

    /// Impose the deterministic report order and recompute every counter.
    ///
    /// Results sort by identifier ascending; alerts by (level desc,
    /// identifier asc). Concurrent collection provides no ordering of its
    /// own, this is the only place order comes from.
    pub fn finalize(mut self, results: BTreeMap<String, InstanceResult>) -> Self {
        self.results = results.into_values().collect();
        self.results
            .sort_by(|a, b| a.identifier().cmp(b.identifier()));

        self.summary = StatusSummary::default();
        self.alert_summary = AlertSummary::default();
        self.alerts.clear();
        for result in &self.results {
            self.summary.add(result.status);
            for alert in &result.alerts {
                self.alert_summary.add(alert.level);
                self.alerts.push(alert.clone());
            }
        }
        self.alerts
            .sort_by(|a, b| b.level.cmp(&a.level).then(a.instance.cmp(&b.instance)));

        if self.module == ModuleKind::Redis {
            self.clusters = redis_cluster_groups(&self.results);
        }
        return self;
    }
}

/// Group Redis instances by /24 network prefix. A single prefix means a
/// single flat cluster and yields no grouping at all.
pub fn redis_cluster_groups(results: &[InstanceResult]) -> Vec<ClusterGroup> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for result in results {
        let ip = match &result.instance {
            Instance::Redis(redis) => redis.ip.as_str(),
            _ => continue,
        };
        let octets: Vec<&str> = ip.split('.').collect();
        if octets.len() != 4 {
            continue;
        }
        let prefix = format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2]);
        groups
            .entry(prefix)
            .or_default()
            .push(result.identifier().to_string());
    }
    if groups.len() <= 1 {
        return Vec::new();
    }
    return groups
        .into_iter()
        .map(|(prefix, mut members)| {
            members.sort();
            ClusterGroup { prefix, members }
        })
        .collect();
}

/// The merged multi-module report. Bundles keep the fixed module order.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub timezone: String,
    pub version: String,
    pub bundles: Vec<ModuleBundle>,
}

impl Report {
    pub fn new(timezone: &str, version: &str) -> Self {
        return Report {
            generated_at: Utc::now(),
            timezone: timezone.to_string(),
            version: version.to_string(),
            bundles: Vec::new(),
        };
    }

    pub fn push(&mut self, bundle: ModuleBundle) {
        self.bundles.push(bundle);
    }

    pub fn bundle(&self, module: ModuleKind) -> Option<&ModuleBundle> {
        return self.bundles.iter().find(|b| b.module == module);
    }

    /// Cross-module roll-up of instance counts.
    pub fn summary(&self) -> StatusSummary {
        let mut total = StatusSummary::default();
        for bundle in &self.bundles {
            total.merge(&bundle.summary);
        }
        return total;
    }

    /// Alerts of every module concatenated in module order. Each module's
    /// slice keeps its own (level desc, identifier asc) ranking.
    pub fn combined_alerts(&self) -> Vec<&Alert> {
        return self.bundles.iter().flat_map(|b| b.alerts.iter()).collect();
    }

    /// Process exit class: 2 on any Critical instance, 1 on any Warning,
    /// else 0. A Failed module alone never raises the class.
    pub fn exit_class(&self) -> i32 {
        let summary = self.summary();
        if summary.critical > 0 {
            return 2;
        }
        if summary.warning > 0 {
            return 1;
        }
        return 0;
    }
}
