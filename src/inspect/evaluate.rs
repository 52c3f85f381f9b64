use crate::model::{Alert, AlertLevel, InstanceResult, InstanceStatus, MetricStatus};
use std::collections::BTreeMap;

/// How a single metric is judged. Warning and critical edges are inclusive:
/// value >= critical is Critical, else value >= warning is Warning.
#[derive(Debug, Clone, Copy)]
pub enum MetricPolicy {
    /// Plain numeric band (cpu, memory, disk, load, usage ratios).
    HighIsBad { warning: f64, critical: f64 },
    /// Zero is healthy, any occurrence warns, `critical` and above is fatal
    /// (zombie processes).
    Count { critical: f64 },
    /// Group-membership count judged against the expected quorum size:
    /// one member short warns, more than one is critical.
    AtLeastExpected { expected: f64 },
    /// 1 is up, anything else is down.
    BinaryUp,
    /// Value is an age in minutes since the last error: recent errors are
    /// worse than old ones.
    ErrorAge { warning: f64, critical: f64 },
}

impl MetricPolicy {
    /// None means Normal. Monotonic in the value for every variant.
    pub fn evaluate(&self, value: f64) -> Option<AlertLevel> {
        match self {
            MetricPolicy::HighIsBad { warning, critical } => {
                if value >= *critical {
                    return Some(AlertLevel::Critical);
                }
                if value >= *warning {
                    return Some(AlertLevel::Warning);
                }
                return None;
            }
            MetricPolicy::Count { critical } => {
                if value >= *critical {
                    return Some(AlertLevel::Critical);
                }
                if value >= 1.0 {
                    return Some(AlertLevel::Warning);
                }
                return None;
            }
            MetricPolicy::AtLeastExpected { expected } => {
                if value >= *expected {
                    return None;
                }
                if value >= *expected - 1.0 {
                    return Some(AlertLevel::Warning);
                }
                return Some(AlertLevel::Critical);
            }
            MetricPolicy::BinaryUp => {
                if value == 1.0 {
                    return None;
                }
                return Some(AlertLevel::Critical);
            }
            MetricPolicy::ErrorAge { warning, critical } => {
                if value <= *critical {
                    return Some(AlertLevel::Critical);
                }
                if value <= *warning {
                    return Some(AlertLevel::Warning);
                }
                return None;
            }
        }
    }

    /// Apply a configured warning/critical pair onto this policy's shape.
    /// Structural policies (BinaryUp, AtLeastExpected) have no numeric knobs
    /// and ignore it.
    pub fn with_threshold(self, threshold: crate::config::Threshold) -> MetricPolicy {
        match self {
            MetricPolicy::HighIsBad { .. } => MetricPolicy::HighIsBad {
                warning: threshold.warning,
                critical: threshold.critical,
            },
            MetricPolicy::Count { .. } => MetricPolicy::Count {
                critical: threshold.critical,
            },
            MetricPolicy::ErrorAge { .. } => MetricPolicy::ErrorAge {
                warning: threshold.warning,
                critical: threshold.critical,
            },
            other => other,
        }
    }

    pub fn warning_text(&self) -> String {
        match self {
            MetricPolicy::HighIsBad { warning, .. } => format!(">={}", warning),
            MetricPolicy::Count { .. } => ">=1".to_string(),
            MetricPolicy::AtLeastExpected { expected } => format!("={}", expected - 1.0),
            MetricPolicy::BinaryUp => "-".to_string(),
            MetricPolicy::ErrorAge { warning, .. } => format!("<={}min", warning),
        }
    }

    pub fn critical_text(&self) -> String {
        match self {
            MetricPolicy::HighIsBad { critical, .. } => format!(">={}", critical),
            MetricPolicy::Count { critical } => format!(">={}", critical),
            MetricPolicy::AtLeastExpected { expected } => format!("<{}", expected - 1.0),
            MetricPolicy::BinaryUp => "!=1".to_string(),
            MetricPolicy::ErrorAge { critical, .. } => format!("<={}min", critical),
        }
    }

    fn message(&self, display: &str, formatted: &str, level: AlertLevel) -> String {
        match self {
            MetricPolicy::BinaryUp => format!("{} check failed", display),
            MetricPolicy::AtLeastExpected { expected } => {
                format!("{} is {} (expected {})", display, formatted, expected)
            }
            MetricPolicy::ErrorAge { .. } => {
                format!("{}: last occurrence {}", display, formatted)
            }
            _ => match level {
                AlertLevel::Warning => format!(
                    "{} at {} breaches warning threshold {}",
                    display,
                    formatted,
                    self.warning_text()
                ),
                AlertLevel::Critical => format!(
                    "{} at {} breaches critical threshold {}",
                    display,
                    formatted,
                    self.critical_text()
                ),
            },
        }
    }
}

/// Pure per-instance evaluation: policies applied metric by metric, alerts
/// ranked, status rolled up. Running it twice changes nothing.
pub struct Evaluator {
    policies: BTreeMap<String, MetricPolicy>,
    display_names: BTreeMap<String, String>,
}

impl Evaluator {
    pub fn new() -> Self {
        return Evaluator {
            policies: BTreeMap::new(),
            display_names: BTreeMap::new(),
        };
    }

    pub fn with_policy(mut self, metric: &str, policy: MetricPolicy) -> Self {
        self.policies.insert(metric.to_string(), policy);
        return self;
    }

    pub fn with_display_name(mut self, metric: &str, display: &str) -> Self {
        self.display_names
            .insert(metric.to_string(), display.to_string());
        return self;
    }

    pub fn policy(&self, metric: &str) -> Option<&MetricPolicy> {
        return self.policies.get(metric);
    }

    fn display_name<'a>(&'a self, metric: &'a str) -> &'a str {
        return self
            .display_names
            .get(metric)
            .map(|s| s.as_str())
            .unwrap_or(metric);
    }

    pub fn evaluate(&self, result: &mut InstanceResult) {
        if result.error.is_some() {
            result.status = InstanceStatus::Failed;
            result.alerts.clear();
            return;
        }

        let identifier = result.identifier().to_string();
        let mut alerts = Vec::new();
        let mut worst: Option<AlertLevel> = None;

        for (name, value) in result.metrics.iter_mut() {
            let Some(raw) = value.raw else {
                // NA never alerts and never contributes to the rollup.
                value.status = MetricStatus::Pending;
                continue;
            };
            let Some(policy) = self.policies.get(name) else {
                // Informational metric, collected for the report only.
                value.status = MetricStatus::Normal;
                continue;
            };
            match policy.evaluate(raw) {
                None => value.status = MetricStatus::Normal,
                Some(level) => {
                    value.status = level.metric_status();
                    worst = worst.max(Some(level));
                    let display = self.display_name(name);
                    alerts.push(Alert {
                        instance: identifier.clone(),
                        metric: name.clone(),
                        metric_display: display.to_string(),
                        value: raw,
                        formatted_value: value.formatted.clone(),
                        warning_threshold: policy.warning_text(),
                        critical_threshold: policy.critical_text(),
                        level,
                        message: policy.message(display, &value.formatted, level),
                    });
                }
            }
        }

        alerts.sort_by(|a, b| b.level.cmp(&a.level).then(a.metric.cmp(&b.metric)));
        result.alerts = alerts;
        result.status = match worst {
            Some(AlertLevel::Critical) => InstanceStatus::Critical,
            Some(AlertLevel::Warning) => InstanceStatus::Warning,
            None => InstanceStatus::Normal,
        };
    }

    pub fn evaluate_all(&self, results: &mut BTreeMap<String, InstanceResult>) {
        for result in results.values_mut() {
            self.evaluate(result);
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}
