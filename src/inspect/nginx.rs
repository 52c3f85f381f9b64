use super::{MetricPolicy, ModuleCollector, build_evaluator, derive_usage_percent};
use crate::catalog::MetricDefinition;
use crate::config::Config;
use crate::model::{
    Instance, InstanceResult, MetricValue, ModuleKind, NginxInstance, container_identifier,
};
use crate::source::{AssetClient, MetricsClient};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::time::Instant;

const DISCOVERY_QUERY: &str = "nginx_info";

const DEFAULT_POLICIES: [(&str, MetricPolicy); 6] = [
    ("nginx_up", MetricPolicy::BinaryUp),
    (
        "connection_usage",
        MetricPolicy::HighIsBad {
            warning: 70.0,
            critical: 90.0,
        },
    ),
    (
        "last_error_timestamp",
        MetricPolicy::ErrorAge {
            warning: 60.0,
            critical: 10.0,
        },
    ),
    ("error_page_configured", MetricPolicy::BinaryUp),
    ("non_root_user", MetricPolicy::BinaryUp),
    ("upstream_status_code", MetricPolicy::BinaryUp),
];

pub struct NginxModule {
    metrics: Arc<MetricsClient>,
    assets: Arc<AssetClient>,
    config: Arc<Config>,
}

impl NginxModule {
    pub fn new(
        metrics: Arc<MetricsClient>,
        assets: Arc<AssetClient>,
        config: Arc<Config>,
    ) -> Self {
        return NginxModule {
            metrics,
            assets,
            config,
        };
    }

    pub fn evaluator(config: &Config, definitions: &[MetricDefinition]) -> super::Evaluator {
        return build_evaluator(
            config,
            ModuleKind::Nginx,
            definitions,
            &DEFAULT_POLICIES,
            &[("connection_usage", "Connection Usage")],
        );
    }
}

/// Registry lookup table for hostname -> ip enrichment. A registry outage
/// degrades every ip to N/A instead of failing discovery: the agent labels
/// alone are enough to inspect the instance.
async fn ip_index(assets: &AssetClient, deadline: Instant) -> BTreeMap<String, String> {
    match assets.list_hosts(None, deadline).await {
        Ok(hosts) => {
            return hosts
                .into_iter()
                .map(|host| (host.hostname, host.ip))
                .collect();
        }
        Err(err) => {
            log::warn!("Asset lookup for ip enrichment failed: {}", err);
            return BTreeMap::new();
        }
    }
}

pub(crate) fn lookup_ip(index: &BTreeMap<String, String>, hostname: &str) -> String {
    return index
        .get(hostname)
        .cloned()
        .unwrap_or_else(|| "N/A".to_string());
}

/// Convert a collected epoch-seconds metric into an age in minutes so the
/// policy can judge recency. Zero (never happened) becomes a huge age.
pub(crate) fn derive_error_age(result: &mut InstanceResult, name: &str) {
    let Some(metric) = result.metrics.get(name) else {
        return;
    };
    let Some(timestamp) = metric.raw else {
        return;
    };
    let age_minutes = ((Utc::now().timestamp() as f64) - timestamp).max(0.0) / 60.0;
    let formatted = format!("{:.0} min ago", age_minutes);
    result.metrics.insert(
        name.to_string(),
        MetricValue::new(name, age_minutes, formatted, BTreeMap::new()),
    );
}

impl ModuleCollector for NginxModule {
    fn module(&self) -> ModuleKind {
        return ModuleKind::Nginx;
    }

    async fn discover(&self, deadline: Instant) -> Result<Vec<Instance>> {
        let series = self
            .metrics
            .query_instant(DISCOVERY_QUERY, Utc::now(), deadline)
            .await
            .context("nginx discovery query failed")?;
        let ips = ip_index(&self.assets, deadline).await;

        let filter = &self.config.nginx.instance_filter;
        let mut seen = BTreeSet::new();
        let mut instances = Vec::new();
        for entry in &series {
            let hostname = entry.label("agent_hostname");
            if hostname.is_empty() {
                continue;
            }
            if !filter.matches(hostname, &entry.labels) {
                continue;
            }
            let port: u16 = entry.label("port").parse().unwrap_or(80);
            let container = match entry.label("container") {
                "" => None,
                container => Some(container.to_string()),
            };
            let identifier = container_identifier(hostname, container.as_deref(), port);
            if !seen.insert(identifier.clone()) {
                continue;
            }
            instances.push(Instance::Nginx(NginxInstance {
                identifier,
                hostname: hostname.to_string(),
                ip: lookup_ip(&ips, hostname),
                port,
                container,
                app_type: entry.label("app_type").to_string(),
                version: entry.label("version").to_string(),
                install_path: entry.label("install_path").to_string(),
                error_log_path: entry.label("error_log_path").to_string(),
            }));
        }
        log::info!("Discovered {} nginx instances", instances.len());
        return Ok(instances);
    }

    fn derive(&self, result: &mut InstanceResult) {
        // Capacity is workers * per-worker connections. Any NA input keeps
        // the derived metric visible in the report as an explicit NA
        // instead of dropping the column.
        let active = result.metric("connections_active").and_then(|m| m.raw);
        let workers = result.metric("worker_processes").and_then(|m| m.raw);
        let connections = result.metric("worker_connections").and_then(|m| m.raw);
        let collected_any = ["connections_active", "worker_processes", "worker_connections"]
            .iter()
            .any(|name| result.metric(name).is_some());
        if collected_any {
            match (active, workers, connections) {
                (Some(active), Some(workers), Some(connections)) => {
                    derive_usage_percent(
                        result,
                        "connection_usage",
                        None,
                        active,
                        workers * connections,
                    );
                }
                _ => {
                    result.metrics.insert(
                        "connection_usage".to_string(),
                        MetricValue::na("connection_usage"),
                    );
                }
            }
        }
        derive_error_age(result, "last_error_timestamp");
    }
}
