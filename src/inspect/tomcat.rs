use super::nginx::{derive_error_age, lookup_ip};
use super::{MetricPolicy, ModuleCollector, build_evaluator, derive_ratio_metric};
use crate::catalog::MetricDefinition;
use crate::config::Config;
use crate::model::{
    Instance, InstanceResult, ModuleKind, TomcatInstance, container_identifier,
};
use crate::source::{AssetClient, MetricsClient};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::time::Instant;

const DISCOVERY_QUERY: &str = "tomcat_info";

const DEFAULT_POLICIES: [(&str, MetricPolicy); 5] = [
    ("tomcat_up", MetricPolicy::BinaryUp),
    (
        "heap_usage",
        MetricPolicy::HighIsBad {
            warning: 80.0,
            critical: 90.0,
        },
    ),
    (
        "thread_usage",
        MetricPolicy::HighIsBad {
            warning: 80.0,
            critical: 90.0,
        },
    ),
    ("non_root_user", MetricPolicy::BinaryUp),
    (
        "last_error_timestamp",
        MetricPolicy::ErrorAge {
            warning: 60.0,
            critical: 10.0,
        },
    ),
];

pub struct TomcatModule {
    metrics: Arc<MetricsClient>,
    assets: Arc<AssetClient>,
    config: Arc<Config>,
}

impl TomcatModule {
    pub fn new(
        metrics: Arc<MetricsClient>,
        assets: Arc<AssetClient>,
        config: Arc<Config>,
    ) -> Self {
        return TomcatModule {
            metrics,
            assets,
            config,
        };
    }

    pub fn evaluator(config: &Config, definitions: &[MetricDefinition]) -> super::Evaluator {
        return build_evaluator(
            config,
            ModuleKind::Tomcat,
            definitions,
            &DEFAULT_POLICIES,
            &[
                ("heap_usage", "Heap Usage"),
                ("thread_usage", "Thread Pool Usage"),
            ],
        );
    }
}

impl ModuleCollector for TomcatModule {
    fn module(&self) -> ModuleKind {
        return ModuleKind::Tomcat;
    }

    async fn discover(&self, deadline: Instant) -> Result<Vec<Instance>> {
        let series = self
            .metrics
            .query_instant(DISCOVERY_QUERY, Utc::now(), deadline)
            .await
            .context("tomcat discovery query failed")?;
        let ips = match self.assets.list_hosts(None, deadline).await {
            Ok(hosts) => hosts
                .into_iter()
                .map(|host| (host.hostname, host.ip))
                .collect(),
            Err(err) => {
                log::warn!("Asset lookup for ip enrichment failed: {}", err);
                BTreeMap::new()
            }
        };

        let filter = &self.config.tomcat.instance_filter;
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
            let port: u16 = entry.label("port").parse().unwrap_or(8080);
            let container = match entry.label("container") {
                "" => None,
                container => Some(container.to_string()),
            };
            let identifier = container_identifier(hostname, container.as_deref(), port);
            if !seen.insert(identifier.clone()) {
                continue;
            }
            instances.push(Instance::Tomcat(TomcatInstance {
                identifier,
                hostname: hostname.to_string(),
                ip: lookup_ip(&ips, hostname),
                port,
                container,
                version: entry.label("version").to_string(),
                catalina_home: entry.label("catalina_home").to_string(),
            }));
        }
        log::info!("Discovered {} tomcat instances", instances.len());
        return Ok(instances);
    }

    fn derive(&self, result: &mut InstanceResult) {
        derive_ratio_metric(result, "heap_usage", "heap_used", "heap_max");
        derive_ratio_metric(result, "thread_usage", "threads_busy", "threads_max");
        derive_error_age(result, "last_error_timestamp");
    }
}
