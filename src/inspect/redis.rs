use super::{MetricPolicy, ModuleCollector, build_evaluator, derive_ratio_metric};
use crate::catalog::MetricDefinition;
use crate::config::Config;
use crate::model::{Instance, InstanceResult, ModuleKind, RedisInstance, RedisRole};
use crate::source::MetricsClient;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;

const DISCOVERY_QUERY: &str = "redis_info";

const DEFAULT_POLICIES: [(&str, MetricPolicy); 3] = [
    ("redis_up", MetricPolicy::BinaryUp),
    (
        "connection_usage",
        MetricPolicy::HighIsBad {
            warning: 70.0,
            critical: 90.0,
        },
    ),
    (
        "memory_usage",
        MetricPolicy::HighIsBad {
            warning: 80.0,
            critical: 90.0,
        },
    ),
];

pub struct RedisModule {
    metrics: Arc<MetricsClient>,
    config: Arc<Config>,
}

impl RedisModule {
    pub fn new(metrics: Arc<MetricsClient>, config: Arc<Config>) -> Self {
        return RedisModule { metrics, config };
    }

    pub fn evaluator(config: &Config, definitions: &[MetricDefinition]) -> super::Evaluator {
        return build_evaluator(
            config,
            ModuleKind::Redis,
            definitions,
            &DEFAULT_POLICIES,
            &[
                ("connection_usage", "Connection Usage"),
                ("memory_usage", "Memory Usage"),
            ],
        );
    }
}

fn split_address(address: &str) -> (String, u16) {
    match address.rsplit_once(':') {
        Some((ip, port)) => (ip.to_string(), port.parse().unwrap_or(0)),
        None => (address.to_string(), 0),
    }
}

impl ModuleCollector for RedisModule {
    fn module(&self) -> ModuleKind {
        return ModuleKind::Redis;
    }

    async fn discover(&self, deadline: Instant) -> Result<Vec<Instance>> {
        let series = self
            .metrics
            .query_instant(DISCOVERY_QUERY, Utc::now(), deadline)
            .await
            .context("redis discovery query failed")?;

        let filter = &self.config.redis.instance_filter;
        let mut seen = BTreeSet::new();
        let mut instances = Vec::new();
        for entry in &series {
            let address = entry.label("instance");
            if address.is_empty() {
                continue;
            }
            let hostname = entry.label("agent_hostname");
            let hostname = if hostname.is_empty() { address } else { hostname };
            if !filter.matches(hostname, &entry.labels) {
                continue;
            }
            if !seen.insert(address.to_string()) {
                continue;
            }
            let (ip, port) = split_address(address);
            instances.push(Instance::Redis(RedisInstance {
                address: address.to_string(),
                ip,
                port,
                version: entry.label("version").to_string(),
                role: RedisRole::parse(entry.label("role")),
            }));
        }
        log::info!("Discovered {} redis instances", instances.len());
        return Ok(instances);
    }

    fn derive(&self, result: &mut InstanceResult) {
        derive_ratio_metric(result, "connection_usage", "connected_clients", "maxclients");
        // maxmemory 0 means "unlimited"; a ratio against it is meaningless.
        derive_ratio_metric(result, "memory_usage", "memory_used", "memory_max");
    }
}
