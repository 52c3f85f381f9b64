use super::{MetricPolicy, ModuleCollector, build_evaluator};
use crate::catalog::MetricDefinition;
use crate::config::{Config, HostFilter};
use crate::model::{DiskMount, HostInstance, Instance, ModuleKind};
use crate::source::{AssetClient, HostMeta};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;

const DEFAULT_POLICIES: [(&str, MetricPolicy); 5] = [
    (
        "cpu_usage",
        MetricPolicy::HighIsBad {
            warning: 70.0,
            critical: 90.0,
        },
    ),
    (
        "mem_usage",
        MetricPolicy::HighIsBad {
            warning: 80.0,
            critical: 95.0,
        },
    ),
    (
        "disk_usage_max",
        MetricPolicy::HighIsBad {
            warning: 80.0,
            critical: 90.0,
        },
    ),
    (
        "load_per_core",
        MetricPolicy::HighIsBad {
            warning: 0.7,
            critical: 1.0,
        },
    ),
    ("zombies", MetricPolicy::Count { critical: 10.0 }),
];

/// Hosts are discovered through the asset registry, not through a metrics
/// series: the registry is the authority on what the fleet contains.
pub struct HostModule {
    assets: Arc<AssetClient>,
    filter: HostFilter,
    server_query: String,
}

impl HostModule {
    pub fn new(assets: Arc<AssetClient>, filter: HostFilter, server_query: String) -> Self {
        return HostModule {
            assets,
            filter,
            server_query,
        };
    }

    pub fn evaluator(config: &Config, definitions: &[MetricDefinition]) -> super::Evaluator {
        return build_evaluator(
            config,
            ModuleKind::Host,
            definitions,
            &DEFAULT_POLICIES,
            &[],
        );
    }

    fn keep(&self, host: &HostMeta) -> bool {
        if !self.filter.business_groups.is_empty() {
            let matched = self.filter.business_groups.iter().any(|group| {
                host.tags
                    .iter()
                    .any(|tag| tag == &format!("busigroup={}", group))
            });
            if !matched {
                return false;
            }
        }
        if !self.filter.tags.is_empty() {
            let matched = self
                .filter
                .tags
                .iter()
                .any(|wanted| host.tags.iter().any(|tag| tag == wanted));
            if !matched {
                return false;
            }
        }
        return true;
    }
}

fn host_instance(host: HostMeta) -> HostInstance {
    let disk_mounts = host
        .filesystems
        .into_iter()
        .map(|fs| DiskMount {
            path: fs.mount,
            total_bytes: fs.total_bytes,
        })
        .collect();
    return HostInstance {
        ident: host.ident,
        hostname: host.hostname,
        ip: host.ip,
        os: host.os,
        kernel: host.kernel,
        cpu_cores: host.cpu_cores,
        cpu_model: host.cpu_model,
        memory_total: host.memory_total,
        disk_mounts,
    };
}

impl ModuleCollector for HostModule {
    fn module(&self) -> ModuleKind {
        return ModuleKind::Host;
    }

    async fn discover(&self, deadline: Instant) -> Result<Vec<Instance>> {
        let server_query = if self.server_query.is_empty() {
            None
        } else {
            Some(self.server_query.as_str())
        };
        let hosts = self
            .assets
            .list_hosts(server_query, deadline)
            .await
            .context("host discovery failed")?;

        let mut seen = BTreeSet::new();
        let mut instances = Vec::new();
        for host in hosts {
            if !self.keep(&host) {
                continue;
            }
            if !seen.insert(host.ident.clone()) {
                log::warn!("Duplicate host ident {} from the registry", host.ident);
                continue;
            }
            instances.push(Instance::Host(host_instance(host)));
        }
        log::info!("Discovered {} hosts", instances.len());
        return Ok(instances);
    }
}
