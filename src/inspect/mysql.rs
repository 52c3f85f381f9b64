use super::{MetricPolicy, ModuleCollector, build_evaluator, derive_ratio_metric};
use crate::catalog::MetricDefinition;
use crate::config::Config;
use crate::model::{Instance, InstanceResult, ModuleKind, MysqlClusterMode, MysqlInstance};
use crate::source::MetricsClient;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;

const DISCOVERY_QUERY: &str = "mysql_info";

const DEFAULT_POLICIES: [(&str, MetricPolicy); 4] = [
    ("mysql_up", MetricPolicy::BinaryUp),
    (
        "connection_usage",
        MetricPolicy::HighIsBad {
            warning: 70.0,
            critical: 90.0,
        },
    ),
    ("mgr_state_online", MetricPolicy::BinaryUp),
    (
        "replication_delay",
        MetricPolicy::HighIsBad {
            warning: 10.0,
            critical: 60.0,
        },
    ),
];

pub struct MysqlModule {
    metrics: Arc<MetricsClient>,
    config: Arc<Config>,
}

impl MysqlModule {
    pub fn new(metrics: Arc<MetricsClient>, config: Arc<Config>) -> Self {
        return MysqlModule { metrics, config };
    }

    pub fn evaluator(config: &Config, definitions: &[MetricDefinition]) -> super::Evaluator {
        let evaluator = build_evaluator(
            config,
            ModuleKind::Mysql,
            definitions,
            &DEFAULT_POLICIES,
            &[("connection_usage", "Connection Usage")],
        );
        // Quorum size is an expectation, not a threshold pair.
        return evaluator
            .with_policy(
                "mgr_member_count",
                MetricPolicy::AtLeastExpected {
                    expected: config.mysql.mgr_expected_members as f64,
                },
            )
            .with_display_name("mgr_member_count", "MGR Member Count");
    }
}

impl ModuleCollector for MysqlModule {
    fn module(&self) -> ModuleKind {
        return ModuleKind::Mysql;
    }

    async fn discover(&self, deadline: Instant) -> Result<Vec<Instance>> {
        let series = self
            .metrics
            .query_instant(DISCOVERY_QUERY, Utc::now(), deadline)
            .await
            .context("mysql discovery query failed")?;

        let filter = &self.config.mysql.base.instance_filter;
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
            instances.push(Instance::Mysql(MysqlInstance {
                address: address.to_string(),
                version: entry.label("version").to_string(),
                server_id: entry.label("server_id").to_string(),
                cluster_mode: MysqlClusterMode::parse(entry.label("cluster_mode")),
            }));
        }
        log::info!("Discovered {} mysql instances", instances.len());
        return Ok(instances);
    }

    fn derive(&self, result: &mut InstanceResult) {
        // Unevaluable when max_connections is zero or unknown; NA, not 0%.
        derive_ratio_metric(result, "connection_usage", "threads_connected", "max_connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceStatus, MetricValue};
    use crate::source::RetryPolicy;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn test_config(extra: &str) -> Arc<Config> {
        let raw = format!(
            r#"
datasources:
  n9e: {{endpoint: "http://n9e.example", token: t}}
  victoriametrics: {{endpoint: "http://vm.example"}}
mysql:
  enabled: true
{}"#,
            extra
        );
        let mut config: Config = serde_yaml::from_str(&raw).unwrap();
        config.base_dir = std::path::PathBuf::from(".");
        return Arc::new(config);
    }

    fn module(endpoint: &str, config: Arc<Config>) -> MysqlModule {
        let metrics = Arc::new(MetricsClient::new(
            endpoint,
            reqwest::Client::new(),
            Duration::from_secs(5),
            RetryPolicy::new(0, Duration::from_millis(1)),
        ));
        return MysqlModule::new(metrics, config);
    }

    fn mysql_result(address: &str) -> InstanceResult {
        return InstanceResult::new(Instance::Mysql(MysqlInstance {
            address: address.to_string(),
            version: "8.0.32".to_string(),
            server_id: "7".to_string(),
            cluster_mode: Some(MysqlClusterMode::Mgr),
        }));
    }

    fn put(result: &mut InstanceResult, name: &str, value: f64) {
        result.metrics.insert(
            name.to_string(),
            MetricValue::new(name, value, format!("{}", value), BTreeMap::new()),
        );
    }

    #[tokio::test]
    async fn test_discover_parses_identity_labels() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{"instance":"10.0.0.5:3306","agent_hostname":"db01",
                               "version":"8.0.32","server_id":"5","cluster_mode":"MGR"},
                     "value":[1712000000,"1"]},
                    {"metric":{"instance":"10.0.0.5:3306","agent_hostname":"db01",
                               "version":"8.0.32","server_id":"5","cluster_mode":"MGR"},
                     "value":[1712000000,"1"]}
                ]}}"#,
            )
            .create_async()
            .await;

        let module = module(&server.url(), test_config(""));
        let deadline = Instant::now() + Duration::from_secs(30);
        let instances = module.discover(deadline).await.unwrap();
        // The duplicate series collapses into one instance.
        assert_eq!(instances.len(), 1);
        match &instances[0] {
            Instance::Mysql(mysql) => {
                assert_eq!(mysql.address, "10.0.0.5:3306");
                assert_eq!(mysql.cluster_mode, Some(MysqlClusterMode::Mgr));
            }
            other => panic!("expected mysql instance, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discover_applies_hostname_filter() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{"instance":"10.0.0.5:3306","agent_hostname":"db-pay-01"},"value":[1712000000,"1"]},
                    {"metric":{"instance":"10.0.0.6:3306","agent_hostname":"db-core-01"},"value":[1712000000,"1"]}
                ]}}"#,
            )
            .create_async()
            .await;

        let config = test_config("  instance_filter:\n    hostnames: [\"db-pay-*\"]\n");
        let module = module(&server.url(), config);
        let deadline = Instant::now() + Duration::from_secs(30);
        let instances = module.discover(deadline).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].identifier(), "10.0.0.5:3306");
    }

    #[test]
    fn test_derive_connection_usage() {
        let config = test_config("");
        let module = module("http://127.0.0.1:1", config);
        let mut result = mysql_result("10.0.0.5:3306");
        put(&mut result, "threads_connected", 450.0);
        put(&mut result, "max_connections", 1000.0);
        module.derive(&mut result);
        assert_eq!(result.metric("connection_usage").unwrap().raw, Some(45.0));
    }

    #[test]
    fn test_derive_connection_usage_zero_max_is_na() {
        let config = test_config("");
        let module = module("http://127.0.0.1:1", config);
        let mut result = mysql_result("10.0.0.5:3306");
        put(&mut result, "threads_connected", 450.0);
        put(&mut result, "max_connections", 0.0);
        module.derive(&mut result);
        assert!(result.metric("connection_usage").unwrap().is_na());
    }

    #[test]
    fn test_mgr_member_loss_scenario() {
        // Two members of an expected three warns; a dead member state is
        // critical; the rollup is critical.
        let config = test_config("");
        let evaluator = MysqlModule::evaluator(&config, &[]);
        let mut result = mysql_result("10.0.0.5:3306");
        put(&mut result, "mgr_member_count", 2.0);
        put(&mut result, "mgr_state_online", 0.0);
        evaluator.evaluate(&mut result);
        assert_eq!(result.status, InstanceStatus::Critical);
        assert_eq!(result.alerts.len(), 2);
        assert_eq!(result.alerts[0].metric, "mgr_state_online");
        assert_eq!(result.alerts[0].level, crate::model::AlertLevel::Critical);
        assert_eq!(result.alerts[1].metric, "mgr_member_count");
        assert_eq!(result.alerts[1].level, crate::model::AlertLevel::Warning);
    }

    #[test]
    fn test_configured_expected_members() {
        let config = test_config("  mgr_expected_members: 5\n");
        let evaluator = MysqlModule::evaluator(&config, &[]);
        let mut result = mysql_result("10.0.0.5:3306");
        put(&mut result, "mgr_member_count", 4.0);
        evaluator.evaluate(&mut result);
        assert_eq!(result.status, InstanceStatus::Warning);
    }
}
