use super::{
    HostModule, Inspector, MysqlModule, NginxModule, RedisModule, TomcatModule,
};
use crate::catalog::{self, MetricDefinition};
use crate::config::Config;
use crate::model::{ModuleBundle, ModuleKind, Report};
use crate::source::{AssetClient, MetricsClient, RetryPolicy};
use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Explicit run options threaded from the CLI. Module code never reads
/// process globals.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// At most one module may be singled out.
    pub only: Option<ModuleKind>,
    pub skip: Vec<ModuleKind>,
    /// Overrides for `report.formats`; empty means use the config.
    pub formats: Vec<String>,
    pub output_dir: Option<PathBuf>,
    /// Per-module catalog file overrides.
    pub catalogs: BTreeMap<ModuleKind, PathBuf>,
    pub excel_template: Option<PathBuf>,
}

/// Resolve the effective module set from config enablement and the
/// only/skip lattice. Violations are reported before any network I/O.
pub fn effective_modules(config: &Config, options: &RunOptions) -> Result<Vec<ModuleKind>> {
    if let Some(only) = options.only {
        if options.skip.contains(&only) {
            bail!(
                "--{}-only and --skip-{} are mutually exclusive",
                only,
                only
            );
        }
        if !config.module_enabled(only) {
            bail!("--{}-only requires {}.enabled in the config", only, only);
        }
        return Ok(vec![only]);
    }
    return Ok(ModuleKind::ALL
        .into_iter()
        .filter(|module| config.module_enabled(*module) && !options.skip.contains(module))
        .collect());
}

/// Runs the enabled module inspectors in parallel under one deadline and
/// merges their bundles into the final report, in fixed module order.
pub struct Pipeline {
    config: Arc<Config>,
    options: RunOptions,
    version: String,
}

impl Pipeline {
    pub fn new(config: Config, options: RunOptions, version: &str) -> Self {
        return Pipeline {
            config: Arc::new(config),
            options,
            version: version.to_string(),
        };
    }

    pub fn config(&self) -> &Config {
        return &self.config;
    }

    pub fn options(&self) -> &RunOptions {
        return &self.options;
    }

    /// Load the catalog of every module that will run. Fatal on the first
    /// broken catalog; runs before any upstream is contacted.
    pub fn load_catalogs(
        &self,
        modules: &[ModuleKind],
    ) -> Result<BTreeMap<ModuleKind, Vec<MetricDefinition>>> {
        let mut catalogs = BTreeMap::new();
        for module in modules {
            let path = self
                .options
                .catalogs
                .get(module)
                .cloned()
                .unwrap_or_else(|| self.config.catalog_path(*module));
            let definitions = catalog::load(&path)?;
            log::info!(
                "[{}] catalog {}: {} metrics, {} active",
                module,
                path.display(),
                definitions.len(),
                catalog::count_active(&definitions)
            );
            catalogs.insert(*module, definitions);
        }
        return Ok(catalogs);
    }

    pub async fn run(&self) -> Result<Report> {
        let modules = effective_modules(&self.config, &self.options)?;
        if modules.is_empty() {
            bail!("no module is enabled, nothing to inspect");
        }
        let mut catalogs = self.load_catalogs(&modules)?;

        let http = reqwest::Client::new();
        let retry = RetryPolicy::new(
            self.config.http.retry.max_retries,
            self.config.http.retry.base_delay,
        );
        let metrics = Arc::new(MetricsClient::new(
            &self.config.datasources.victoriametrics.endpoint,
            http.clone(),
            self.config.datasources.victoriametrics.timeout,
            retry,
        ));
        let assets = Arc::new(AssetClient::new(
            &self.config.datasources.n9e.endpoint,
            &self.config.datasources.n9e.token,
            http,
            self.config.datasources.n9e.timeout,
            retry,
        ));

        let deadline = Instant::now() + self.config.inspection.host_timeout;
        log::info!(
            "Starting inspection of {:?} (deadline {})",
            modules,
            humantime::format_duration(self.config.inspection.host_timeout)
        );

        let mut handles: Vec<(ModuleKind, JoinHandle<ModuleBundle>)> = Vec::new();
        for module in &modules {
            let definitions = catalogs.remove(module).unwrap_or_default();
            handles.push((
                *module,
                self.spawn_module(*module, definitions, metrics.clone(), assets.clone(), deadline),
            ));
        }

        let mut bundles: BTreeMap<ModuleKind, ModuleBundle> = BTreeMap::new();
        for (module, handle) in handles {
            let bundle = match handle.await {
                Ok(bundle) => bundle,
                Err(err) => {
                    log::error!("[{}] module task aborted: {}", module, err);
                    ModuleBundle::failed(module, &self.version, format!("module task aborted: {}", err))
                }
            };
            bundles.insert(module, bundle);
        }

        let mut report = Report::new(&self.config.report.timezone, &self.version);
        for module in ModuleKind::ALL {
            if let Some(bundle) = bundles.remove(&module) {
                report.push(bundle);
            }
        }
        return Ok(report);
    }

    /// One task per module; a failing or slow module never cancels its
    /// siblings. The small grace on top of the deadline lets in-flight
    /// instances report themselves as cancelled instead of being dropped.
    fn spawn_module(
        &self,
        module: ModuleKind,
        definitions: Vec<MetricDefinition>,
        metrics: Arc<MetricsClient>,
        assets: Arc<AssetClient>,
        deadline: Instant,
    ) -> JoinHandle<ModuleBundle> {
        let config = self.config.clone();
        let version = self.version.clone();
        let concurrency = config.inspection.concurrency;

        return tokio::spawn(async move {
            let run = async {
                match module {
                    ModuleKind::Host => {
                        let collector = HostModule::new(
                            assets.clone(),
                            config.inspection.host_filter.clone(),
                            config.datasources.n9e.query.clone(),
                        );
                        let evaluator = HostModule::evaluator(&config, &definitions);
                        Inspector::new(collector, definitions, evaluator, &version, concurrency)
                            .run(&metrics, deadline)
                            .await
                    }
                    ModuleKind::Mysql => {
                        let collector = MysqlModule::new(metrics.clone(), config.clone());
                        let evaluator = MysqlModule::evaluator(&config, &definitions);
                        Inspector::new(collector, definitions, evaluator, &version, concurrency)
                            .run(&metrics, deadline)
                            .await
                    }
                    ModuleKind::Redis => {
                        let collector = RedisModule::new(metrics.clone(), config.clone());
                        let evaluator = RedisModule::evaluator(&config, &definitions);
                        Inspector::new(collector, definitions, evaluator, &version, concurrency)
                            .run(&metrics, deadline)
                            .await
                    }
                    ModuleKind::Nginx => {
                        let collector =
                            NginxModule::new(metrics.clone(), assets.clone(), config.clone());
                        let evaluator = NginxModule::evaluator(&config, &definitions);
                        Inspector::new(collector, definitions, evaluator, &version, concurrency)
                            .run(&metrics, deadline)
                            .await
                    }
                    ModuleKind::Tomcat => {
                        let collector =
                            TomcatModule::new(metrics.clone(), assets.clone(), config.clone());
                        let evaluator = TomcatModule::evaluator(&config, &definitions);
                        Inspector::new(collector, definitions, evaluator, &version, concurrency)
                            .run(&metrics, deadline)
                            .await
                    }
                }
            };
            match tokio::time::timeout_at(deadline + Duration::from_secs(5), run).await {
                Ok(bundle) => bundle,
                Err(_) => {
                    log::error!("[{}] did not finish within the deadline", module);
                    ModuleBundle::failed(module, &version, "cancelled".to_string())
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceStatus;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn test_config(body: &str) -> Config {
        let mut config: Config = serde_yaml::from_str(body).unwrap();
        config.base_dir = std::path::PathBuf::from(".");
        config.validate().unwrap();
        return config;
    }

    fn enabled_config() -> Config {
        return test_config(
            r#"
datasources:
  n9e: {endpoint: "http://n9e.example", token: t}
  victoriametrics: {endpoint: "http://vm.example"}
mysql: {enabled: true}
redis: {enabled: true}
nginx: {enabled: false}
tomcat: {enabled: true}
"#,
        );
    }

    #[test]
    fn test_effective_modules_default() {
        let config = enabled_config();
        let modules = effective_modules(&config, &RunOptions::default()).unwrap();
        assert_eq!(
            modules,
            [
                ModuleKind::Host,
                ModuleKind::Mysql,
                ModuleKind::Redis,
                ModuleKind::Tomcat
            ]
        );
    }

    #[test]
    fn test_effective_modules_skip() {
        let config = enabled_config();
        let options = RunOptions {
            skip: vec![ModuleKind::Mysql, ModuleKind::Tomcat],
            ..Default::default()
        };
        let modules = effective_modules(&config, &options).unwrap();
        assert_eq!(modules, [ModuleKind::Host, ModuleKind::Redis]);
    }

    #[test]
    fn test_effective_modules_only() {
        let config = enabled_config();
        let options = RunOptions {
            only: Some(ModuleKind::Redis),
            ..Default::default()
        };
        let modules = effective_modules(&config, &options).unwrap();
        assert_eq!(modules, [ModuleKind::Redis]);
    }

    #[test]
    fn test_only_conflicts_with_skip() {
        let config = enabled_config();
        let options = RunOptions {
            only: Some(ModuleKind::Redis),
            skip: vec![ModuleKind::Redis],
            ..Default::default()
        };
        assert!(effective_modules(&config, &options).is_err());
    }

    #[test]
    fn test_only_requires_enabled() {
        let config = enabled_config();
        let options = RunOptions {
            only: Some(ModuleKind::Nginx),
            ..Default::default()
        };
        let err = effective_modules(&config, &options).unwrap_err();
        assert!(err.to_string().contains("nginx.enabled"));
    }

    /// Two hosts with mixed severities: summary counters, alert ranking
    /// and the exit class all line up.
    #[tokio::test]
    async fn test_mixed_severity_run() {
        let mut assets_server = mockito::Server::new_async().await;
        assets_server
            .mock("GET", "/api/targets")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"{"dat":{"list":[
                    {"ident":"h1","host_ip":"10.0.0.1","os":"CentOS","cpu_num":4,"tags":[],"extend_info":""},
                    {"ident":"h2","host_ip":"10.0.0.2","os":"CentOS","cpu_num":4,"tags":[],"extend_info":""}
                ],"total":2},"err":""}"#,
            )
            .create_async()
            .await;

        let mut metrics_server = mockito::Server::new_async().await;
        for (ident, cpu, mem) in [("h1", "78", "40"), ("h2", "95", "92")] {
            metrics_server
                .mock("GET", "/api/v1/query")
                .match_query(mockito::Matcher::UrlEncoded(
                    "query".into(),
                    format!("cpu_usage_active{{ident=\"{}\"}}", ident),
                ))
                .with_body(format!(
                    r#"{{"status":"success","data":{{"resultType":"vector","result":[
                        {{"metric":{{"ident":"{}"}},"value":[1712000000,"{}"]}}]}}}}"#,
                    ident, cpu
                ))
                .create_async()
                .await;
            metrics_server
                .mock("GET", "/api/v1/query")
                .match_query(mockito::Matcher::UrlEncoded(
                    "query".into(),
                    format!("mem_used_percent{{ident=\"{}\"}}", ident),
                ))
                .with_body(format!(
                    r#"{{"status":"success","data":{{"resultType":"vector","result":[
                        {{"metric":{{"ident":"{}"}},"value":[1712000000,"{}"]}}]}}}}"#,
                    ident, mem
                ))
                .create_async()
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("host.yaml");
        let mut file = std::fs::File::create(&catalog_path).unwrap();
        file.write_all(
            br#"
- name: cpu_usage
  display_name: CPU Usage
  query: cpu_usage_active{ident="{{ident}}"}
  category: cpu
  unit: "%"
- name: mem_usage
  display_name: Memory Usage
  query: mem_used_percent{ident="{{ident}}"}
  category: memory
  unit: "%"
"#,
        )
        .unwrap();

        let config = test_config(&format!(
            r#"
datasources:
  n9e: {{endpoint: "{}", token: t}}
  victoriametrics: {{endpoint: "{}"}}
thresholds:
  cpu_usage: {{warning: 70, critical: 90}}
  mem_usage: {{warning: 80, critical: 90}}
"#,
            assets_server.url(),
            metrics_server.url()
        ));
        let mut options = RunOptions::default();
        options
            .catalogs
            .insert(ModuleKind::Host, catalog_path.clone());

        let pipeline = Pipeline::new(config, options, "1.0-test");
        let report = pipeline.run().await.unwrap();

        let summary = report.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.normal, 0);
        assert_eq!(summary.warning, 1);
        assert_eq!(summary.critical, 1);
        assert_eq!(report.exit_class(), 2);

        let bundle = report.bundle(ModuleKind::Host).unwrap();
        assert_eq!(bundle.results[0].identifier(), "h1");
        assert_eq!(bundle.results[0].status, InstanceStatus::Warning);
        assert_eq!(bundle.results[1].status, InstanceStatus::Critical);

        // h2's two criticals first (cpu before mem), then h1's warning.
        let ranked: Vec<_> = bundle
            .alerts
            .iter()
            .map(|a| (a.instance.as_str(), a.metric.as_str()))
            .collect();
        assert_eq!(
            ranked,
            [("h2", "cpu_usage"), ("h2", "mem_usage"), ("h1", "cpu_usage")]
        );
    }

    /// One metric 500s for one host: that metric is NA, everything else is
    /// intact, nobody is marked Failed.
    #[tokio::test]
    async fn test_partial_upstream_failure() {
        let mut assets_server = mockito::Server::new_async().await;
        assets_server
            .mock("GET", "/api/targets")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"{"dat":{"list":[
                    {"ident":"h1","host_ip":"10.0.0.1","os":"CentOS","cpu_num":4,"tags":[],"extend_info":""},
                    {"ident":"h2","host_ip":"10.0.0.2","os":"CentOS","cpu_num":4,"tags":[],"extend_info":""},
                    {"ident":"h3","host_ip":"10.0.0.3","os":"CentOS","cpu_num":4,"tags":[],"extend_info":""}
                ],"total":3},"err":""}"#,
            )
            .create_async()
            .await;

        let mut metrics_server = mockito::Server::new_async().await;
        for ident in ["h1", "h2", "h3"] {
            let status = if ident == "h2" { 500 } else { 200 };
            metrics_server
                .mock("GET", "/api/v1/query")
                .match_query(mockito::Matcher::UrlEncoded(
                    "query".into(),
                    format!("cpu_usage_active{{ident=\"{}\"}}", ident),
                ))
                .with_status(status)
                .with_body(if status == 200 {
                    format!(
                        r#"{{"status":"success","data":{{"resultType":"vector","result":[
                            {{"metric":{{"ident":"{}"}},"value":[1712000000,"42"]}}]}}}}"#,
                        ident
                    )
                } else {
                    "internal error".to_string()
                })
                .create_async()
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("host.yaml");
        std::fs::write(
            &catalog_path,
            r#"
- name: cpu_usage
  display_name: CPU Usage
  query: cpu_usage_active{ident="{{ident}}"}
  category: cpu
  unit: "%"
"#,
        )
        .unwrap();

        let config = test_config(&format!(
            r#"
datasources:
  n9e: {{endpoint: "{}", token: t}}
  victoriametrics: {{endpoint: "{}"}}
http:
  retry: {{max_retries: 1, base_delay: 10ms}}
"#,
            assets_server.url(),
            metrics_server.url()
        ));
        let mut options = RunOptions::default();
        options.catalogs.insert(ModuleKind::Host, catalog_path);

        let pipeline = Pipeline::new(config, options, "1.0-test");
        let report = pipeline.run().await.unwrap();
        let bundle = report.bundle(ModuleKind::Host).unwrap();
        assert_eq!(bundle.summary.total, 3);
        assert_eq!(bundle.summary.failed, 0);
        let h2 = &bundle.results[1];
        assert_eq!(h2.identifier(), "h2");
        assert!(h2.error.is_none());
        assert!(h2.metric("cpu_usage").unwrap().is_na());
        assert!(bundle.results[0].metric("cpu_usage").unwrap().raw == Some(42.0));
        assert_eq!(report.exit_class(), 0);
    }
}
