mod evaluate;
mod host;
mod inspector;
mod mysql;
mod nginx;
mod pipeline;
mod redis;
mod tomcat;

pub use evaluate::Evaluator;
pub use evaluate::MetricPolicy;
pub use host::HostModule;
pub use inspector::Inspector;
pub use mysql::MysqlModule;
pub use nginx::NginxModule;
pub use pipeline::Pipeline;
pub use pipeline::RunOptions;
pub use pipeline::effective_modules;
pub use redis::RedisModule;
pub use tomcat::TomcatModule;

use crate::catalog::{MetricDefinition, render_query};
use crate::common::format_value;
use crate::model::{Instance, InstanceResult, MetricValue, ModuleKind};
use crate::source::{MetricsClient, Series, SourceError, remaining};
use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Per-module discovery + derivation hooks. Collection itself is generic,
/// see `collect_instances`.
#[allow(async_fn_in_trait)]
pub trait ModuleCollector {
    fn module(&self) -> ModuleKind;

    async fn discover(&self, deadline: Instant) -> Result<Vec<Instance>>;

    /// Compute metrics that only exist as a combination of collected ones
    /// (usage ratios, ages). Runs after collection, before evaluation.
    fn derive(&self, _result: &mut InstanceResult) {}
}

/// Fan out over instances with a bounded worker pool. Metric queries within
/// one instance stay serial to keep per-host query load predictable.
///
/// Always succeeds: per-instance trouble lands in that instance's `error`,
/// per-metric trouble becomes NA. Order of the returned map is imposed by
/// the identifier key, not by task completion.
pub(crate) async fn collect_instances(
    metrics: &MetricsClient,
    instances: Vec<Instance>,
    definitions: &[MetricDefinition],
    concurrency: usize,
    deadline: Instant,
) -> BTreeMap<String, InstanceResult> {
    let active: Vec<&MetricDefinition> = definitions.iter().filter(|d| d.active).collect();
    let collected: Vec<(String, InstanceResult)> = futures::stream::iter(
        instances.into_iter().map(|instance| {
            let active = &active;
            async move {
                let identifier = instance.identifier().to_string();
                let result = collect_one(metrics, instance, active, deadline).await;
                (identifier, result)
            }
        }),
    )
    .buffer_unordered(concurrency.max(1))
    .collect()
    .await;
    return collected.into_iter().collect();
}

async fn collect_one(
    metrics: &MetricsClient,
    instance: Instance,
    definitions: &[&MetricDefinition],
    deadline: Instant,
) -> InstanceResult {
    let labels = instance.query_labels();
    let mut result = InstanceResult::new(instance);
    for definition in definitions {
        if remaining(deadline).is_none() {
            // Deadline gone: report cancellation, keep what was already
            // completed, never mix in half-fetched values.
            result.error = Some("cancelled".to_string());
            return result;
        }
        let query = render_query(&definition.query, &labels);
        match metrics.query_instant(&query, Utc::now(), deadline).await {
            Ok(series) => {
                result
                    .metrics
                    .insert(definition.name.clone(), value_from_series(definition, &series));
            }
            Err(SourceError::Timeout) if remaining(deadline).is_none() => {
                result.error = Some("cancelled".to_string());
                return result;
            }
            Err(err) => {
                // One broken metric must not take the instance down (nor its
                // siblings); absence of data is the honest answer here.
                log::warn!(
                    "{}: query for {} failed: {}",
                    result.identifier(),
                    definition.name,
                    err
                );
                result
                    .metrics
                    .insert(definition.name.clone(), MetricValue::na(&definition.name));
            }
        }
    }
    result.collected_at = Utc::now();
    return result;
}

/// An empty result set is NA, not zero. With several series the first one
/// carrying a sample wins; discovery queries are expected to be specific
/// enough for that to be unambiguous.
fn value_from_series(definition: &MetricDefinition, series: &[Series]) -> MetricValue {
    for entry in series {
        if let Some(value) = entry.value() {
            let formatted = format_value(value, definition.unit.as_deref());
            return MetricValue::new(&definition.name, value, formatted, entry.labels.clone());
        }
    }
    return MetricValue::na(&definition.name);
}

/// Assemble a module's evaluator: default policy table, overridden by the
/// configured thresholds, display names taken from the catalog.
pub(crate) fn build_evaluator(
    config: &crate::config::Config,
    module: ModuleKind,
    definitions: &[MetricDefinition],
    defaults: &[(&str, MetricPolicy)],
    derived_display: &[(&str, &str)],
) -> Evaluator {
    let mut evaluator = Evaluator::new();
    for (name, policy) in defaults {
        let policy = match config.threshold(module, name) {
            Some(threshold) => policy.with_threshold(threshold),
            None => *policy,
        };
        evaluator = evaluator.with_policy(name, policy);
    }
    for definition in definitions {
        evaluator = evaluator.with_display_name(&definition.name, &definition.display_name);
    }
    for (name, display) in derived_display {
        evaluator = evaluator.with_display_name(name, display);
    }
    return evaluator;
}

/// Derive a percentage metric `name` from `numerator / denominator * 100`.
/// Unevaluable inputs (either side NA, zero denominator) produce NA.
pub(crate) fn derive_usage_percent(
    result: &mut InstanceResult,
    name: &str,
    display_unit: Option<&str>,
    numerator: f64,
    denominator: f64,
) {
    if denominator <= 0.0 {
        result
            .metrics
            .insert(name.to_string(), MetricValue::na(name));
        return;
    }
    let value = numerator / denominator * 100.0;
    let formatted = format_value(value, display_unit.or(Some("%")));
    result.metrics.insert(
        name.to_string(),
        MetricValue::new(name, value, formatted, BTreeMap::new()),
    );
}

/// Raw values of two collected metrics, when both are present and numeric.
pub(crate) fn raw_pair(result: &InstanceResult, a: &str, b: &str) -> Option<(f64, f64)> {
    let a = result.metric(a)?.raw?;
    let b = result.metric(b)?.raw?;
    return Some((a, b));
}

/// Derive the percentage metric `name` from a numerator/denominator metric
/// pair. When either side was collected but the pair is unevaluable (one
/// side NA), the derived metric still shows up in the report, as an
/// explicit NA. Only when neither input exists is nothing emitted.
pub(crate) fn derive_ratio_metric(
    result: &mut InstanceResult,
    name: &str,
    numerator: &str,
    denominator: &str,
) {
    if result.metric(numerator).is_none() && result.metric(denominator).is_none() {
        return;
    }
    match raw_pair(result, numerator, denominator) {
        Some((numerator, denominator)) => {
            derive_usage_percent(result, name, None, numerator, denominator);
        }
        None => {
            result
                .metrics
                .insert(name.to_string(), MetricValue::na(name));
        }
    }
}
