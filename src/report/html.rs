use super::registry::ReportWriter;
use crate::model::{MetricStatus, ModuleBundle, Report};
use anyhow::{Context, Result};
use chrono_tz::Tz;
use handlebars::Handlebars;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const DEFAULT_TEMPLATE: &str = include_str!("report.hbs");

#[derive(Debug)]
pub struct HtmlWriter {
    timezone: Tz,
    template: String,
}

impl HtmlWriter {
    pub fn new(timezone: Tz, template: Option<PathBuf>) -> Result<Self> {
        let template = match template {
            Some(path) => std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read html template {}", path.display()))?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        return Ok(HtmlWriter { timezone, template });
    }

    fn metric_class(status: MetricStatus) -> &'static str {
        match status {
            MetricStatus::Normal => return "normal",
            MetricStatus::Pending => return "pending",
            MetricStatus::Warning => return "warning",
            MetricStatus::Critical => return "critical",
        }
    }

    fn module_context(bundle: &ModuleBundle) -> serde_json::Value {
        let headers: BTreeSet<&str> = bundle
            .results
            .iter()
            .flat_map(|result| result.metrics.keys().map(|name| name.as_str()))
            .collect();
        let rows: Vec<_> = bundle
            .results
            .iter()
            .map(|result| {
                let cells: Vec<_> = headers
                    .iter()
                    .map(|name| match result.metric(name) {
                        Some(value) => json!({
                            "text": value.formatted,
                            "class": Self::metric_class(value.status),
                        }),
                        None => json!({"text": "", "class": "normal"}),
                    })
                    .collect();
                json!({
                    "identifier": result.identifier(),
                    "ip": result.instance.ip(),
                    "detail": result.instance.detail(),
                    "status": result.status.as_str(),
                    "status_class": result.status.as_str().to_ascii_lowercase(),
                    "cells": cells,
                })
            })
            .collect();
        let clusters: Vec<_> = bundle
            .clusters
            .iter()
            .map(|cluster| {
                json!({
                    "prefix": cluster.prefix,
                    "count": cluster.members.len(),
                })
            })
            .collect();
        return json!({
            "display_name": bundle.module.display_name(),
            "detail_header": bundle.module.detail_header(),
            "summary": bundle.summary,
            "alert_count": bundle.alert_summary.warning + bundle.alert_summary.critical,
            "error": bundle.error,
            "headers": headers.iter().collect::<Vec<_>>(),
            "rows": rows,
            "clusters": clusters,
        });
    }
}

impl ReportWriter for HtmlWriter {
    fn name(&self) -> &'static str {
        return "html";
    }

    fn extension(&self) -> &'static str {
        return "html";
    }

    fn write(&self, report: &Report, path: &Path) -> Result<()> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string("report", &self.template)
            .context("invalid html template")?;

        let alerts: Vec<_> = report
            .bundles
            .iter()
            .flat_map(|bundle| {
                bundle.alerts.iter().map(|alert| {
                    json!({
                        "module": bundle.module.display_name(),
                        "instance": alert.instance,
                        "metric": alert.metric_display,
                        "value": alert.formatted_value,
                        "warning": alert.warning_threshold,
                        "critical": alert.critical_threshold,
                        "level": alert.level.as_str(),
                        "level_class": alert.level.as_str().to_ascii_lowercase(),
                        "message": alert.message,
                    })
                })
            })
            .collect();
        let context = json!({
            "title": "Infrastructure Inspection Report",
            "generated_at": report
                .generated_at
                .with_timezone(&self.timezone)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            "timezone": report.timezone,
            "version": report.version,
            "modules": report.bundles.iter().map(Self::module_context).collect::<Vec<_>>(),
            "total": report.summary(),
            "alerts": alerts,
        });

        let rendered = handlebars
            .render("report", &context)
            .context("html rendering failed")?;
        std::fs::write(path, rendered)
            .with_context(|| format!("cannot write {}", path.display()))?;
        return Ok(());
    }
}
