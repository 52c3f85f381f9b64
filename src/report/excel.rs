use super::registry::ReportWriter;
use crate::model::{InstanceStatus, MetricStatus, ModuleBundle, Report};
use anyhow::{Context, Result};
use chrono_tz::Tz;
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Optional workbook styling, loadable from a small YAML template so the
/// report look can change without a rebuild.
#[derive(Debug, Clone, Deserialize)]
struct SheetStyle {
    #[serde(default = "default_title")]
    title: String,
    #[serde(default = "default_warning_color")]
    warning_color: String,
    #[serde(default = "default_critical_color")]
    critical_color: String,
    #[serde(default = "default_failed_color")]
    failed_color: String,
}

fn default_title() -> String {
    return "Infrastructure Inspection Report".to_string();
}
fn default_warning_color() -> String {
    return "FFEB9C".to_string();
}
fn default_critical_color() -> String {
    return "FFC7CE".to_string();
}
fn default_failed_color() -> String {
    return "D9D9D9".to_string();
}

impl Default for SheetStyle {
    fn default() -> Self {
        return SheetStyle {
            title: default_title(),
            warning_color: default_warning_color(),
            critical_color: default_critical_color(),
            failed_color: default_failed_color(),
        };
    }
}

fn parse_color(value: &str) -> Color {
    let rgb = u32::from_str_radix(value.trim_start_matches('#'), 16).unwrap_or(0xFFFFFF);
    return Color::RGB(rgb);
}

#[derive(Debug)]
pub struct ExcelWriter {
    timezone: Tz,
    style: SheetStyle,
}

impl ExcelWriter {
    pub fn new(timezone: Tz, template: Option<PathBuf>) -> Result<Self> {
        let style = match template {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read excel template {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("cannot parse excel template {}", path.display()))?
            }
            None => SheetStyle::default(),
        };
        return Ok(ExcelWriter { timezone, style });
    }

    fn header_format(&self) -> Format {
        return Format::new()
            .set_bold()
            .set_background_color(Color::RGB(0xDDEBF7));
    }

    fn status_format(&self, status: InstanceStatus) -> Option<Format> {
        let color = match status {
            InstanceStatus::Normal => return None,
            InstanceStatus::Warning => parse_color(&self.style.warning_color),
            InstanceStatus::Critical => parse_color(&self.style.critical_color),
            InstanceStatus::Failed => parse_color(&self.style.failed_color),
        };
        return Some(Format::new().set_background_color(color));
    }

    fn metric_format(&self, status: MetricStatus) -> Option<Format> {
        match status {
            MetricStatus::Warning => {
                return Some(
                    Format::new().set_background_color(parse_color(&self.style.warning_color)),
                );
            }
            MetricStatus::Critical => {
                return Some(
                    Format::new().set_background_color(parse_color(&self.style.critical_color)),
                );
            }
            _ => return None,
        }
    }

    fn write_overview(&self, sheet: &mut Worksheet, report: &Report) -> Result<()> {
        let header = self.header_format();
        let title = Format::new().set_bold().set_font_size(14.0);
        sheet.write_string_with_format(0, 0, self.style.title.as_str(), &title)?;
        let generated = report
            .generated_at
            .with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string();
        sheet.write_string(1, 0, format!("Generated: {}", generated))?;
        sheet.write_string(2, 0, format!("Engine version: {}", report.version))?;

        let columns = [
            "Module", "Total", "Normal", "Warning", "Critical", "Failed", "Alerts", "Note",
        ];
        for (col, name) in columns.iter().enumerate() {
            sheet.write_string_with_format(4, col as u16, *name, &header)?;
        }
        let mut row = 5u32;
        for bundle in &report.bundles {
            sheet.write_string(row, 0, bundle.module.display_name())?;
            sheet.write_number(row, 1, bundle.summary.total as f64)?;
            sheet.write_number(row, 2, bundle.summary.normal as f64)?;
            sheet.write_number(row, 3, bundle.summary.warning as f64)?;
            sheet.write_number(row, 4, bundle.summary.critical as f64)?;
            sheet.write_number(row, 5, bundle.summary.failed as f64)?;
            sheet.write_number(
                row,
                6,
                (bundle.alert_summary.warning + bundle.alert_summary.critical) as f64,
            )?;
            if let Some(error) = &bundle.error {
                let failed = Format::new()
                    .set_background_color(parse_color(&self.style.failed_color));
                sheet.write_string_with_format(row, 7, format!("FAILED: {}", error), &failed)?;
            }
            row += 1;
        }
        let total = report.summary();
        let bold = Format::new().set_bold();
        sheet.write_string_with_format(row, 0, "Total", &bold)?;
        sheet.write_number_with_format(row, 1, total.total as f64, &bold)?;
        sheet.write_number_with_format(row, 2, total.normal as f64, &bold)?;
        sheet.write_number_with_format(row, 3, total.warning as f64, &bold)?;
        sheet.write_number_with_format(row, 4, total.critical as f64, &bold)?;
        sheet.write_number_with_format(row, 5, total.failed as f64, &bold)?;
        sheet.set_column_width(0, 18)?;
        sheet.set_column_width(7, 48)?;
        return Ok(());
    }

    fn write_module_sheet(&self, sheet: &mut Worksheet, bundle: &ModuleBundle) -> Result<()> {
        let header = self.header_format();
        let metric_names: BTreeSet<&str> = bundle
            .results
            .iter()
            .flat_map(|result| result.metrics.keys().map(|name| name.as_str()))
            .collect();

        // MySQL and Redis carry one extra descriptor column (cluster mode,
        // replication role) from their discovery labels.
        let detail_header = bundle.module.detail_header();
        let mut col = 0u16;
        for name in ["Identifier", "IP"] {
            sheet.write_string_with_format(0, col, name, &header)?;
            col += 1;
        }
        if let Some(name) = detail_header {
            sheet.write_string_with_format(0, col, name, &header)?;
            col += 1;
        }
        for name in ["Status", "Error"] {
            sheet.write_string_with_format(0, col, name, &header)?;
            col += 1;
        }
        for name in &metric_names {
            sheet.write_string_with_format(0, col, *name, &header)?;
            col += 1;
        }
        sheet.set_column_width(0, 28)?;
        sheet.set_column_width(1, 16)?;

        let mut row = 1u32;
        // Cluster grouping (Redis): one header row per /24 group, members
        // beneath it. Without groups the listing stays flat.
        if !bundle.clusters.is_empty() {
            for cluster in &bundle.clusters {
                let group = Format::new()
                    .set_bold()
                    .set_background_color(Color::RGB(0xE2EFDA));
                sheet.write_string_with_format(
                    row,
                    0,
                    format!("Cluster {} ({} instances)", cluster.prefix, cluster.members.len()),
                    &group,
                )?;
                row += 1;
                for member in &cluster.members {
                    if let Some(result) =
                        bundle.results.iter().find(|r| r.identifier() == member.as_str())
                    {
                        self.write_result_row(
                            sheet,
                            row,
                            result,
                            detail_header.is_some(),
                            &metric_names,
                        )?;
                        row += 1;
                    }
                }
            }
            return Ok(());
        }
        for result in &bundle.results {
            self.write_result_row(sheet, row, result, detail_header.is_some(), &metric_names)?;
            row += 1;
        }
        return Ok(());
    }

    fn write_result_row(
        &self,
        sheet: &mut Worksheet,
        row: u32,
        result: &crate::model::InstanceResult,
        has_detail: bool,
        metric_names: &BTreeSet<&str>,
    ) -> Result<()> {
        sheet.write_string(row, 0, result.identifier())?;
        sheet.write_string(row, 1, result.instance.ip())?;
        let mut col = 2u16;
        if has_detail {
            sheet.write_string(row, col, result.instance.detail().unwrap_or(""))?;
            col += 1;
        }
        match self.status_format(result.status) {
            Some(format) => {
                sheet.write_string_with_format(row, col, result.status.as_str(), &format)?
            }
            None => sheet.write_string(row, col, result.status.as_str())?,
        };
        col += 1;
        sheet.write_string(row, col, result.error.as_deref().unwrap_or(""))?;
        col += 1;
        for name in metric_names {
            match result.metric(name) {
                Some(value) => match self.metric_format(value.status) {
                    Some(format) => {
                        sheet.write_string_with_format(row, col, value.formatted.as_str(), &format)?
                    }
                    None => sheet.write_string(row, col, value.formatted.as_str())?,
                },
                None => sheet.write_string(row, col, "")?,
            };
            col += 1;
        }
        return Ok(());
    }

    fn write_alerts(&self, sheet: &mut Worksheet, report: &Report) -> Result<()> {
        let header = self.header_format();
        let columns = [
            "Module", "Instance", "Metric", "Value", "Warning", "Critical", "Level", "Message",
        ];
        for (col, name) in columns.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *name, &header)?;
        }
        let mut row = 1u32;
        for bundle in &report.bundles {
            for alert in &bundle.alerts {
                sheet.write_string(row, 0, bundle.module.display_name())?;
                sheet.write_string(row, 1, alert.instance.as_str())?;
                sheet.write_string(row, 2, alert.metric_display.as_str())?;
                sheet.write_string(row, 3, alert.formatted_value.as_str())?;
                sheet.write_string(row, 4, alert.warning_threshold.as_str())?;
                sheet.write_string(row, 5, alert.critical_threshold.as_str())?;
                let level_format = Format::new().set_background_color(match alert.level {
                    crate::model::AlertLevel::Warning => parse_color(&self.style.warning_color),
                    crate::model::AlertLevel::Critical => parse_color(&self.style.critical_color),
                });
                sheet.write_string_with_format(row, 6, alert.level.as_str(), &level_format)?;
                sheet.write_string(row, 7, alert.message.as_str())?;
                row += 1;
            }
        }
        sheet.set_column_width(1, 28)?;
        sheet.set_column_width(7, 64)?;
        return Ok(());
    }
}

impl ReportWriter for ExcelWriter {
    fn name(&self) -> &'static str {
        return "excel";
    }

    fn extension(&self) -> &'static str {
        return "xlsx";
    }

    fn write(&self, report: &Report, path: &Path) -> Result<()> {
        let mut workbook = Workbook::new();
        let overview = workbook.add_worksheet();
        overview.set_name("Overview")?;
        self.write_overview(overview, report)?;
        for bundle in &report.bundles {
            let sheet = workbook.add_worksheet();
            sheet.set_name(bundle.module.display_name())?;
            self.write_module_sheet(sheet, bundle)?;
        }
        let alerts = workbook.add_worksheet();
        alerts.set_name("Alerts")?;
        self.write_alerts(alerts, report)?;
        workbook.save(path)?;
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Instance, InstanceResult, ModuleKind, RedisInstance, RedisRole,
    };
    use std::collections::BTreeMap;

    fn sample_report() -> Report {
        let mut report = Report::new("UTC", "1.0-test");
        let mut results = BTreeMap::new();
        for i in 1..=2 {
            for prefix in ["192.18.102", "192.18.107"] {
                let address = format!("{}.{}:6379", prefix, i);
                let result = InstanceResult::new(Instance::Redis(RedisInstance {
                    address: address.clone(),
                    ip: format!("{}.{}", prefix, i),
                    port: 6379,
                    version: "7.0.5".to_string(),
                    role: RedisRole::Master,
                }));
                results.insert(address, result);
            }
        }
        report.push(ModuleBundle::empty(ModuleKind::Redis, "1.0-test").finalize(results));
        return report;
    }

    #[test]
    fn test_write_workbook_with_cluster_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        let writer = ExcelWriter::new(chrono_tz::UTC, None).unwrap();
        writer.write(&sample_report(), &path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }

    #[test]
    fn test_style_template_override() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("style.yaml");
        std::fs::write(&template, "title: Fleet Weekly\nwarning_color: \"FFF2CC\"\n").unwrap();
        let writer = ExcelWriter::new(chrono_tz::UTC, Some(template)).unwrap();
        assert_eq!(writer.style.title, "Fleet Weekly");
        assert_eq!(writer.style.warning_color, "FFF2CC");
        // Unset keys keep their defaults.
        assert_eq!(writer.style.critical_color, "FFC7CE");
    }

    #[test]
    fn test_broken_style_template_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("style.yaml");
        std::fs::write(&template, "title: [unclosed").unwrap();
        assert!(ExcelWriter::new(chrono_tz::UTC, Some(template)).is_err());
    }
}
