mod excel;
mod html;
mod registry;

pub use excel::ExcelWriter;
pub use html::HtmlWriter;
pub use registry::ReportWriter;
pub use registry::WriterRegistry;

use crate::config::ReportConfig;
use crate::inspect::RunOptions;
use crate::model::Report;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// `{{.Date}}` is the only recognized placeholder; everything else passes
/// through verbatim.
pub fn resolve_filename(template: &str, tz: Tz, at: DateTime<Utc>) -> String {
    let date = at.with_timezone(&tz).format("%Y-%m-%d").to_string();
    return template.replace("{{.Date}}", &date);
}

/// Turns the merged report into the requested output files. Formats are
/// resolved up front so an unknown name fails before any inspection work;
/// a writer failure at write time is logged and skipped, the other formats
/// still get produced.
#[derive(Debug)]
pub struct Materializer {
    registry: WriterRegistry,
    formats: Vec<String>,
    output_dir: PathBuf,
    filename_template: String,
    timezone: Tz,
}

impl Materializer {
    pub fn new(config: &ReportConfig, options: &RunOptions, timezone: Tz) -> Result<Materializer> {
        let mut registry = WriterRegistry::new();
        let excel_template = options
            .excel_template
            .clone()
            .or_else(|| config.excel_template.clone());
        registry.register(Arc::new(ExcelWriter::new(timezone, excel_template)?));
        registry.register(Arc::new(HtmlWriter::new(
            timezone,
            config.html_template.clone(),
        )?));

        let formats = if options.formats.is_empty() {
            config.formats.clone()
        } else {
            options.formats.clone()
        };
        for format in &formats {
            registry.get(format)?;
        }
        let output_dir = options
            .output_dir
            .clone()
            .unwrap_or_else(|| config.output_dir.clone());
        return Ok(Materializer {
            registry,
            formats,
            output_dir,
            filename_template: config.filename_template.clone(),
            timezone,
        });
    }

    pub fn write(&self, report: &Report) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("cannot create output directory {}", self.output_dir.display())
        })?;
        let basename = resolve_filename(&self.filename_template, self.timezone, report.generated_at);

        let mut written = Vec::new();
        for format in &self.formats {
            // Formats were validated at construction time.
            let writer = match self.registry.get(format) {
                Ok(writer) => writer,
                Err(err) => {
                    log::error!("{}", err);
                    continue;
                }
            };
            let path = self
                .output_dir
                .join(format!("{}.{}", basename, writer.extension()));
            match writer.write(report, &path) {
                Ok(()) => {
                    log::info!("Wrote {} report to {}", writer.name(), path.display());
                    written.push(path);
                }
                Err(err) => {
                    // One broken writer must not take the others down.
                    eprintln!("⚠ {} writer failed: {:#}", writer.name(), err);
                    log::error!("{} writer failed: {:#}", writer.name(), err);
                }
            }
        }
        return Ok(written);
    }
}
