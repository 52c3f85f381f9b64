use crate::model::Report;
use anyhow::{Result, bail};
use std::path::Path;
use std::sync::Arc;

pub trait ReportWriter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn extension(&self) -> &'static str;
    fn write(&self, report: &Report, path: &Path) -> Result<()>;
}

/// Format name -> writer, matched case-insensitively.
#[derive(Debug)]
pub struct WriterRegistry {
    writers: Vec<(&'static str, Arc<dyn ReportWriter>)>,
}

impl WriterRegistry {
    pub fn new() -> Self {
        return WriterRegistry {
            writers: Vec::new(),
        };
    }

    pub fn register(&mut self, writer: Arc<dyn ReportWriter>) {
        let name = writer.name();
        self.writers.push((name, writer));
    }

    pub fn has(&self, name: &str) -> bool {
        return self
            .writers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ReportWriter>> {
        match self
            .writers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, writer)) => return Ok(writer.clone()),
            None => bail!(
                "unknown report format '{}' (supported: {})",
                name,
                self.all().join(", ")
            ),
        }
    }

    pub fn all(&self) -> Vec<&'static str> {
        return self.writers.iter().map(|(name, _)| *name).collect();
    }
}

impl Default for WriterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
