//! Report Formatting
//!
//! Renders a finished [`Document`] into output files. The workflow only
//! depends on the [`ReportFormatter`] trait; [`FileFormatter`] is the
//! filesystem implementation used by the CLI.

mod json;
mod markdown;

pub use json::render_json;
pub use markdown::render_markdown;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::types::{ReportError, Result};
use crate::workflow::run::{Document, RunId};

// =============================================================================
// Output Format
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!(
                "Unsupported output format: {}. Supported: markdown, json",
                other
            )),
        }
    }
}

/// A written report file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub format: OutputFormat,
    pub path: PathBuf,
    pub bytes: u64,
}

// =============================================================================
// Formatter
// =============================================================================

/// Turns a document into files, one per requested format
pub trait ReportFormatter: Send + Sync {
    fn write(
        &self,
        document: &Document,
        formats: &[OutputFormat],
        run_id: RunId,
    ) -> Result<Vec<OutputFile>>;
}

pub type SharedFormatter = Arc<dyn ReportFormatter>;

/// Writes `report_<run-id>.<ext>` files into a directory
pub struct FileFormatter {
    output_dir: PathBuf,
}

impl FileFormatter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn file_name(run_id: RunId, format: OutputFormat) -> String {
        format!("report_{}.{}", run_id, format.extension())
    }

    fn render(
        document: &Document,
        format: OutputFormat,
        run_id: RunId,
        generated_at: DateTime<Utc>,
    ) -> Result<String> {
        match format {
            OutputFormat::Markdown => Ok(render_markdown(document, generated_at)),
            OutputFormat::Json => render_json(document, run_id, generated_at),
        }
    }
}

impl ReportFormatter for FileFormatter {
    fn write(
        &self,
        document: &Document,
        formats: &[OutputFormat],
        run_id: RunId,
    ) -> Result<Vec<OutputFile>> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| ReportError::format("output", format!("{}: {}", self.output_dir.display(), e)))?;

        let generated_at = Utc::now();
        let mut files = Vec::with_capacity(formats.len());

        for &format in formats {
            let content = Self::render(document, format, run_id, generated_at)?;
            let path = self.output_dir.join(Self::file_name(run_id, format));
            fs::write(&path, &content).map_err(|e| {
                ReportError::format(format.as_str(), format!("{}: {}", path.display(), e))
            })?;

            info!(path = %path.display(), format = %format, "Report written");
            files.push(OutputFile {
                format,
                path,
                bytes: content.len() as u64,
            });
        }

        Ok(files)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::workflow::run::{ChartDescriptor, ChartType, ReportKind, Section};
    use tempfile::TempDir;

    pub(crate) fn sample_document() -> Document {
        Document {
            title: "边缘计算发展报告".to_string(),
            report_kind: ReportKind::Research,
            sections: vec![
                Section {
                    title: "边缘计算概述".to_string(),
                    body: "边缘计算将计算能力下沉到数据源附近。".to_string(),
                    charts: vec![ChartDescriptor {
                        chart_type: ChartType::Bar,
                        title: "部署规模".to_string(),
                        description: "各地区部署节点数量".to_string(),
                        data_concept: String::new(),
                        priority: 4,
                        section: Some("边缘计算概述".to_string()),
                    }],
                },
                Section {
                    title: "结论与展望".to_string(),
                    body: "边缘计算仍处于快速发展期。".to_string(),
                    charts: Vec::new(),
                },
            ],
            appendix: vec![ChartDescriptor {
                chart_type: ChartType::Table,
                title: "术语表".to_string(),
                description: "关键术语对照".to_string(),
                data_concept: String::new(),
                priority: 2,
                section: None,
            }],
            fingerprint: "abc123".to_string(),
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("markdown".parse::<OutputFormat>(), Ok(OutputFormat::Markdown));
        assert_eq!("MD".parse::<OutputFormat>(), Ok(OutputFormat::Markdown));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("docx".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_file_formatter_writes_each_format() {
        let temp_dir = TempDir::new().unwrap();
        let formatter = FileFormatter::new(temp_dir.path().join("out"));
        let run_id = RunId::new();

        let files = formatter
            .write(
                &sample_document(),
                &[OutputFormat::Markdown, OutputFormat::Json],
                run_id,
            )
            .unwrap();

        assert_eq!(files.len(), 2);
        for file in &files {
            assert!(file.path.exists());
            assert!(file.bytes > 0);
            let name = file.path.file_name().unwrap().to_string_lossy().to_string();
            assert_eq!(name, FileFormatter::file_name(run_id, file.format));
        }
    }
}
