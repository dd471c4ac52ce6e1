use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Result;
use crate::workflow::run::{Document, ReportKind, RunId};

#[derive(Serialize)]
struct Metadata<'a> {
    title: &'a str,
    run_id: String,
    report_kind: ReportKind,
    generated_at: DateTime<Utc>,
    generator: &'static str,
    version: &'static str,
    sections: usize,
    charts: usize,
    characters: usize,
    fingerprint: &'a str,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    metadata: Metadata<'a>,
    content: &'a Document,
}

/// Render a document as `{ metadata, content }` JSON
pub fn render_json(
    document: &Document,
    run_id: RunId,
    generated_at: DateTime<Utc>,
) -> Result<String> {
    let report = JsonReport {
        metadata: Metadata {
            title: &document.title,
            run_id: run_id.to_string(),
            report_kind: document.report_kind,
            generated_at,
            generator: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            sections: document.sections.len(),
            charts: document.chart_count(),
            characters: document.char_count(),
            fingerprint: &document.fingerprint,
        },
        content: document,
    };

    Ok(serde_json::to_string_pretty(&report)?)
}
