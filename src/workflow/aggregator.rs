//! Result Aggregator
//!
//! Accumulates stage outputs into a draft as they arrive and turns the
//! draft into the final [`Document`] exactly once. Write rules:
//!
//! - the outline sets section titles once
//! - the content stage sets each body once
//! - polish may overwrite bodies set by content, nothing else may
//! - charts attach to the section they name, to the appendix when they name
//!   none, and are dropped with a warning when the section is unknown
//!
//! Section order is always outline order, whatever order bodies arrive in.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

use super::run::{AggregationWarning, ChartDescriptor, Document, ReportKind, Section};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("outline already set")]
    OutlineAlreadySet,

    #[error("outline has no sections")]
    EmptyOutline,

    #[error("no outline to attach output to")]
    OutlineMissing,

    #[error("section index {index} out of range (outline has {total})")]
    SectionOutOfRange { index: usize, total: usize },

    #[error("section {0} already has a body")]
    SectionAlreadySet(usize),

    #[error("section {0} already polished")]
    AlreadyPolished(usize),

    #[error("polish returned {got} sections, outline has {expected}")]
    PolishMismatch { expected: usize, got: usize },

    #[error("section {0} has no body")]
    MissingBody(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyOrigin {
    Content,
    Polish,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    title: String,
    kind: ReportKind,
    titles: Option<Vec<String>>,
    bodies: Vec<Option<(String, BodyOrigin)>>,
    charts: Vec<ChartDescriptor>,
}

impl Aggregator {
    pub fn new(title: impl Into<String>, kind: ReportKind) -> Self {
        Self {
            title: title.into(),
            kind,
            titles: None,
            bodies: Vec::new(),
            charts: Vec::new(),
        }
    }

    pub fn set_outline(&mut self, titles: Vec<String>) -> Result<(), AggregateError> {
        if self.titles.is_some() {
            return Err(AggregateError::OutlineAlreadySet);
        }
        if titles.is_empty() {
            return Err(AggregateError::EmptyOutline);
        }
        self.bodies = vec![None; titles.len()];
        self.titles = Some(titles);
        Ok(())
    }

    pub fn set_section_body(&mut self, index: usize, body: String) -> Result<(), AggregateError> {
        let total = self.section_total()?;
        let slot = self
            .bodies
            .get_mut(index)
            .ok_or(AggregateError::SectionOutOfRange { index, total })?;
        if slot.is_some() {
            return Err(AggregateError::SectionAlreadySet(index));
        }
        *slot = Some((body, BodyOrigin::Content));
        Ok(())
    }

    /// Replace content bodies with polished ones, outline order.
    /// Checked in full before anything is written.
    pub fn apply_polish(&mut self, polished: Vec<String>) -> Result<(), AggregateError> {
        let expected = self.section_total()?;
        if polished.len() != expected {
            return Err(AggregateError::PolishMismatch {
                expected,
                got: polished.len(),
            });
        }
        for (index, slot) in self.bodies.iter().enumerate() {
            match slot {
                None => return Err(AggregateError::MissingBody(index)),
                Some((_, BodyOrigin::Polish)) => return Err(AggregateError::AlreadyPolished(index)),
                Some((_, BodyOrigin::Content)) => {}
            }
        }
        for (slot, body) in self.bodies.iter_mut().zip(polished) {
            *slot = Some((body, BodyOrigin::Polish));
        }
        Ok(())
    }

    pub fn attach_charts(&mut self, charts: Vec<ChartDescriptor>) {
        self.charts.extend(charts);
    }

    pub fn sections_completed(&self) -> usize {
        self.bodies.iter().filter(|b| b.is_some()).count()
    }

    pub fn sections_total(&self) -> usize {
        self.titles.as_ref().map_or(0, Vec::len)
    }

    fn section_total(&self) -> Result<usize, AggregateError> {
        self.titles
            .as_ref()
            .map(Vec::len)
            .ok_or(AggregateError::OutlineMissing)
    }

    /// Produce the document. Consumes the aggregator.
    pub fn finalize(self) -> Result<(Document, Vec<AggregationWarning>), AggregateError> {
        let titles = self.titles.ok_or(AggregateError::OutlineMissing)?;

        let mut sections = Vec::with_capacity(titles.len());
        for (index, (title, body)) in titles.into_iter().zip(self.bodies).enumerate() {
            let (body, _) = body.ok_or(AggregateError::MissingBody(index))?;
            sections.push(Section {
                title,
                body,
                charts: Vec::new(),
            });
        }

        let mut by_title: HashMap<&str, usize> = HashMap::new();
        for (i, section) in sections.iter().enumerate() {
            by_title.entry(section.title.as_str()).or_insert(i);
        }

        let mut placements: Vec<(Option<usize>, ChartDescriptor)> = Vec::new();
        let mut warnings = Vec::new();
        for chart in self.charts {
            match chart.section.as_deref() {
                None => placements.push((None, chart)),
                Some(name) => match by_title.get(name) {
                    Some(&i) => placements.push((Some(i), chart)),
                    None => {
                        warn!(chart = %chart.title, section = name, "Dropping chart for unknown section");
                        warnings.push(AggregationWarning::OrphanChart {
                            chart: chart.title.clone(),
                            section: name.to_string(),
                        });
                    }
                },
            }
        }

        let mut appendix = Vec::new();
        for (target, chart) in placements {
            match target {
                Some(i) => sections[i].charts.push(chart),
                None => appendix.push(chart),
            }
        }

        let mut document = Document {
            title: self.title,
            report_kind: self.kind,
            sections,
            appendix,
            fingerprint: String::new(),
        };
        document.fingerprint = fingerprint(&document);

        Ok((document, warnings))
    }
}

/// SHA-256 hex over the serialized sections and appendix
pub fn fingerprint(document: &Document) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document.title.as_bytes());
    hasher.update([0u8]);
    if let Ok(bytes) = serde_json::to_vec(&(&document.sections, &document.appendix)) {
        hasher.update(&bytes);
    }
    format!("{:x}", hasher.finalize())
}
