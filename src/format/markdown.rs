use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::workflow::run::{ChartDescriptor, Document};

/// Render a document as Markdown: header, table of contents, sections with
/// their charts, then the chart appendix.
pub fn render_markdown(document: &Document, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# {}\n", document.title);
    let _ = writeln!(
        out,
        "**生成时间**: {}  ",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "**报告类型**: {}\n", document.report_kind);

    out.push_str("## 目录\n\n");
    for (i, section) in document.sections.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, section.title);
    }
    out.push('\n');

    for section in &document.sections {
        let _ = writeln!(out, "## {}\n", section.title);
        let _ = writeln!(out, "{}\n", section.body.trim_end());
        for chart in &section.charts {
            write_chart(&mut out, chart);
        }
    }

    if !document.appendix.is_empty() {
        out.push_str("## 附录：图表\n\n");
        for chart in &document.appendix {
            write_chart(&mut out, chart);
        }
    }

    out
}

fn write_chart(out: &mut String, chart: &ChartDescriptor) {
    let _ = writeln!(out, "> **[{}] {}**  ", chart.chart_type, chart.title);
    let _ = writeln!(out, "> {}", chart.description);
    if !chart.data_concept.is_empty() {
        let _ = writeln!(out, ">  ");
        let _ = writeln!(out, "> 数据: {}", chart.data_concept);
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tests::sample_document;

    #[test]
    fn test_markdown_layout() {
        let md = render_markdown(&sample_document(), Utc::now());

        assert!(md.starts_with("# 边缘计算发展报告\n"));
        assert!(md.contains("## 目录\n\n1. 边缘计算概述\n2. 结论与展望\n"));
        assert!(md.contains("> **[bar] 部署规模**"));
        assert!(md.contains("## 附录：图表"));

        let overview = md.find("## 边缘计算概述").unwrap();
        let conclusion = md.find("## 结论与展望").unwrap();
        let appendix = md.find("## 附录").unwrap();
        assert!(overview < conclusion && conclusion < appendix);
    }

    #[test]
    fn test_no_appendix_without_unattached_charts() {
        let mut document = sample_document();
        document.appendix.clear();
        let md = render_markdown(&document, Utc::now());
        assert!(!md.contains("附录"));
    }
}
