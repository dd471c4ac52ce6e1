//! Chart Agent
//!
//! Reads each section and asks the backend which charts would illustrate
//! it. Responses are expected as a JSON array; anything else falls back to
//! chart-type keywords found in the text. The highest-priority charts are
//! kept, each tied to its section by title.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::text::{strip_code_fence, truncate_chars};
use super::{Agent, AgentError, RunContext, StageInput, StageOutput};
use crate::ai::provider::{CompletionRequest, PromptKind, SharedProvider};
use crate::config::AgentsConfig;
use crate::constants::agents as agent_constants;
use crate::workflow::run::{ChartDescriptor, ChartType, StageName};

const KEYWORDS: [(&str, ChartType); 6] = [
    ("柱状图", ChartType::Bar),
    ("条形图", ChartType::Bar),
    ("折线图", ChartType::Line),
    ("饼图", ChartType::Pie),
    ("散点图", ChartType::Scatter),
    ("表格", ChartType::Table),
];

const DEFAULT_PRIORITY: u8 = 3;

/// Body characters sent per section
const SECTION_EXCERPT_CHARS: usize = 1500;

pub struct ChartAgent {
    provider: SharedProvider,
    max_charts: usize,
}

#[derive(Debug, Deserialize)]
struct RawChart {
    #[serde(default)]
    chart_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    data_concept: String,
    #[serde(default)]
    priority: Option<i64>,
}

impl RawChart {
    fn into_descriptor(self, section: &str) -> Option<ChartDescriptor> {
        if self.title.trim().is_empty() || self.description.trim().is_empty() {
            return None;
        }
        let chart_type = self.chart_type.parse::<ChartType>().ok()?;
        Some(ChartDescriptor {
            chart_type,
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            data_concept: self.data_concept.trim().to_string(),
            priority: self
                .priority
                .map_or(DEFAULT_PRIORITY, |p| p.clamp(1, 5) as u8),
            section: Some(section.to_string()),
        })
    }
}

/// Parse one section's chart suggestions
pub fn parse_chart_response(response: &str, section: &str) -> Vec<ChartDescriptor> {
    match serde_json::from_str::<Vec<RawChart>>(strip_code_fence(response)) {
        Ok(raw) => raw
            .into_iter()
            .filter_map(|chart| chart.into_descriptor(section))
            .collect(),
        Err(_) => keyword_charts(response, section),
    }
}

fn keyword_charts(text: &str, section: &str) -> Vec<ChartDescriptor> {
    KEYWORDS
        .iter()
        .filter(|(keyword, _)| text.contains(keyword))
        .take(agent_constants::MAX_KEYWORD_CHARTS)
        .map(|(keyword, chart_type)| ChartDescriptor {
            chart_type: *chart_type,
            title: format!("{}{}", section, keyword),
            description: format!("根据“{}”内容整理的{}", section, keyword),
            data_concept: String::new(),
            priority: DEFAULT_PRIORITY,
            section: Some(section.to_string()),
        })
        .collect()
}

/// Highest priority first, ties in section order, capped
fn select_top(mut charts: Vec<ChartDescriptor>, max: usize) -> Vec<ChartDescriptor> {
    charts.sort_by(|a, b| b.priority.cmp(&a.priority));
    charts.truncate(max);
    charts
}

impl ChartAgent {
    pub fn new(provider: SharedProvider, config: &AgentsConfig) -> Self {
        Self {
            provider,
            max_charts: config.max_charts,
        }
    }

    fn prompt(title: &str, body: &str) -> String {
        format!(
            "请分析章节 \"{title}\" 的内容，找出适合用图表展示的数据或概念。\n\n\
             章节内容：\n{excerpt}\n\n\
             以 JSON 数组返回，每个元素包含：\n\
             - chart_type: bar/line/pie/scatter/histogram/box/heatmap/table\n\
             - title: 图表标题\n\
             - description: 图表说明\n\
             - data_concept: 所需数据\n\
             - priority: 1-5，5 最高\n\n\
             没有合适的图表时返回 []。",
            excerpt = truncate_chars(body, SECTION_EXCERPT_CHARS),
        )
    }
}

#[async_trait]
impl Agent for ChartAgent {
    fn stage(&self) -> StageName {
        StageName::Chart
    }

    fn name(&self) -> &str {
        "chart"
    }

    async fn invoke(&self, ctx: &RunContext, _input: StageInput) -> Result<StageOutput, AgentError> {
        let (titles, bodies) = ctx.require_sections(self.name())?;
        let mut charts = Vec::new();

        for (title, body) in titles.iter().zip(bodies) {
            if ctx.is_cancelled() {
                return Err(AgentError::cancelled());
            }

            let request = CompletionRequest::new(PromptKind::Chart, Self::prompt(title, body))
                .with_max_tokens(800);
            let completion = self.provider.complete(request).await?;
            let found = parse_chart_response(&completion.text, title);
            debug!(run = %ctx.run_id, section = %title, charts = found.len(), "Section analysed");
            charts.extend(found);
        }

        let selected = select_top(charts, self.max_charts);
        info!(run = %ctx.run_id, charts = selected.len(), "Charts selected");
        Ok(StageOutput::Chart(selected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let response = r#"```json
[
  {"chart_type": "line", "title": "增长趋势", "description": "近五年规模", "priority": 5},
  {"chart_type": "flow", "title": "流程", "description": "不支持的类型"},
  {"chart_type": "pie", "title": "", "description": "缺标题"}
]
```"#;
        let charts = parse_chart_response(response, "市场分析");
        assert_eq!(charts.len(), 1);
        assert_eq!(charts[0].chart_type, ChartType::Line);
        assert_eq!(charts[0].priority, 5);
        assert_eq!(charts[0].section.as_deref(), Some("市场分析"));
    }

    #[test]
    fn test_keyword_fallback() {
        let charts = parse_chart_response("建议使用饼图和折线图，另附表格与柱状图", "现状");
        assert_eq!(charts.len(), 3);
        assert_eq!(charts[0].chart_type, ChartType::Bar);
        assert_eq!(charts[1].chart_type, ChartType::Line);
        assert_eq!(charts[2].chart_type, ChartType::Pie);
    }

    #[test]
    fn test_empty_array_means_no_charts() {
        assert!(parse_chart_response("[]", "x").is_empty());
    }

    #[test]
    fn test_priority_clamped_and_defaulted() {
        let charts = parse_chart_response(
            r#"[{"chart_type":"bar","title":"a","description":"b","priority":9},
                {"chart_type":"table","title":"c","description":"d"}]"#,
            "s",
        );
        assert_eq!(charts[0].priority, 5);
        assert_eq!(charts[1].priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_select_top_is_stable() {
        let mk = |title: &str, priority: u8| ChartDescriptor {
            chart_type: ChartType::Bar,
            title: title.to_string(),
            description: "d".to_string(),
            data_concept: String::new(),
            priority,
            section: None,
        };
        let selected = select_top(vec![mk("a", 3), mk("b", 5), mk("c", 3), mk("d", 1)], 3);
        let titles: Vec<&str> = selected.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["b", "a", "c"]);
    }
}
