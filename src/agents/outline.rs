//! Outline Agent
//!
//! Asks the backend for a numbered list of section titles and turns it into
//! a usable outline: numbering stripped, noise lines dropped, length capped,
//! introduction and conclusion guaranteed.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Agent, AgentError, RunContext, StageInput, StageOutput};
use crate::ai::provider::{CompletionRequest, PromptKind, SharedProvider};
use crate::config::AgentsConfig;
use crate::constants::agents as agent_constants;
use crate::workflow::run::{ReportKind, StageName};

const INTRO_MARKERS: [&str; 4] = ["引言", "概述", "导论", "introduction"];
const CONCLUSION_MARKERS: [&str; 4] = ["结论", "总结", "展望", "conclusion"];

pub struct OutlineAgent {
    provider: SharedProvider,
    min_sections: usize,
    max_sections: usize,
}

impl OutlineAgent {
    pub fn new(provider: SharedProvider, config: &AgentsConfig) -> Self {
        Self {
            provider,
            min_sections: config.min_sections,
            max_sections: config.max_sections,
        }
    }

    fn prompt(topic: &str, kind: ReportKind) -> String {
        let requirements = match kind {
            ReportKind::Research => {
                "1. 覆盖引言、文献综述、研究方法、分析与结论\n\
                 2. 章节标题具体明确\n\
                 3. 层次清晰，适合研究报告"
            }
            ReportKind::Business => {
                "1. 覆盖执行摘要、市场分析、竞争格局与策略建议\n\
                 2. 每个章节对决策者有直接价值\n\
                 3. 包含数据分析与可行性评估"
            }
            ReportKind::Technical => {
                "1. 覆盖技术背景、架构设计、实现方案与测试验证\n\
                 2. 每个章节有技术深度\n\
                 3. 便于技术团队理解和落地"
            }
            ReportKind::Academic => {
                "1. 覆盖摘要、引言、相关工作、方法、实验与结论\n\
                 2. 符合学术论文的标准结构\n\
                 3. 适合期刊或会议投稿"
            }
        };

        format!(
            "请为{kind}报告主题 \"{topic}\" 设计大纲。\n\n要求：\n{requirements}\n\n\
             请以数字列表输出，每行一个章节标题，不要输出其他内容。",
            kind = kind_label(kind),
        )
    }
}

fn kind_label(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Research => "研究",
        ReportKind::Business => "商业",
        ReportKind::Technical => "技术",
        ReportKind::Academic => "学术",
    }
}

/// Parse a numbered list into section titles, capped at `max_sections`
pub fn parse_outline(response: &str, max_sections: usize) -> Vec<String> {
    response
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| {
                    c.is_ascii_digit() || matches!(c, '.' | '-' | ' ' | '*' | '#' | '、' | ')')
                })
                .trim()
        })
        .filter(|line| line.chars().count() > agent_constants::MIN_TITLE_CHARS)
        .take(max_sections)
        .map(str::to_string)
        .collect()
}

/// Fallback outline when the backend's list is too short
pub fn default_outline(topic: &str) -> Vec<String> {
    vec![
        format!("{}概述", topic),
        format!("{}的背景与意义", topic),
        format!("{}的现状分析", topic),
        format!("{}的关键技术与方法", topic),
        format!("{}的应用案例", topic),
        format!("{}面临的挑战", topic),
        format!("{}的发展趋势", topic),
        "结论与建议".to_string(),
    ]
}

fn mentions_any(title: &str, markers: &[&str]) -> bool {
    let lower = title.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

/// Ensure the outline opens with an introduction and closes with a conclusion
///
/// The result never exceeds `max_sections`; middle sections give way first.
fn complete_outline(
    mut outline: Vec<String>,
    topic: &str,
    min_sections: usize,
    max_sections: usize,
) -> Vec<String> {
    if outline.len() < min_sections {
        outline = default_outline(topic);
    } else {
        if !outline.iter().any(|t| mentions_any(t, &INTRO_MARKERS)) {
            outline.insert(0, format!("{}概述", topic));
        }
        if !outline.iter().any(|t| mentions_any(t, &CONCLUSION_MARKERS)) {
            outline.push("结论与展望".to_string());
        }
    }

    if outline.len() > max_sections {
        let last = outline.pop();
        outline.truncate(max_sections.saturating_sub(1));
        if max_sections > 1 {
            outline.extend(last);
        }
    }
    outline
}

#[async_trait]
impl Agent for OutlineAgent {
    fn stage(&self) -> StageName {
        StageName::Outline
    }

    fn name(&self) -> &str {
        "outline"
    }

    async fn invoke(&self, ctx: &RunContext, _input: StageInput) -> Result<StageOutput, AgentError> {
        let topic = &ctx.config.topic;
        let request = CompletionRequest::new(
            PromptKind::Outline,
            Self::prompt(topic, ctx.config.report_kind),
        )
        .with_system("你是一名资深的报告策划编辑。")
        .with_max_tokens(800);

        let completion = self.provider.complete(request).await?;
        let parsed = parse_outline(&completion.text, self.max_sections);
        if parsed.len() < self.min_sections {
            warn!(
                run = %ctx.run_id,
                parsed = parsed.len(),
                "Outline too short, using default outline"
            );
        }

        let outline = complete_outline(parsed, topic, self.min_sections, self.max_sections);
        info!(run = %ctx.run_id, sections = outline.len(), "Outline generated");
        Ok(StageOutput::Outline(outline))
    }
}
