//! Polish Agent
//!
//! Revises every section in outline order within one invocation. Each
//! request carries the tail of the previously polished sections as a style
//! reference. Cancellation is checked between sections.

use async_trait::async_trait;
use tracing::{debug, info};

use super::text::{clean_punctuation, resplit_long_paragraphs, split_paragraphs, truncate_chars};
use super::{Agent, AgentError, RunContext, StageInput, StageOutput};
use crate::ai::provider::{CompletionRequest, PromptKind, SharedProvider};
use crate::constants::agents as agent_constants;
use crate::workflow::run::StageName;

pub struct PolishAgent {
    provider: SharedProvider,
}

impl PolishAgent {
    pub fn new(provider: SharedProvider) -> Self {
        Self { provider }
    }

    fn prompt(title: &str, body: &str, previous: &[String]) -> String {
        let mut prompt = format!("请润色以下章节，使其与全文风格一致。\n\n章节标题：{}\n", title);

        if !previous.is_empty() {
            let start = previous
                .len()
                .saturating_sub(agent_constants::STYLE_CONTEXT_SECTIONS);
            let recent = previous[start..].join(" ");
            prompt.push_str("\n前文风格参考：\n");
            prompt.push_str(truncate_chars(&recent, agent_constants::STYLE_CONTEXT_CHARS));
            prompt.push_str("……\n");
        }

        prompt.push_str("\n待润色内容：\n<<<\n");
        prompt.push_str(body);
        prompt.push_str(
            "\n>>>\n\n要求：\n\
             1. 保持原有观点和信息不变\n\
             2. 语句通顺，过渡自然\n\
             3. 避免与前文重复\n\
             4. 术语准确，表达专业\n\n只输出润色后的正文。",
        );
        prompt
    }
}

/// Punctuation clean-up and paragraph breaks
fn basic_clean(text: &str) -> String {
    split_paragraphs(&clean_punctuation(text))
}

fn finish(text: &str) -> String {
    resplit_long_paragraphs(
        &basic_clean(text),
        agent_constants::MAX_PARAGRAPH_CHARS,
        agent_constants::SPLIT_PARAGRAPH_CHARS,
    )
}

#[async_trait]
impl Agent for PolishAgent {
    fn stage(&self) -> StageName {
        StageName::Polish
    }

    fn name(&self) -> &str {
        "polish"
    }

    async fn invoke(&self, ctx: &RunContext, _input: StageInput) -> Result<StageOutput, AgentError> {
        let (titles, bodies) = ctx.require_sections(self.name())?;
        let mut polished: Vec<String> = Vec::with_capacity(bodies.len());

        for (title, body) in titles.iter().zip(bodies) {
            if ctx.is_cancelled() {
                return Err(AgentError::cancelled());
            }

            let cleaned = basic_clean(body);
            let request =
                CompletionRequest::new(PromptKind::Polish, Self::prompt(title, &cleaned, &polished))
                    .with_system("你是一名严谨的中文编辑。")
                    .with_max_tokens(1500);

            let completion = self.provider.complete(request).await?;
            let revised = finish(&completion.text);
            // Empty revisions keep the cleaned original
            polished.push(if revised.is_empty() { finish(&cleaned) } else { revised });
            debug!(run = %ctx.run_id, section = %title, "Section polished");
        }

        info!(run = %ctx.run_id, sections = polished.len(), "Polish complete");
        Ok(StageOutput::Polish(polished))
    }
}
