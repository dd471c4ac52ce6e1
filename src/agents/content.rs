//! Content Agent
//!
//! Writes the body of one section per invocation. The coordinator fans the
//! sections out concurrently; each prompt carries the whole outline with
//! the current section marked so sections stay consistent.

use async_trait::async_trait;
use std::fmt::Write;
use tracing::{debug, warn};

use super::text::{collapse_whitespace, split_paragraphs};
use super::{Agent, AgentError, RunContext, StageInput, StageOutput};
use crate::ai::provider::{CompletionRequest, PromptKind, SharedProvider};
use crate::config::AgentsConfig;
use crate::constants::agents as agent_constants;
use crate::workflow::run::StageName;

pub struct ContentAgent {
    provider: SharedProvider,
    writing_style: String,
}

impl ContentAgent {
    pub fn new(provider: SharedProvider, config: &AgentsConfig) -> Self {
        Self {
            provider,
            writing_style: config.writing_style.clone(),
        }
    }

    fn prompt(
        &self,
        topic: &str,
        outline: &[String],
        index: usize,
        title: &str,
        target_length: usize,
    ) -> String {
        let mut prompt = format!(
            "请为报告主题 \"{topic}\" 撰写章节 \"{title}\" 的正文。\n\n要求：\n\
             1. 内容专业、准确、有深度\n\
             2. 篇幅约 {target_length} 字\n\
             3. 结构清晰，论证严密\n\
             4. 写作风格：{style}\n\n报告大纲：\n",
            style = self.writing_style,
        );
        for (i, section) in outline.iter().enumerate() {
            let marker = if i == index { "（当前章节）" } else { "" };
            let _ = writeln!(prompt, "{}. {}{}", i + 1, section, marker);
        }
        prompt.push_str("\n请与其他章节保持一致，避免重复，只输出正文。");
        prompt
    }
}

/// Collapse whitespace and break into paragraphs at sentence ends
pub(crate) fn post_process(raw: &str) -> String {
    split_paragraphs(&collapse_whitespace(raw))
}

#[async_trait]
impl Agent for ContentAgent {
    fn stage(&self) -> StageName {
        StageName::Content
    }

    fn name(&self) -> &str {
        "content"
    }

    async fn invoke(&self, ctx: &RunContext, input: StageInput) -> Result<StageOutput, AgentError> {
        let StageInput::Section { index, title } = input else {
            return Err(AgentError::permanent(
                "content agent is invoked per section",
            ));
        };

        let outline = ctx.require_outline(self.name())?;
        let target_length = ctx.config.target_length;
        let prompt = self.prompt(&ctx.config.topic, outline, index, &title, target_length);
        let request = CompletionRequest::new(PromptKind::Content, prompt)
            .with_system("你是一名专业的报告撰稿人。");

        let completion = self.provider.complete(request).await?;
        let body = post_process(&completion.text);
        if body.is_empty() {
            return Err(AgentError::transient(format!(
                "empty body for section '{}'",
                title
            )));
        }

        let chars = body.chars().count();
        let target = target_length as f64;
        if (chars as f64) < target * agent_constants::SHORT_BODY_RATIO {
            warn!(run = %ctx.run_id, section = %title, chars, target_length, "Section body is short");
        } else if (chars as f64) > target * agent_constants::LONG_BODY_RATIO {
            warn!(run = %ctx.run_id, section = %title, chars, target_length, "Section body is long");
        }
        debug!(run = %ctx.run_id, index, chars, "Section written");

        Ok(StageOutput::SectionBody { index, body })
    }
}
