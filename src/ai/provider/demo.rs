//! Demo Provider
//!
//! Offline provider returning canned text keyed on the prompt kind, so the
//! whole pipeline can run without credentials or network access.

use async_trait::async_trait;
use std::time::Duration;

use super::{Completion, CompletionProvider, CompletionRequest, LlmError, PromptKind, TokenUsage};

const DEMO_OUTLINE: [&str; 7] = [
    "研究背景与意义",
    "国内外发展现状",
    "核心概念与理论基础",
    "关键技术与方法分析",
    "典型应用案例",
    "面临的挑战与对策",
    "结论与展望",
];

#[derive(Debug, Clone, Default)]
pub struct DemoProvider {
    latency: Duration,
}

impl DemoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long per request to mimic a remote backend
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn respond(request: &CompletionRequest) -> String {
        match request.kind {
            PromptKind::Outline => DEMO_OUTLINE
                .iter()
                .enumerate()
                .map(|(i, title)| format!("{}. {}", i + 1, title))
                .collect::<Vec<_>>()
                .join("\n"),
            PromptKind::Content => {
                let section = quoted(&request.prompt, 1).unwrap_or("本章节");
                let topic = quoted(&request.prompt, 0).unwrap_or("该主题");
                format!(
                    "{section}是理解{topic}的重要切入点。本节首先梳理相关背景和基本概念，明确讨论范围。\
                     随后结合行业实践，从技术、市场与政策三个角度分析当前的发展状况。\
                     最后总结主要发现，并指出后续章节将进一步展开的问题。"
                )
            }
            PromptKind::Polish => between(&request.prompt, "<<<", ">>>")
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            PromptKind::Chart => {
                let section = quoted(&request.prompt, 0).unwrap_or("本章节");
                format!(
                    r#"[{{"chart_type":"bar","title":"{section}关键指标对比","description":"对比{section}中涉及的主要指标","data_concept":"各类别指标数值","priority":3}}]"#
                )
            }
        }
    }
}

#[async_trait]
impl CompletionProvider for DemoProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let text = Self::respond(&request);
        Ok(Completion {
            usage: TokenUsage {
                input_tokens: request.prompt.chars().count() as u32,
                output_tokens: text.chars().count() as u32,
            },
            text,
            elapsed: self.latency,
            model: "demo".to_string(),
        })
    }

    fn name(&self) -> &str {
        "demo"
    }

    fn model(&self) -> &str {
        "demo"
    }
}

/// The `n`th `"..."` segment of a prompt
fn quoted(text: &str, n: usize) -> Option<&str> {
    text.split('"').skip(1).step_by(2).nth(n)
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outline_is_numbered_list() {
        let provider = DemoProvider::new();
        let out = provider
            .complete(CompletionRequest::new(PromptKind::Outline, "outline please"))
            .await
            .unwrap();
        assert_eq!(out.text.lines().count(), 7);
        assert!(out.text.starts_with("1. "));
    }

    #[tokio::test]
    async fn test_polish_echoes_delimited_text() {
        let provider = DemoProvider::new();
        let out = provider
            .complete(CompletionRequest::new(
                PromptKind::Polish,
                "润色：\n<<<\n原始内容。\n>>>\n要求",
            ))
            .await
            .unwrap();
        assert_eq!(out.text, "原始内容。");
    }

    #[tokio::test]
    async fn test_content_mentions_section() {
        let provider = DemoProvider::new();
        let out = provider
            .complete(CompletionRequest::new(
                PromptKind::Content,
                r#"主题 "量子计算" 章节 "发展现状""#,
            ))
            .await
            .unwrap();
        assert!(out.text.starts_with("发展现状是理解量子计算"));
    }

    #[test]
    fn test_quoted_segments() {
        assert_eq!(quoted(r#"a "x" b "y""#, 0), Some("x"));
        assert_eq!(quoted(r#"a "x" b "y""#, 1), Some("y"));
        assert_eq!(quoted("none", 0), None);
    }
}
