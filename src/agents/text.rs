//! Text clean-up shared by the agents.

use regex::Regex;
use std::sync::LazyLock;

static CJK_ASCII_PUNCT: LazyLock<Regex> = LazyLock::new(|| {
    // ASCII punctuation directly after a CJK character
    Regex::new(r"(\p{Han})\s*([,;:!?])\s*").expect("static regex")
});

static FULLWIDTH_SPACING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*([，；：、！？])\s*").expect("static regex"));

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([。！？])\s*").expect("static regex"));

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static regex"));

/// Collapse every run of whitespace (newlines included) into one space
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Break text into paragraphs at sentence ends (`。！？`)
pub fn split_paragraphs(text: &str) -> String {
    let marked = SENTENCE_END.replace_all(text, "$1\n\n");
    marked
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Normalise punctuation and whitespace in Chinese prose without touching
/// numbers or Latin text
pub fn clean_punctuation(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    let widened = CJK_ASCII_PUNCT.replace_all(&collapsed, |caps: &regex::Captures| {
        let mark = match &caps[2] {
            "," => '，',
            ";" => '；',
            ":" => '：',
            "!" => '！',
            _ => '？',
        };
        format!("{}{}", &caps[1], mark)
    });
    FULLWIDTH_SPACING.replace_all(&widened, "$1").into_owned()
}

/// Split paragraphs longer than `max_chars` at sentence boundaries into
/// chunks of roughly `target_chars`
pub fn resplit_long_paragraphs(text: &str, max_chars: usize, target_chars: usize) -> String {
    let mut out: Vec<String> = Vec::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.chars().count() <= max_chars {
            out.push(paragraph.to_string());
            continue;
        }

        let mut current = String::new();
        for sentence in sentences(paragraph) {
            if !current.is_empty()
                && current.chars().count() + sentence.chars().count() > target_chars
            {
                out.push(std::mem::take(&mut current));
            }
            current.push_str(sentence);
        }
        if !current.trim().is_empty() {
            out.push(current.trim().to_string());
        }
    }

    out.join("\n\n")
}

/// Sentences including their terminator
fn sentences(text: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '。' | '！' | '？') {
            let end = i + c.len_utf8();
            result.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        result.push(&text[start..]);
    }
    result
}

/// First `max` characters (not bytes)
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Body of a fenced code block if the response is wrapped in one
pub fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text.trim(), |m| m.as_str())
}
