//! Separation of inline "thinking" markup from visible answer text.

use serde::{Deserialize, Serialize};

const MARKDOWN_THINKING_HEADING: &str = "### Thinking";
const MARKDOWN_RESPONSE_HEADING: &str = "### Response";

/// Tag pairs searched in order. The markdown heading convention is handled after them.
const TAG_PAIRS: &[(&str, &str)] = &[
    ("<thinking>", "</thinking>"),
    ("<think>", "</think>"),
    ("<thought>", "</thought>"),
    ("<reasoning>", "</reasoning>"),
    ("[THINKING]", "[/THINKING]"),
    ("\u{E000}", "\u{E001}"),
    ("<seed:think>", "</seed:think>"),
];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedThinking {
    pub thinking: String,
    pub content: String,
}

impl ExtractedThinking {
    pub fn thinking(&self) -> Option<&str> {
        if self.thinking.is_empty() {
            None
        } else {
            Some(self.thinking.as_str())
        }
    }
}

/// Splits `text` into thinking and visible content.
///
/// Every pattern is applied in order, collecting all of its matches before stripping
/// them. Passes repeat until nothing matches, so running the extractor on its own
/// `content` output yields no thinking and the same content.
pub fn extract_thinking(text: &str) -> ExtractedThinking {
    let mut content = text.to_string();
    let mut captures: Vec<String> = Vec::new();
    let mut changed = false;

    loop {
        let mut pass_changed = false;
        for (open, close) in TAG_PAIRS {
            pass_changed |= strip_tag_pair(&mut content, open, close, &mut captures);
        }
        pass_changed |= strip_markdown_thinking(&mut content, &mut captures);
        pass_changed |= strip_stray_response_heading(&mut content);

        if !pass_changed {
            break;
        }
        changed = true;
    }

    if !changed {
        return ExtractedThinking {
            thinking: String::new(),
            content,
        };
    }

    ExtractedThinking {
        thinking: captures.join("\n\n"),
        content: content.trim().to_string(),
    }
}

fn push_capture(captures: &mut Vec<String>, captured: &str) {
    let captured = captured.trim();
    if !captured.is_empty() {
        captures.push(captured.to_string());
    }
}

fn strip_tag_pair(
    content: &mut String,
    open: &str,
    close: &str,
    captures: &mut Vec<String>,
) -> bool {
    let mut spans = Vec::new();
    let mut cursor = 0;
    while let Some(start) = content[cursor..].find(open).map(|offset| cursor + offset) {
        let inner_start = start + open.len();
        let Some(inner_end) = content[inner_start..]
            .find(close)
            .map(|offset| inner_start + offset)
        else {
            break;
        };
        let end = inner_end + close.len();
        push_capture(captures, &content[inner_start..inner_end]);
        spans.push((start, end));
        cursor = end;
    }

    remove_spans(content, &spans)
}

fn strip_markdown_thinking(content: &mut String, captures: &mut Vec<String>) -> bool {
    let mut spans = Vec::new();
    let mut cursor = 0;
    while let Some(start) = content[cursor..]
        .find(MARKDOWN_THINKING_HEADING)
        .map(|offset| cursor + offset)
    {
        let inner_start = start + MARKDOWN_THINKING_HEADING.len();
        let end = content[inner_start..]
            .find(MARKDOWN_RESPONSE_HEADING)
            .map(|offset| inner_start + offset)
            .unwrap_or(content.len());
        push_capture(captures, &content[inner_start..end]);
        spans.push((start, end));
        cursor = end;
    }

    remove_spans(content, &spans)
}

fn strip_stray_response_heading(content: &mut String) -> bool {
    if !content.contains(MARKDOWN_RESPONSE_HEADING) {
        return false;
    }
    *content = content.replace(MARKDOWN_RESPONSE_HEADING, "");
    true
}

fn remove_spans(content: &mut String, spans: &[(usize, usize)]) -> bool {
    if spans.is_empty() {
        return false;
    }
    let mut remaining = String::with_capacity(content.len());
    let mut cursor = 0;
    for (start, end) in spans {
        remaining.push_str(&content[cursor..*start]);
        cursor = *end;
    }
    remaining.push_str(&content[cursor..]);
    *content = remaining;
    true
}
