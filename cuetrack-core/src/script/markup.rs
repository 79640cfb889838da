//! Script markup tokenizer.
//!
//! ## Grammar
//!
//! ```text
//! Hello [[img: a sunset photo]] world
//!       ^^^^^^^^^^^^^^^^^^^^^^^
//!       attachment "img", content "a sunset photo"
//! ```
//!
//! An attachment opens with `[[`, carries a name terminated by `:`, and closes
//! at the next `]]`. Without a `:` the whole inner text is the name. Word
//! indices are counted over whitespace-delimited tokens of the *raw* text, so
//! the marker tokens themselves belong to the attachment range.
//!
//! Malformed markup never fails the parse. An opener without a close stays
//! literal text, and so does the outer opener of a nested pair.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const OPEN_MARKER: &str = "[[";
pub const CLOSE_MARKER: &str = "]]";
pub const NAME_SEPARATOR: char = ':';

/// Placeholder name used when the markup carries an empty name.
const UNNAMED_ATTACHMENT: &str = "attachment";

/// A script region that is shown to the reader but never read aloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub content: String,
    /// First original-word index covered (inclusive).
    pub start_index: usize,
    /// One past the last original-word index covered.
    pub end_index: usize,
}

impl Attachment {
    pub fn contains(&self, original_index: usize) -> bool {
        (self.start_index..self.end_index).contains(&original_index)
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.end_index <= self.start_index
    }

    /// The single token shown in place of the attachment words.
    pub fn placeholder(&self) -> String {
        format!("[{}]", self.name)
    }
}

/// Markup that could not be turned into an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupIssue {
    #[error("attachment opened at byte {offset} is never closed")]
    Unterminated { offset: usize },

    #[error("attachment opened at byte {outer} contains another opener at byte {inner}")]
    Nested { outer: usize, inner: usize },

    #[error("attachment `{name}` only covers words already inside the previous attachment")]
    Overlapping { name: String },

    #[error("attachment `{name}` is glued to `{text}`, which will not be read")]
    GluedToWord { name: String, text: String },
}

/// Output of [`parse`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMarkup {
    pub words: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub issues: Vec<MarkupIssue>,
}

/// A well-formed `[[ … ]]` region located by byte offsets.
#[derive(Debug)]
struct Region {
    open: usize,
    close_end: usize,
    name: String,
    content: String,
}

/// Split `text` into original words and extract attachment ranges.
pub fn parse(text: &str) -> ParsedMarkup {
    let spans = token_spans(text);
    let words = spans
        .iter()
        .map(|&(start, end)| text[start..end].to_string())
        .collect();

    let (regions, mut issues) = find_regions(text);

    let mut attachments: Vec<Attachment> = Vec::with_capacity(regions.len());
    for region in regions {
        // First token ending after the opener, one past the last token starting
        // before the closer.
        let mut start_index = spans.partition_point(|&(_, end)| end <= region.open);
        let end_index = spans.partition_point(|&(start, _)| start < region.close_end);

        if let Some(prev) = attachments.last() {
            start_index = start_index.max(prev.end_index);
        }
        if start_index >= end_index {
            issues.push(MarkupIssue::Overlapping { name: region.name });
            continue;
        }

        let before = &text[spans[start_index].0.min(region.open)..region.open];
        let after = &text[region.close_end..spans[end_index - 1].1.max(region.close_end)];
        for glued in [glued_before(before), glued_after(after)] {
            if let Some(text) = glued {
                issues.push(MarkupIssue::GluedToWord {
                    name: region.name.clone(),
                    text: text.to_string(),
                });
            }
        }

        attachments.push(Attachment {
            name: region.name,
            content: region.content,
            start_index,
            end_index,
        });
    }

    ParsedMarkup {
        words,
        attachments,
        issues,
    }
}

/// Readable text sharing a token with the opener, ignoring a preceding closer.
fn glued_before(fragment: &str) -> Option<&str> {
    let tail = match fragment.rfind(CLOSE_MARKER) {
        Some(at) => &fragment[at + CLOSE_MARKER.len()..],
        None => fragment,
    };
    tail.chars().any(char::is_alphanumeric).then_some(tail)
}

/// Readable text sharing a token with the closer, up to a following opener.
fn glued_after(fragment: &str) -> Option<&str> {
    let head = match fragment.find(OPEN_MARKER) {
        Some(at) => &fragment[..at],
        None => fragment,
    };
    head.chars().any(char::is_alphanumeric).then_some(head)
}

/// Byte spans of whitespace-delimited tokens; identical to `split_whitespace`.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

fn find_regions(text: &str) -> (Vec<Region>, Vec<MarkupIssue>) {
    let mut regions = Vec::new();
    let mut issues = Vec::new();
    let mut cursor = 0usize;

    while let Some(rel) = text[cursor..].find(OPEN_MARKER) {
        let open = cursor + rel;
        let body_start = open + OPEN_MARKER.len();

        let Some(close_rel) = text[body_start..].find(CLOSE_MARKER) else {
            issues.push(MarkupIssue::Unterminated { offset: open });
            break;
        };
        let close = body_start + close_rel;

        if let Some(inner_rel) = text[body_start..close].find(OPEN_MARKER) {
            let inner = body_start + inner_rel;
            issues.push(MarkupIssue::Nested { outer: open, inner });
            cursor = inner;
            continue;
        }

        let body = &text[body_start..close];
        let (name, content) = match body.split_once(NAME_SEPARATOR) {
            Some((name, content)) => (name, content),
            None => (body, ""),
        };
        let name = name.trim();

        regions.push(Region {
            open,
            close_end: close + CLOSE_MARKER.len(),
            name: if name.is_empty() {
                UNNAMED_ATTACHMENT.to_string()
            } else {
                name.to_string()
            },
            content: content.split_whitespace().collect::<Vec<_>>().join(" "),
        });
        cursor = close + CLOSE_MARKER.len();
    }

    (regions, issues)
}
