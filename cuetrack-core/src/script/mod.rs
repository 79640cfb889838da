//! Script model.
//!
//! A [`Script`] is immutable once parsed. Loading new text builds a fresh
//! `Script` and replaces the old one wholesale; nothing is edited in place.

pub mod mapper;
pub mod markup;

use serde::Serialize;
use tracing::warn;

use crate::error::Result;

pub use mapper::PositionMapper;
pub use markup::{Attachment, MarkupIssue};

/// One entry of the display script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DisplayToken {
    #[serde(rename_all = "camelCase")]
    Word {
        text: String,
        display_index: usize,
        original_index: usize,
    },
    #[serde(rename_all = "camelCase")]
    Placeholder {
        /// `[name]` as rendered.
        text: String,
        attachment: usize,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    words: Vec<String>,
    attachments: Vec<Attachment>,
    issues: Vec<MarkupIssue>,
    display: Vec<DisplayToken>,
    mapper: PositionMapper,
}

impl Script {
    /// Parse raw script text. Malformed attachment markup is kept as readable
    /// text and recorded in [`Script::issues`].
    pub fn parse(text: &str) -> Self {
        let parsed = markup::parse(text);
        for issue in &parsed.issues {
            warn!(%issue, "malformed attachment markup");
        }

        let mapper = PositionMapper::new(parsed.words.len(), &parsed.attachments);
        let display = build_display(&parsed.words, &parsed.attachments, &mapper);

        Self {
            words: parsed.words,
            attachments: parsed.attachments,
            issues: parsed.issues,
            display,
            mapper,
        }
    }

    /// Like [`Script::parse`], but fails on the first malformed attachment.
    pub fn parse_strict(text: &str) -> Result<Self> {
        let script = Self::parse(text);
        match script.issues.first() {
            Some(issue) => Err(issue.clone().into()),
            None => Ok(script),
        }
    }

    /// Original words, attachment tokens included.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn issues(&self) -> &[MarkupIssue] {
        &self.issues
    }

    /// The display script: readable words with one placeholder per attachment.
    pub fn display(&self) -> &[DisplayToken] {
        &self.display
    }

    pub fn mapper(&self) -> &PositionMapper {
        &self.mapper
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn attachment_at(&self, original_index: usize) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.contains(original_index))
    }

    /// Readable words paired with their original index.
    pub fn readable_words(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.words
            .iter()
            .enumerate()
            .filter(|(i, _)| self.mapper.to_display_index(*i).is_some())
            .map(|(i, w)| (i, w.as_str()))
    }
}

fn build_display(
    words: &[String],
    attachments: &[Attachment],
    mapper: &PositionMapper,
) -> Vec<DisplayToken> {
    let mut display = Vec::with_capacity(words.len());
    let mut next_attachment = 0usize;

    for (original_index, word) in words.iter().enumerate() {
        match mapper.to_display_index(original_index) {
            Some(display_index) => display.push(DisplayToken::Word {
                text: word.clone(),
                display_index,
                original_index,
            }),
            None => {
                let Some(att) = attachments.get(next_attachment) else {
                    continue;
                };
                if att.start_index == original_index {
                    display.push(DisplayToken::Placeholder {
                        text: att.placeholder(),
                        attachment: next_attachment,
                    });
                    next_attachment += 1;
                }
            }
        }
    }

    display
}
