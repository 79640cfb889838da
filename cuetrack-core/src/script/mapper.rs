//! Original ↔ display coordinate mapping.
//!
//! The *original* space indexes every whitespace token of the raw script,
//! attachment tokens included. The *display* space indexes readable words
//! only; each attachment is drawn as a placeholder between readable words and
//! has no display index of its own.
//!
//! ```text
//! original  Hello [[img: a  sunset photo]] world
//!             0     1    2    3      4       5
//! display   Hello      [img]                world
//!             0                               1
//! ```
//!
//! All lookups are table-driven; tables are built once per parsed script.

use std::ops::Range;

use super::markup::Attachment;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionMapper {
    /// `None` for words inside an attachment.
    display_of_original: Vec<Option<usize>>,
    original_of_display: Vec<usize>,
    /// Attachment ranges in script order, non-overlapping.
    attachment_ranges: Vec<Range<usize>>,
}

impl PositionMapper {
    pub fn new(original_len: usize, attachments: &[Attachment]) -> Self {
        let attachment_ranges: Vec<Range<usize>> = attachments
            .iter()
            .map(|a| a.start_index.min(original_len)..a.end_index.min(original_len))
            .filter(|r| !r.is_empty())
            .collect();

        let mut display_of_original = vec![None; original_len];
        let mut original_of_display = Vec::with_capacity(original_len);
        let mut ranges = attachment_ranges.iter().peekable();

        for (original, slot) in display_of_original.iter_mut().enumerate() {
            while ranges.next_if(|r| r.end <= original).is_some() {}
            let hidden = ranges.peek().is_some_and(|r| r.contains(&original));
            if !hidden {
                *slot = Some(original_of_display.len());
                original_of_display.push(original);
            }
        }

        Self {
            display_of_original,
            original_of_display,
            attachment_ranges,
        }
    }

    pub fn original_len(&self) -> usize {
        self.display_of_original.len()
    }

    /// Number of readable words.
    pub fn display_len(&self) -> usize {
        self.original_of_display.len()
    }

    /// Display index of `original_index`, or `None` when that word is inside
    /// an attachment. Indices at or past the end clamp to [`Self::display_len`].
    pub fn to_display_index(&self, original_index: usize) -> Option<usize> {
        match self.display_of_original.get(original_index) {
            Some(slot) => *slot,
            None => Some(self.display_len()),
        }
    }

    /// Original index of the `display_index`-th readable word. Past the end
    /// maps to the original length.
    pub fn original_index_of(&self, display_index: usize) -> usize {
        self.original_of_display
            .get(display_index)
            .copied()
            .unwrap_or_else(|| self.original_len())
    }

    /// Skip past the attachment containing `original_index`, if any.
    pub fn next_valid_original_index(&self, original_index: usize) -> usize {
        match self.attachment_range_containing(original_index) {
            Some(range) => range.end,
            None => original_index,
        }
    }

    /// Display position for a cursor that may sit inside an attachment.
    ///
    /// Repeats the skip so back-to-back attachments resolve to the first
    /// readable word after all of them.
    pub fn resolve_display_position(&self, original_index: usize) -> usize {
        let mut index = original_index;
        loop {
            if let Some(display) = self.to_display_index(index) {
                return display;
            }
            index = self.next_valid_original_index(index);
        }
    }

    pub fn is_inside_attachment(&self, original_index: usize) -> bool {
        self.attachment_range_containing(original_index).is_some()
    }

    fn attachment_range_containing(&self, original_index: usize) -> Option<&Range<usize>> {
        let idx = self
            .attachment_ranges
            .partition_point(|r| r.end <= original_index);
        self.attachment_ranges
            .get(idx)
            .filter(|r| r.contains(&original_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::markup;

    fn mapper_for(text: &str) -> (PositionMapper, Vec<Attachment>) {
        let parsed = markup::parse(text);
        (
            PositionMapper::new(parsed.words.len(), &parsed.attachments),
            parsed.attachments,
        )
    }

    #[test]
    fn plain_script_maps_identically() {
        let (mapper, _) = mapper_for("Welcome to our presentation");
        for i in 0..4 {
            assert_eq!(mapper.to_display_index(i), Some(i));
            assert_eq!(mapper.original_index_of(i), i);
            assert_eq!(mapper.next_valid_original_index(i), i);
        }
    }

    #[test]
    fn attachment_positions_are_not_displayable() {
        let (mapper, _) = mapper_for("Hello [[img: a sunset photo]] world");
        assert_eq!(mapper.to_display_index(0), Some(0));
        assert_eq!(mapper.to_display_index(1), None);
        assert_eq!(mapper.next_valid_original_index(1), 5);
        assert_eq!(mapper.to_display_index(5), Some(1));
        assert_eq!(mapper.display_len(), 2);
    }

    #[test]
    fn every_attachment_word_skips_to_its_end() {
        let (mapper, attachments) = mapper_for("a [[x: 1 2]] b c [[y: 3]] d");
        for att in &attachments {
            for i in att.start_index..att.end_index {
                assert_eq!(mapper.to_display_index(i), None, "index {i}");
                assert_eq!(mapper.next_valid_original_index(i), att.end_index);
            }
        }
    }

    #[test]
    fn display_round_trip_for_readable_words() {
        let (mapper, _) = mapper_for("one [[a: x y]] two three [[b]] four [[c: z]]");
        for d in 0..mapper.display_len() {
            let original = mapper.original_index_of(d);
            assert!(!mapper.is_inside_attachment(original));
            assert_eq!(mapper.to_display_index(original), Some(d));
        }
    }

    #[test]
    fn past_the_end_clamps() {
        let (mapper, _) = mapper_for("Hello [[img: a sunset photo]] world");
        assert_eq!(mapper.to_display_index(6), Some(2));
        assert_eq!(mapper.to_display_index(100), Some(2));
        assert_eq!(mapper.original_index_of(2), 6);
        assert_eq!(mapper.next_valid_original_index(100), 100);
    }

    #[test]
    fn adjacent_attachments_resolve_to_next_readable_word() {
        let (mapper, _) = mapper_for("start [[a: one]] [[b: two]] end");
        // tokens: start, [[a:, one]], [[b:, two]], end
        assert_eq!(mapper.next_valid_original_index(1), 3);
        assert_eq!(mapper.to_display_index(3), None);
        assert_eq!(mapper.resolve_display_position(1), 1);
        assert_eq!(mapper.original_index_of(1), 5);
    }

    #[test]
    fn trailing_attachment_resolves_to_display_end() {
        let (mapper, _) = mapper_for("last words [[outro: thanks]]");
        assert_eq!(mapper.resolve_display_position(2), 2);
        assert_eq!(mapper.display_len(), 2);
    }
}
