//! Transcript data model shared by every stage of the pipeline.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Word-level timing reported by the transcriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// A segment exactly as the transcriber produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<WordTiming>,
}

impl RawSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            words: Vec::new(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    Speech,
    /// Synthetic placeholder covering a long pause. Never sent to the LLM.
    Silence,
}

/// A segment of the canonical sequence. `index` is fixed once the refiner
/// has produced the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub kind: SegmentKind,
    pub source_text: String,
    pub translated_text: String,
}

impl Segment {
    pub fn is_silence(&self) -> bool {
        self.kind == SegmentKind::Silence
    }

    pub fn is_translated(&self) -> bool {
        !self.translated_text.is_empty()
    }
}

impl From<&Segment> for RawSegment {
    fn from(segment: &Segment) -> Self {
        RawSegment::new(segment.start, segment.end, segment.source_text.clone())
    }
}

/// Translations keyed by canonical segment index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationResult {
    entries: BTreeMap<usize, String>,
}

impl TranslationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, text: String) {
        self.entries.insert(index, text);
    }

    pub fn remove(&mut self, index: usize) -> Option<String> {
        self.entries.remove(&index)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    /// Overwrites entries with those of `later`; `later` wins on shared indices.
    pub fn overlay(&mut self, later: TranslationResult) {
        self.entries.extend(later.entries);
    }

    /// True when every speech segment inside `range` has an entry.
    pub fn covers(&self, segments: &[Segment], range: Range<usize>) -> bool {
        segments[range]
            .iter()
            .filter(|s| !s.is_silence())
            .all(|s| self.entries.contains_key(&s.index))
    }

    /// Write translations back into the canonical sequence.
    pub fn apply(self, segments: &mut [Segment]) {
        for (index, text) in self.entries {
            if let Some(segment) = segments.get_mut(index) {
                segment.translated_text = text;
            }
        }
    }
}

impl FromIterator<(usize, String)> for TranslationResult {
    fn from_iter<I: IntoIterator<Item = (usize, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Bookkeeping for a range that failed during fallback resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub range: Range<usize>,
    pub cause: FailureKind,
    pub attempt_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech(index: usize) -> Segment {
        Segment {
            index,
            start: index as f64,
            end: index as f64 + 1.0,
            kind: SegmentKind::Speech,
            source_text: format!("s{}", index),
            translated_text: String::new(),
        }
    }

    #[test]
    fn test_overlay_prefers_later_entries() {
        let mut earlier: TranslationResult =
            [(1, "a".to_string()), (2, "b".to_string())].into_iter().collect();
        let later: TranslationResult =
            [(2, "B".to_string()), (3, "C".to_string())].into_iter().collect();

        earlier.overlay(later);

        assert_eq!(earlier.get(1), Some("a"));
        assert_eq!(earlier.get(2), Some("B"));
        assert_eq!(earlier.get(3), Some("C"));
    }

    #[test]
    fn test_covers_ignores_silence() {
        let mut segments: Vec<Segment> = (0..3).map(speech).collect();
        segments[1].kind = SegmentKind::Silence;

        let result: TranslationResult =
            [(0, "x".to_string()), (2, "z".to_string())].into_iter().collect();
        assert!(result.covers(&segments, 0..3));

        let partial: TranslationResult = [(0, "x".to_string())].into_iter().collect();
        assert!(!partial.covers(&segments, 0..3));
    }

    #[test]
    fn test_apply_writes_by_index() {
        let mut segments: Vec<Segment> = (0..3).map(speech).collect();
        let result: TranslationResult = [(2, "two".to_string())].into_iter().collect();

        result.apply(&mut segments);

        assert_eq!(segments[2].translated_text, "two");
        assert!(!segments[0].is_translated());
    }
}
