//! Segment refinement: turns raw transcriber output into the canonical,
//! indexed segment sequence the translation engine works on.

use tracing::{debug, info, warn};

use crate::config::RefineConfig;
use crate::segment::{RawSegment, Segment, SegmentKind, WordTiming};

pub struct SegmentRefiner {
    config: RefineConfig,
}

impl SegmentRefiner {
    pub fn new(config: RefineConfig) -> Self {
        Self { config }
    }

    /// Build the canonical sequence: ordered by start, contiguous indices,
    /// no overlapping spans, no text longer than the configured limit, and a
    /// silence placeholder in every gap above the threshold.
    pub fn refine(&self, raw: Vec<RawSegment>) -> Vec<Segment> {
        let input_count = raw.len();
        let ordered = self.resolve_overlaps(self.normalize(raw));
        let split: Vec<RawSegment> = ordered
            .into_iter()
            .flat_map(|segment| self.split_long(segment))
            .collect();
        let segments = self.fill_gaps(split);

        info!(
            "Refined {} raw segments into {} segments ({} silence placeholders)",
            input_count,
            segments.len(),
            segments.iter().filter(|s| s.is_silence()).count()
        );
        segments
    }

    /// Refine an already canonical sequence again. Used to re-check output;
    /// on refiner output this returns an identical sequence.
    pub fn refine_segments(&self, segments: &[Segment]) -> Vec<Segment> {
        self.refine(segments.iter().map(RawSegment::from).collect())
    }

    fn normalize(&self, raw: Vec<RawSegment>) -> Vec<RawSegment> {
        let mut kept: Vec<RawSegment> = raw
            .into_iter()
            .filter_map(|mut segment| {
                segment.text = segment.text.trim().to_string();
                if segment.text.is_empty() {
                    debug!("Dropping empty segment at {:.2}s", segment.start);
                    return None;
                }
                if !segment.start.is_finite() || !segment.end.is_finite() || segment.duration() <= 0.0 {
                    warn!(
                        "Dropping segment with invalid timing [{:.2}s -> {:.2}s]: {}",
                        segment.start, segment.end, segment.text
                    );
                    return None;
                }
                Some(segment)
            })
            .collect();

        kept.sort_by(|a, b| a.start.total_cmp(&b.start));
        kept
    }

    /// Expects input sorted by start.
    fn resolve_overlaps(&self, sorted: Vec<RawSegment>) -> Vec<RawSegment> {
        let mut out: Vec<RawSegment> = Vec::with_capacity(sorted.len());

        for segment in sorted {
            match out.last_mut() {
                Some(prev) if segment.start <= prev.start => {
                    debug!("Merging segments sharing start {:.2}s", prev.start);
                    prev.text = format!("{} {}", prev.text, segment.text);
                    prev.end = prev.end.max(segment.end);
                    prev.words.extend(segment.words);
                }
                Some(prev) if segment.start < prev.end => {
                    debug!(
                        "Trimming overlap: segment ending {:.2}s now ends at {:.2}s",
                        prev.end, segment.start
                    );
                    prev.end = segment.start;
                    prev.words.clear();
                    out.push(segment);
                }
                _ => out.push(segment),
            }
        }

        out
    }

    fn split_long(&self, segment: RawSegment) -> Vec<RawSegment> {
        let limits = SplitLimits {
            max_chars: self.config.max_segment_chars,
            max_secs: self.config.max_segment_secs,
        };
        if limits.fits(&segment) || segment.text == self.config.silence_marker {
            return vec![segment];
        }

        let pieces = split_by_words(&segment, &limits).unwrap_or_else(|| split_proportionally(&segment, &limits));
        debug!(
            "Split {:.2}s-{:.2}s ({} chars) into {} pieces",
            segment.start,
            segment.end,
            segment.text.chars().count(),
            pieces.len()
        );
        pieces
    }

    fn fill_gaps(&self, segments: Vec<RawSegment>) -> Vec<Segment> {
        let mut out: Vec<Segment> = Vec::with_capacity(segments.len());

        for segment in segments {
            if let Some(prev) = out.last() {
                let gap = segment.start - prev.end;
                if gap > self.config.silence_gap_secs {
                    warn!("Gap of {:.2}s detected. Inserting placeholder.", gap);
                    let start = prev.end;
                    out.push(self.make_segment(out.len(), start, segment.start, self.config.silence_marker.clone()));
                }
            }
            out.push(self.make_segment(out.len(), segment.start, segment.end, segment.text));
        }

        out
    }

    fn make_segment(&self, index: usize, start: f64, end: f64, text: String) -> Segment {
        let kind = if text == self.config.silence_marker {
            SegmentKind::Silence
        } else {
            SegmentKind::Speech
        };
        Segment {
            index,
            start,
            end,
            kind,
            source_text: text,
            translated_text: String::new(),
        }
    }
}

/// Greedy word packing; a word longer than `max_chars` is cut into
/// `max_chars`-sized pieces. Every returned piece fits in `max_chars`.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let current_len = current.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            let mut chunks = chars.chunks(max_chars).peekable();
            while let Some(chunk) = chunks.next() {
                let chunk: String = chunk.iter().collect();
                if chunks.peek().is_some() {
                    pieces.push(chunk);
                } else {
                    current = chunk;
                }
            }
        } else if current.is_empty() {
            current = word.to_string();
        } else if current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            pieces.push(std::mem::replace(&mut current, word.to_string()));
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

// Proportional timings are not exact
const TIME_TOLERANCE_SECS: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
struct SplitLimits {
    max_chars: usize,
    max_secs: f64,
}

impl SplitLimits {
    fn fits(&self, segment: &RawSegment) -> bool {
        segment.text.chars().count() <= self.max_chars && segment.duration() <= self.max_secs + TIME_TOLERANCE_SECS
    }
}

/// Cut the text so each piece fits both limits, giving every piece a share
/// of the span proportional to its length. Tighter character limits are
/// tried until the pieces are short enough in time; a segment that cannot
/// get there is only split by characters.
fn split_proportionally(segment: &RawSegment, limits: &SplitLimits) -> Vec<RawSegment> {
    let by_chars = spread_over_span(segment, split_text(&segment.text, limits.max_chars));
    if by_chars.iter().all(|piece| limits.fits(piece)) {
        return by_chars;
    }

    (1..limits.max_chars)
        .rev()
        .map(|max_chars| spread_over_span(segment, split_text(&segment.text, max_chars)))
        .find(|pieces| pieces.iter().all(|piece| limits.fits(piece)))
        .unwrap_or(by_chars)
}

/// Divide the segment's span among the pieces by text length.
fn spread_over_span(segment: &RawSegment, pieces: Vec<String>) -> Vec<RawSegment> {
    let total: usize = pieces.iter().map(|p| p.chars().count()).sum();
    let duration = segment.duration();
    let last = pieces.len().saturating_sub(1);

    let mut consumed = 0usize;
    let mut out = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.into_iter().enumerate() {
        let start = segment.start + duration * consumed as f64 / total as f64;
        consumed += piece.chars().count();
        let end = if i == last {
            segment.end
        } else {
            segment.start + duration * consumed as f64 / total as f64
        };
        out.push(RawSegment::new(start, end, piece));
    }
    out
}

/// Split on word timings when the transcriber supplied usable ones. Gives up
/// when the word timings cannot produce pieces within both limits.
fn split_by_words(segment: &RawSegment, limits: &SplitLimits) -> Option<Vec<RawSegment>> {
    let max_chars = limits.max_chars;
    let words: Vec<&WordTiming> = segment.words.iter().filter(|w| !w.word.trim().is_empty()).collect();
    if words.is_empty() || words.iter().any(|w| w.word.trim().chars().count() > max_chars) {
        return None;
    }

    let mut groups: Vec<Vec<&WordTiming>> = Vec::new();
    let mut current: Vec<&WordTiming> = Vec::new();
    let mut current_len = 0usize;
    for word in words {
        let len = word.word.trim().chars().count();
        // the first piece is stretched back to the segment start
        let group_start = match current.first() {
            Some(_) if groups.is_empty() => segment.start,
            Some(first) => first.start,
            None => word.start,
        };
        let too_long = current_len + 1 + len > max_chars || word.end - group_start > limits.max_secs;
        if !current.is_empty() && too_long {
            groups.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += if current.is_empty() { len } else { len + 1 };
        current.push(word);
    }
    groups.push(current);

    let last = groups.len() - 1;
    let mut out: Vec<RawSegment> = Vec::with_capacity(groups.len());
    for (i, group) in groups.iter().enumerate() {
        let start = if i == 0 { segment.start } else { group[0].start };
        let end = if i == last { segment.end } else { group[group.len() - 1].end };
        let text = group.iter().map(|w| w.word.trim()).collect::<Vec<_>>().join(" ");

        let previous_end = out.last().map(|p| p.end).unwrap_or(segment.start);
        if !(start < end) || start < previous_end || end > segment.end {
            return None;
        }
        let piece = RawSegment::new(start, end, text);
        if !limits.fits(&piece) {
            return None;
        }
        out.push(piece);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refiner(max_chars: usize, gap: f64) -> SegmentRefiner {
        timed_refiner(max_chars, 60.0, gap)
    }

    fn timed_refiner(max_chars: usize, max_secs: f64, gap: f64) -> SegmentRefiner {
        SegmentRefiner::new(RefineConfig {
            max_segment_chars: max_chars,
            max_segment_secs: max_secs,
            silence_gap_secs: gap,
            silence_marker: "[no speech]".to_string(),
        })
    }

    fn assert_canonical(segments: &[Segment]) {
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.index, i);
            assert!(segment.start < segment.end, "segment {} has empty span", i);
        }
        for pair in segments.windows(2) {
            assert!(pair[0].start < pair[1].start);
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn test_split_text_packs_words_and_cuts_long_words() {
        assert_eq!(
            split_text("가나다라마 바사아자차 카타파하", 10),
            vec!["가나다라마", "바사아자차", "카타파하"]
        );
        assert_eq!(split_text("ab cd ef", 5), vec!["ab cd", "ef"]);
        assert_eq!(split_text("abcdefghij k", 4), vec!["abcd", "efgh", "ij k"]);
    }

    #[test]
    fn test_long_segment_split_proportionally_to_text_length() {
        let segments = refiner(10, 5.0).refine(vec![RawSegment::new(0.0, 14.0, "가나다라마 바사아자차 카타파하")]);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].source_text, "가나다라마");
        assert_eq!((segments[0].start, segments[0].end), (0.0, 5.0));
        assert_eq!((segments[1].start, segments[1].end), (5.0, 10.0));
        assert_eq!((segments[2].start, segments[2].end), (10.0, 14.0));
        assert_canonical(&segments);
    }

    #[test]
    fn test_long_segment_uses_word_timings_when_available() {
        let mut raw = RawSegment::new(1.0, 9.0, "하나 둘셋 넷다섯");
        raw.words = vec![
            WordTiming { word: " 하나".into(), start: 1.0, end: 2.0 },
            WordTiming { word: " 둘셋".into(), start: 2.5, end: 4.0 },
            WordTiming { word: " 넷다섯".into(), start: 6.0, end: 9.0 },
        ];

        let segments = refiner(5, 5.0).refine(vec![raw]);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].source_text, "하나 둘셋");
        assert_eq!((segments[0].start, segments[0].end), (1.0, 4.0));
        assert_eq!(segments[1].source_text, "넷다섯");
        assert_eq!((segments[1].start, segments[1].end), (6.0, 9.0));
    }

    #[test]
    fn test_long_running_short_text_is_split_in_time() {
        let refiner = timed_refiner(40, 7.0, 5.0);
        let once = refiner.refine(vec![RawSegment::new(0.0, 18.0, "정말 좋은 날씨네요")]);

        assert!(once.len() > 1);
        for segment in &once {
            assert!(segment.end - segment.start <= 7.0 + 1e-6, "{:?} runs too long", segment);
        }
        assert_eq!(once.first().unwrap().start, 0.0);
        assert_eq!(once.last().unwrap().end, 18.0);
        let text: String = once.iter().map(|s| s.source_text.replace(' ', "")).collect();
        assert_eq!(text, "정말좋은날씨네요");
        assert_canonical(&once);

        assert_eq!(refiner.refine_segments(&once), once);
    }

    #[test]
    fn test_long_running_segment_splits_on_word_timings() {
        let mut raw = RawSegment::new(0.0, 12.0, "하나 둘 셋");
        raw.words = vec![
            WordTiming { word: " 하나".into(), start: 0.0, end: 1.0 },
            WordTiming { word: " 둘".into(), start: 5.0, end: 6.0 },
            WordTiming { word: " 셋".into(), start: 10.0, end: 12.0 },
        ];

        let refiner = timed_refiner(40, 7.0, 5.0);
        let segments = refiner.refine(vec![raw]);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].source_text, "하나 둘");
        assert_eq!((segments[0].start, segments[0].end), (0.0, 6.0));
        assert_eq!(segments[1].source_text, "셋");
        assert_eq!((segments[1].start, segments[1].end), (10.0, 12.0));
        assert_eq!(refiner.refine_segments(&segments), segments);
    }

    #[test]
    fn test_long_silence_placeholder_is_not_split() {
        let refiner = timed_refiner(40, 7.0, 5.0);
        let once = refiner.refine(vec![RawSegment::new(0.0, 2.0, "하나"), RawSegment::new(30.0, 31.0, "둘")]);

        assert_eq!(once.len(), 3);
        assert!(once[1].is_silence());
        assert_eq!(refiner.refine_segments(&once), once);
    }

    #[test]
    fn test_silence_gap_gets_placeholder() {
        let segments = refiner(40, 5.0).refine(vec![
            RawSegment::new(25.0, 30.0, "안녕하세요"),
            RawSegment::new(42.0, 45.0, "반갑습니다"),
        ]);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].kind, SegmentKind::Silence);
        assert_eq!(segments[1].source_text, "[no speech]");
        assert_eq!((segments[1].start, segments[1].end), (30.0, 42.0));
        assert_eq!(segments[2].index, 2);
    }

    #[test]
    fn test_gap_at_threshold_is_left_alone() {
        let segments = refiner(40, 5.0).refine(vec![
            RawSegment::new(0.0, 1.0, "하나"),
            RawSegment::new(6.0, 7.0, "둘"),
        ]);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_overlaps_and_ordering_are_resolved() {
        let segments = refiner(40, 5.0).refine(vec![
            RawSegment::new(3.0, 8.0, "둘"),
            RawSegment::new(0.0, 5.0, "하나"),
            RawSegment::new(3.0, 4.0, "셋"),
            RawSegment::new(9.0, 9.0, "zero length"),
            RawSegment::new(10.0, 11.0, "   "),
        ]);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].source_text, "하나");
        assert_eq!(segments[0].end, 3.0);
        assert_eq!(segments[1].source_text, "둘 셋");
        assert_eq!((segments[1].start, segments[1].end), (3.0, 8.0));
        assert_canonical(&segments);
    }

    #[test]
    fn test_refinement_is_idempotent() {
        let refiner = refiner(12, 2.0);
        let raw = vec![
            RawSegment::new(0.0, 4.0, "오늘은 정말 좋은 날씨네요 그렇죠"),
            RawSegment::new(3.5, 6.0, "네 맞아요"),
            RawSegment::new(12.0, 13.3, "트리플에스 화이팅"),
            RawSegment::new(13.3, 20.0, "아주아주아주아주아주아주긴단어입니다"),
        ];

        let once = refiner.refine(raw);
        let twice = refiner.refine_segments(&once);

        assert_canonical(&once);
        assert_eq!(once, twice);
    }
}
