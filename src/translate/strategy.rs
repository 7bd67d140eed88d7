use serde::Serialize;

use crate::config::TranslateConfig;
use crate::reference::ReferenceContext;
use crate::segment::Segment;

/// Rough size of the fixed prompt text, added to every estimate.
pub const PROMPT_OVERHEAD_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchStrategy {
    /// Whole transcript in one protocol call.
    SingleBatch,
    /// Overlapping windows of `window_size` segments.
    SlidingWindow { window_size: usize, overlap: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyThresholds {
    pub max_segments: usize,
    pub max_chars: usize,
    pub window_size: usize,
    pub overlap: usize,
}

impl From<&TranslateConfig> for StrategyThresholds {
    fn from(config: &TranslateConfig) -> Self {
        Self {
            max_segments: config.single_batch_max_segments,
            max_chars: config.single_batch_max_chars,
            window_size: config.window_size,
            overlap: config.window_overlap,
        }
    }
}

/// Pick how a transcript is sent to the LLM. Pure and deterministic.
pub fn select_strategy(segment_count: usize, total_chars: usize, thresholds: &StrategyThresholds) -> BatchStrategy {
    if segment_count <= thresholds.max_segments && total_chars <= thresholds.max_chars {
        BatchStrategy::SingleBatch
    } else {
        BatchStrategy::SlidingWindow {
            window_size: thresholds.window_size,
            overlap: thresholds.overlap,
        }
    }
}

/// Characters a single-batch prompt would carry: the speech text, the
/// reference block and the fixed instructions.
pub fn estimate_prompt_chars(segments: &[Segment], reference: &ReferenceContext) -> usize {
    let text: usize = segments
        .iter()
        .filter(|s| !s.is_silence())
        .map(|s| s.source_text.chars().count() + 1)
        .sum();
    text + reference.prompt_block().chars().count() + PROMPT_OVERHEAD_CHARS
}
