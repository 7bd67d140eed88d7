// Translation batching and fallback engine
//
// The engine takes the refined segment sequence and fills in
// `translated_text` for every segment:
// - strategy: single batch or sliding windows, picked from transcript size
// - protocol: one strict JSON exchange with the LLM per batch
// - window: concurrent windows merged in window order
// - fallback: failed batches retried at finer granularity

pub mod backend;
pub mod fallback;
pub mod protocol;
pub mod strategy;
pub mod window;

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

pub use backend::{BackendFactory, LlmBackend};
pub use fallback::{FallbackSplitter, Resolution};
pub use protocol::{BatchRequest, ProtocolClient};
pub use strategy::{BatchStrategy, StrategyThresholds, estimate_prompt_chars, select_strategy};
pub use window::{WindowOrchestrator, window_ranges};

use crate::cancel::CancelFlag;
use crate::config::TranslateConfig;
use crate::error::{FailureKind, Result, YeokjaError};
use crate::reference::ReferenceContext;
use crate::segment::{FailureRecord, Segment};

/// What happened during one translation run.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationReport {
    pub strategy: BatchStrategy,
    pub speech_segments: usize,
    pub silence_segments: usize,
    pub failures: Vec<FailureRecord>,
    /// Indices that carry the untranslatable marker.
    pub unrecoverable: Vec<usize>,
}

pub struct TranslationEngine {
    client: Arc<ProtocolClient>,
    splitter: Arc<FallbackSplitter>,
    config: TranslateConfig,
    cancel: CancelFlag,
}

impl TranslationEngine {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        reference: Arc<ReferenceContext>,
        config: TranslateConfig,
        cancel: CancelFlag,
    ) -> Self {
        let client = Arc::new(ProtocolClient::new(backend, reference, &config));
        let splitter = Arc::new(FallbackSplitter::new(client.clone(), &config, cancel.clone()));
        Self {
            client,
            splitter,
            config,
            cancel,
        }
    }

    /// Translate the canonical sequence in place.
    ///
    /// On success every speech segment has a non-empty `translated_text`
    /// (possibly the untranslatable marker) and every silence placeholder
    /// carries its own text unchanged.
    pub async fn translate(&self, segments: &mut [Segment]) -> Result<TranslationReport> {
        if let Some((position, segment)) = segments.iter().enumerate().find(|(i, s)| s.index != *i) {
            return Err(YeokjaError::Translation(format!(
                "segment at position {} has index {}, expected a canonical sequence",
                position, segment.index
            )));
        }

        for segment in segments.iter_mut().filter(|s| s.is_silence()) {
            segment.translated_text = segment.source_text.clone();
        }

        let speech_segments = segments.iter().filter(|s| !s.is_silence()).count();
        let silence_segments = segments.len() - speech_segments;
        let total_chars = estimate_prompt_chars(segments, self.client.reference());
        let strategy = select_strategy(speech_segments, total_chars, &StrategyThresholds::from(&self.config));

        info!(
            "Translating {} speech segments (~{} prompt chars) with {} using {:?}",
            speech_segments,
            total_chars,
            self.client.backend_name(),
            strategy
        );

        let resolution = if speech_segments == 0 {
            Resolution::default()
        } else {
            match strategy {
                BatchStrategy::SingleBatch => {
                    self.cancel.check()?;
                    match self.client.translate(segments, 0..segments.len()).await {
                        Ok(result) => Resolution::from(result),
                        Err(e) => self.splitter.resolve(segments, e).await?,
                    }
                }
                BatchStrategy::SlidingWindow { window_size, overlap } => {
                    WindowOrchestrator::new(
                        self.client.clone(),
                        self.splitter.clone(),
                        self.config.concurrency,
                        self.cancel.clone(),
                    )
                    .run(segments, window_size, overlap)
                    .await?
                }
            }
        };

        let Resolution { mut result, mut failures } = resolution;
        for segment in segments.iter().filter(|s| !s.is_silence()) {
            if result.get(segment.index).is_none_or(str::is_empty) {
                error!("Segment {} came back without a translation", segment.index);
                result.insert(segment.index, self.config.untranslatable_marker.clone());
                failures.push(FailureRecord {
                    range: segment.index..segment.index + 1,
                    cause: FailureKind::UnrecoverableSegment,
                    attempt_depth: 0,
                });
            }
        }
        result.apply(segments);

        let mut unrecoverable: Vec<usize> = failures
            .iter()
            .filter(|f| f.cause == FailureKind::UnrecoverableSegment)
            .map(|f| f.range.start)
            .collect();
        unrecoverable.sort_unstable();
        unrecoverable.dedup();

        if unrecoverable.is_empty() {
            info!("All {} speech segments translated", speech_segments);
        } else {
            error!(
                "{} of {} speech segments could not be translated: {:?}",
                unrecoverable.len(),
                speech_segments,
                unrecoverable
            );
        }

        Ok(TranslationReport {
            strategy,
            speech_segments,
            silence_segments,
            failures,
            unrecoverable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::BackendError;
    use crate::segment::SegmentKind;
    use crate::translate::backend::MockLlmBackend;

    fn sequence(texts: &[&str]) -> Vec<Segment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Segment {
                index: i,
                start: i as f64 * 2.0,
                end: i as f64 * 2.0 + 1.5,
                kind: if *text == "[no speech]" { SegmentKind::Silence } else { SegmentKind::Speech },
                source_text: text.to_string(),
                translated_text: String::new(),
            })
            .collect()
    }

    fn echo_reply(prompt: &str) -> std::result::Result<String, BackendError> {
        let request = BatchRequest::find_in_prompt(prompt).unwrap();
        let translations: serde_json::Map<String, serde_json::Value> = request
            .segments
            .iter()
            .map(|(i, text)| (i.to_string(), serde_json::Value::String(format!("譯:{}", text))))
            .collect();
        Ok(serde_json::json!({ "translations": translations }).to_string())
    }

    fn engine(backend: MockLlmBackend, config: TranslateConfig) -> TranslationEngine {
        TranslationEngine::new(
            Arc::new(backend),
            Arc::new(ReferenceContext::default()),
            config,
            CancelFlag::new(),
        )
    }

    #[tokio::test]
    async fn test_small_transcript_uses_one_call() {
        let mut segs = sequence(&["안녕하세요", "반가워요", "오늘 뭐 해요?", "놀아요", "좋아요"]);
        let mut backend = MockLlmBackend::new();
        backend.expect_name().returning(|| "mock".to_string());
        backend.expect_complete().times(1).returning(echo_reply);

        let report = engine(backend, Config::default().translate).translate(&mut segs).await.unwrap();

        assert_eq!(report.strategy, BatchStrategy::SingleBatch);
        assert!(report.failures.is_empty());
        assert_eq!(segs[2].translated_text, "譯:오늘 뭐 해요?");
        assert!(segs.iter().all(Segment::is_translated));
    }

    #[tokio::test]
    async fn test_silence_passes_through_untouched() {
        let mut segs = sequence(&["하나", "[no speech]", "둘"]);
        let mut backend = MockLlmBackend::new();
        backend.expect_name().returning(|| "mock".to_string());
        backend.expect_complete().times(1).returning(echo_reply);

        let report = engine(backend, Config::default().translate).translate(&mut segs).await.unwrap();

        assert_eq!(report.silence_segments, 1);
        assert_eq!(segs[1].translated_text, "[no speech]");
        assert_eq!(segs[2].translated_text, "譯:둘");
    }

    #[tokio::test]
    async fn test_silence_only_sequence_makes_no_calls() {
        let mut segs = sequence(&["[no speech]"]);
        let mut backend = MockLlmBackend::new();
        backend.expect_name().returning(|| "mock".to_string());

        let report = engine(backend, Config::default().translate).translate(&mut segs).await.unwrap();
        assert_eq!(report.speech_segments, 0);
        assert_eq!(segs[0].translated_text, "[no speech]");
    }

    #[tokio::test]
    async fn test_failed_single_batch_goes_through_fallback() {
        let texts: Vec<String> = (0..6).map(|i| format!("문장{}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let mut segs = sequence(&refs);

        let mut backend = MockLlmBackend::new();
        backend.expect_name().returning(|| "mock".to_string());
        backend.expect_complete().returning(|prompt| {
            let request = BatchRequest::find_in_prompt(prompt).unwrap();
            if request.segments.len() > 3 {
                Err(BackendError::Timeout("slow".to_string()))
            } else {
                echo_reply(prompt)
            }
        });

        let mut config = Config::default().translate;
        config.fallback_granularities = vec![3, 1];
        let report = engine(backend, config).translate(&mut segs).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].cause, FailureKind::Timeout);
        assert_eq!(report.failures[0].range, 0..6);
        assert!(report.unrecoverable.is_empty());
        assert_eq!(segs[5].translated_text, "譯:문장5");
    }

    #[tokio::test]
    async fn test_non_canonical_sequence_is_rejected() {
        let mut segs = sequence(&["하나", "둘"]);
        segs[1].index = 5;
        let result = engine(MockLlmBackend::new(), Config::default().translate)
            .translate(&mut segs)
            .await;
        match result {
            Err(YeokjaError::Translation(message)) => assert!(message.contains("position 1 has index 5")),
            other => panic!("expected a translation error, got {:?}", other.map(|r| r.strategy)),
        }
    }

    #[tokio::test]
    async fn test_cancelled_engine_returns_cancelled() {
        let mut segs = sequence(&["하나", "둘"]);
        let mut backend = MockLlmBackend::new();
        backend.expect_name().returning(|| "mock".to_string());
        let cancel = CancelFlag::new();
        let engine = TranslationEngine::new(
            Arc::new(backend),
            Arc::new(ReferenceContext::default()),
            Config::default().translate,
            cancel.clone(),
        );
        cancel.cancel();

        assert!(matches!(engine.translate(&mut segs).await, Err(YeokjaError::Cancelled)));
    }
}
