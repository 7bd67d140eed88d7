//! One request/response exchange with the LLM.
//!
//! A batch is an index range of the canonical sequence. The request carries
//! the speech segments of that range keyed by index; the reply must be a JSON
//! object `{"translations": {"<index>": "<text>"}}` with exactly the same
//! key set. Anything else is a malformed reply and is handed back to the
//! caller as a [`BatchError`] so it can be retried at a finer granularity.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use super::backend::LlmBackend;
use crate::config::TranslateConfig;
use crate::error::{BatchError, FailureKind};
use crate::reference::ReferenceContext;
use crate::segment::{Segment, TranslationResult};

const REQUEST_HEADER: &str = "Segments to translate (JSON):";

/// Payload embedded in the prompt, serialized on a single line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub target_language: String,
    pub segments: BTreeMap<usize, String>,
}

impl BatchRequest {
    /// Recover the request embedded in a prompt built by [`ProtocolClient`].
    /// Offline backends use this to answer without a model.
    pub fn find_in_prompt(prompt: &str) -> Option<Self> {
        let mut lines = prompt.lines();
        lines.find(|line| line.trim() == REQUEST_HEADER)?;
        serde_json::from_str(lines.next()?.trim()).ok()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProtocolReply {
    translations: BTreeMap<String, serde_json::Value>,
}

pub struct ProtocolClient {
    backend: Arc<dyn LlmBackend>,
    reference: Arc<ReferenceContext>,
    source_language: String,
    target_language: String,
    context_segments: usize,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl ProtocolClient {
    pub fn new(backend: Arc<dyn LlmBackend>, reference: Arc<ReferenceContext>, config: &TranslateConfig) -> Self {
        Self {
            backend,
            reference,
            source_language: config.source_language.clone(),
            target_language: config.target_language.clone(),
            context_segments: config.context_segments,
            timeout: Duration::from_secs(config.request_timeout_secs),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
        }
    }

    pub fn backend_name(&self) -> String {
        self.backend.name()
    }

    pub fn reference(&self) -> &ReferenceContext {
        &self.reference
    }

    /// Translate the speech segments of `range`. Either every speech index in
    /// the range comes back translated or the whole batch fails.
    pub async fn translate(&self, segments: &[Segment], range: Range<usize>) -> Result<TranslationResult, BatchError> {
        let request = self.build_request(segments, range.clone());
        if request.segments.is_empty() {
            return Ok(TranslationResult::new());
        }
        let prompt = self.build_prompt(segments, range.clone(), &request);

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| BatchError::new(range.clone(), FailureKind::TransportFailure, e.to_string()))?;

        debug!(
            "Requesting {} segments [{}, {}) from {}",
            request.segments.len(),
            range.start,
            range.end,
            self.backend.name()
        );

        let reply = match tokio::time::timeout(self.timeout, self.backend.complete(&prompt)).await {
            Err(_) => {
                return Err(BatchError::new(
                    range,
                    FailureKind::Timeout,
                    format!("no reply within {}s", self.timeout.as_secs()),
                ));
            }
            Ok(Err(e)) => return Err(BatchError::new(range, e.kind(), e.to_string())),
            Ok(Ok(reply)) => reply,
        };

        let expected: BTreeSet<usize> = request.segments.keys().copied().collect();
        parse_reply(&reply, range, &expected)
    }

    pub fn build_request(&self, segments: &[Segment], range: Range<usize>) -> BatchRequest {
        BatchRequest {
            target_language: self.target_language.clone(),
            segments: segments[range]
                .iter()
                .filter(|s| !s.is_silence())
                .map(|s| (s.index, s.source_text.clone()))
                .collect(),
        }
    }

    fn build_prompt(&self, segments: &[Segment], range: Range<usize>, request: &BatchRequest) -> String {
        let mut prompt = format!(
            "You are a professional subtitle translator. Translate spoken {source} into {target}.\n\
             Each entry of the JSON object below is one subtitle line, keyed by its index.\n\n\
             Rules:\n\
             1. Reply with one JSON object of the form {{\"translations\": {{\"<index>\": \"<translation>\"}}}} and nothing else.\n\
             2. Use exactly the keys of the input. Never merge, split, drop or add entries.\n\
             3. Keep English words, acronyms and brand names in English.\n\
             4. Write every person listed under Names with the rendering given there.\n\
             5. The lines come from speech recognition. When a word is a misheard form of a listed name, use that name.\n\
             6. Keep the tone and register of the speaker.\n",
            source = self.source_language,
            target = self.target_language,
        );

        let block = self.reference.prompt_block();
        if !block.is_empty() {
            prompt.push_str("\nReference:\n");
            prompt.push_str(&block);
        }

        let before = context_lines(&segments[range.start.saturating_sub(self.context_segments)..range.start]);
        if !before.is_empty() {
            prompt.push_str("\nPreceding lines (context only, do not translate):\n");
            prompt.push_str(&before);
        }
        let after_end = (range.end + self.context_segments).min(segments.len());
        let after = context_lines(&segments[range.end..after_end]);
        if !after.is_empty() {
            prompt.push_str("\nFollowing lines (context only, do not translate):\n");
            prompt.push_str(&after);
        }

        prompt.push('\n');
        prompt.push_str(REQUEST_HEADER);
        prompt.push('\n');
        // BatchRequest only holds strings and integers
        prompt.push_str(&serde_json::to_string(request).unwrap_or_default());
        prompt.push('\n');
        prompt
    }
}

fn context_lines(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_silence())
        .map(|s| format!("{}\n", s.source_text))
        .collect()
}

/// Strip a single markdown code fence wrapping the whole reply, if present.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // drop the info string (```json)
    match body.split_once('\n') {
        Some((info, inner)) if !info.trim_start().starts_with('{') => inner.trim(),
        _ => body.trim(),
    }
}

/// Validate a raw reply against the expected index set.
pub fn parse_reply(reply: &str, range: Range<usize>, expected: &BTreeSet<usize>) -> Result<TranslationResult, BatchError> {
    let body = strip_code_fence(reply);
    let parsed: ProtocolReply =
        serde_json::from_str(body).map_err(|e| BatchError::malformed(range.clone(), format!("invalid JSON: {}", e)))?;

    let mut result = TranslationResult::new();
    for (key, value) in parsed.translations {
        let index: usize = key
            .trim()
            .parse()
            .map_err(|_| BatchError::malformed(range.clone(), format!("non-numeric key {:?}", key)))?;
        let serde_json::Value::String(text) = value else {
            return Err(BatchError::malformed(range, format!("value for index {} is not a string", index)));
        };
        if result.get(index).is_some() {
            return Err(BatchError::malformed(range, format!("index {} appears twice", index)));
        }
        result.insert(index, text.trim().to_string());
    }

    let returned: BTreeSet<usize> = result.indices().collect();
    if &returned != expected {
        let missing: Vec<usize> = expected.difference(&returned).copied().collect();
        let extra: Vec<usize> = returned.difference(expected).copied().collect();
        return Err(BatchError::malformed(
            range,
            format!("index set mismatch (missing {:?}, unexpected {:?})", missing, extra),
        ));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::BackendError;
    use crate::segment::SegmentKind;
    use crate::translate::backend::MockLlmBackend;

    fn segments(texts: &[&str]) -> Vec<Segment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Segment {
                index: i,
                start: i as f64,
                end: i as f64 + 1.0,
                kind: if text.starts_with('[') { SegmentKind::Silence } else { SegmentKind::Speech },
                source_text: text.to_string(),
                translated_text: String::new(),
            })
            .collect()
    }

    fn client(backend: MockLlmBackend, reference: ReferenceContext) -> ProtocolClient {
        let mut config = Config::default().translate;
        config.request_timeout_secs = 1;
        config.context_segments = 1;
        ProtocolClient::new(Arc::new(backend), Arc::new(reference), &config)
    }

    fn expected(indices: &[usize]) -> BTreeSet<usize> {
        indices.iter().copied().collect()
    }

    #[test]
    fn test_parse_reply_accepts_exact_key_set() {
        let reply = r#"{"translations": {"3": "你好", "4": " 謝謝 "}}"#;
        let result = parse_reply(reply, 3..5, &expected(&[3, 4])).unwrap();
        assert_eq!(result.get(3), Some("你好"));
        assert_eq!(result.get(4), Some("謝謝"));
    }

    #[test]
    fn test_parse_reply_tolerates_one_code_fence() {
        let reply = "```json\n{\"translations\": {\"0\": \"好\"}}\n```";
        assert!(parse_reply(reply, 0..1, &expected(&[0])).is_ok());

        let bare_fence = "```{\"translations\": {\"0\": \"好\"}}```";
        assert!(parse_reply(bare_fence, 0..1, &expected(&[0])).is_ok());
    }

    #[test]
    fn test_parse_reply_rejects_missing_and_extra_indices() {
        let missing = parse_reply(r#"{"translations": {"3": "a"}}"#, 3..5, &expected(&[3, 4])).unwrap_err();
        assert_eq!(missing.kind, FailureKind::MalformedReply);
        assert_eq!(missing.range, 3..5);
        assert!(missing.detail.contains("missing [4]"));

        let extra =
            parse_reply(r#"{"translations": {"3": "a", "4": "b", "9": "c"}}"#, 3..5, &expected(&[3, 4])).unwrap_err();
        assert!(extra.detail.contains("unexpected [9]"));
    }

    #[test]
    fn test_parse_reply_rejects_wrong_shapes() {
        let set = expected(&[0]);
        for reply in [
            "Sure! Here you go: {\"translations\": {\"0\": \"a\"}}",
            r#"{"translations": {"0": "a"}, "note": "x"}"#,
            r#"{"translations": {"zero": "a"}}"#,
            r#"{"translations": {"0": 5}}"#,
            r#"{"translations": {"0": "a", " 0": "b"}}"#,
            r#"["a"]"#,
            "",
        ] {
            let err = parse_reply(reply, 0..1, &set).unwrap_err();
            assert_eq!(err.kind, FailureKind::MalformedReply, "reply {:?}", reply);
        }
    }

    #[tokio::test]
    async fn test_translate_sends_only_speech_and_includes_context() {
        let segs = segments(&["앞", "하나", "[no speech]", "둘", "뒤"]);
        let mut backend = MockLlmBackend::new();
        backend.expect_name().returning(|| "mock".to_string());
        backend.expect_complete().times(1).returning(|prompt| {
            let request = BatchRequest::find_in_prompt(prompt).unwrap();
            assert_eq!(request.segments.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
            assert!(prompt.contains("Preceding lines (context only, do not translate):\n앞\n"));
            assert!(prompt.contains("Following lines (context only, do not translate):\n뒤\n"));
            assert!(prompt.contains("- 윤서연 => Yoon SeoYeon"));
            Ok(r#"{"translations": {"1": "一", "3": "二"}}"#.to_string())
        });

        let client = client(backend, ReferenceContext::parse("윤서연 -> Yoon SeoYeon"));
        let result = client.translate(&segs, 1..4).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(3), Some("二"));
    }

    #[tokio::test]
    async fn test_silence_only_batch_skips_the_backend() {
        let segs = segments(&["[no speech]"]);
        let backend = MockLlmBackend::new();
        let client = client(backend, ReferenceContext::default());
        assert!(client.translate(&segs, 0..1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_errors_keep_their_kind() {
        let segs = segments(&["하나"]);
        let mut backend = MockLlmBackend::new();
        backend.expect_name().returning(|| "mock".to_string());
        backend
            .expect_complete()
            .returning(|_| Err(BackendError::Transport("connection refused".to_string())));

        let err = client(backend, ReferenceContext::default()).translate(&segs, 0..1).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::TransportFailure);
        assert_eq!(err.range, 0..1);
    }

    #[tokio::test]
    async fn test_slow_reply_becomes_timeout() {
        struct Stalled;

        #[async_trait::async_trait]
        impl LlmBackend for Stalled {
            fn name(&self) -> String {
                "stalled".to_string()
            }
            async fn complete(&self, _prompt: &str) -> Result<String, BackendError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(String::new())
            }
            async fn check_availability(&self) -> Result<(), BackendError> {
                Ok(())
            }
        }

        let mut config = Config::default().translate;
        config.request_timeout_secs = 1;
        let client = ProtocolClient::new(Arc::new(Stalled), Arc::new(ReferenceContext::default()), &config);

        let err = client.translate(&segments(&["하나"]), 0..1).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Timeout);
    }
}
