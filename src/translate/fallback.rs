use std::ops::Range;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt, stream};
use tracing::{error, info, warn};

use super::protocol::ProtocolClient;
use crate::cancel::CancelFlag;
use crate::config::TranslateConfig;
use crate::error::{BatchError, FailureKind, Result};
use crate::segment::{FailureRecord, Segment, TranslationResult};

/// Translations gathered for some part of the sequence, plus the failures
/// met on the way.
#[derive(Debug, Default)]
pub struct Resolution {
    pub result: TranslationResult,
    pub failures: Vec<FailureRecord>,
}

impl Resolution {
    /// Fold `later` into `self`; on shared indices `later` wins.
    pub fn merge(&mut self, later: Resolution) {
        self.result.overlay(later.result);
        self.failures.extend(later.failures);
    }

    /// Fold a later, overlapping window into `self`. Later translations win
    /// on shared indices, but a segment the later window gave up on keeps an
    /// earlier real translation, and vice versa.
    pub fn merge_window(&mut self, mut later: Resolution) {
        later.failures.retain(|f| {
            let index = f.range.start;
            if f.cause == FailureKind::UnrecoverableSegment && self.has_translation(index) {
                later.result.remove(index);
                false
            } else {
                true
            }
        });
        self.failures.retain(|f| {
            let index = f.range.start;
            !(f.cause == FailureKind::UnrecoverableSegment && later.has_translation(index))
        });
        self.merge(later);
    }

    /// True when `index` holds a translation rather than the give-up marker.
    fn has_translation(&self, index: usize) -> bool {
        self.result.get(index).is_some() && !self.gave_up_on(index)
    }

    fn gave_up_on(&self, index: usize) -> bool {
        self.failures
            .iter()
            .any(|f| f.cause == FailureKind::UnrecoverableSegment && f.range.start == index)
    }
}

impl From<TranslationResult> for Resolution {
    fn from(result: TranslationResult) -> Self {
        Self {
            result,
            failures: Vec::new(),
        }
    }
}

/// Split `range` into `ceil(len / size)` contiguous parts of near-equal length.
pub fn split_range(range: Range<usize>, size: usize) -> Vec<Range<usize>> {
    let len = range.len();
    if len == 0 {
        return Vec::new();
    }
    let parts = len.div_ceil(size.max(1));
    let base = len / parts;
    let extra = len % parts;

    let mut out = Vec::with_capacity(parts);
    let mut start = range.start;
    for i in 0..parts {
        let width = base + usize::from(i < extra);
        out.push(start..start + width);
        start += width;
    }
    out
}

/// Re-translates a failed range at progressively finer granularity until
/// every speech segment either has a translation or has been marked
/// unrecoverable.
pub struct FallbackSplitter {
    client: Arc<ProtocolClient>,
    granularities: Vec<usize>,
    retries: u32,
    marker: String,
    concurrency: usize,
    cancel: CancelFlag,
}

impl FallbackSplitter {
    pub fn new(client: Arc<ProtocolClient>, config: &TranslateConfig, cancel: CancelFlag) -> Self {
        Self {
            client,
            granularities: config.fallback_granularities.clone(),
            retries: config.single_segment_retries,
            marker: config.untranslatable_marker.clone(),
            concurrency: config.concurrency.max(1),
            cancel,
        }
    }

    /// Resolve a batch that failed as a whole.
    pub async fn resolve(&self, segments: &[Segment], failure: BatchError) -> Result<Resolution> {
        warn!("{}, falling back to smaller batches", failure);
        self.resolve_range(segments, failure.range, failure.kind, 0, 0).await
    }

    fn resolve_range<'a>(
        &'a self,
        segments: &'a [Segment],
        range: Range<usize>,
        cause: FailureKind,
        level: usize,
        depth: usize,
    ) -> BoxFuture<'a, Result<Resolution>> {
        async move {
            self.cancel.check()?;

            let mut resolution = Resolution::default();
            resolution.failures.push(FailureRecord {
                range: range.clone(),
                cause,
                attempt_depth: depth,
            });

            let len = range.len();
            let finer = self
                .granularities
                .iter()
                .enumerate()
                .skip(level)
                .find(|(_, size)| **size < len)
                .map(|(i, size)| (i + 1, *size));
            let (next_level, size) = match finer {
                Some(step) => step,
                None if len > 1 => (self.granularities.len(), 1),
                None => {
                    resolution.merge(self.settle_single(segments, range.start, depth).await?);
                    return Ok(resolution);
                }
            };

            let parts = split_range(range.clone(), size);
            info!(
                "Retrying [{}, {}) as {} batches of about {} segments",
                range.start,
                range.end,
                parts.len(),
                size
            );

            let resolved: Vec<Resolution> = stream::iter(parts)
                .map(|part| async move {
                    self.cancel.check()?;
                    match self.client.translate(segments, part.clone()).await {
                        Ok(result) => Ok(Resolution::from(result)),
                        Err(e) => {
                            warn!("{}", e);
                            self.resolve_range(segments, part, e.kind, next_level, depth + 1).await
                        }
                    }
                })
                .buffer_unordered(self.concurrency)
                .try_collect()
                .await?;

            // parts are disjoint, so merge order does not matter
            for part in resolved {
                resolution.merge(part);
            }
            Ok(resolution)
        }
        .boxed()
    }

    /// Last resort for one segment that already failed on its own.
    async fn settle_single(&self, segments: &[Segment], index: usize, depth: usize) -> Result<Resolution> {
        for attempt in 1..=self.retries {
            self.cancel.check()?;
            match self.client.translate(segments, index..index + 1).await {
                Ok(result) => return Ok(Resolution::from(result)),
                Err(e) => warn!("Segment {} retry {}/{} failed: {}", index, attempt, self.retries, e),
            }
        }

        error!(
            "Segment {} could not be translated, writing '{}' instead",
            index, self.marker
        );
        let mut resolution = Resolution::default();
        resolution.result.insert(index, self.marker.clone());
        resolution.failures.push(FailureRecord {
            range: index..index + 1,
            cause: FailureKind::UnrecoverableSegment,
            attempt_depth: depth,
        });
        Ok(resolution)
    }
}
