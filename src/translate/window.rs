use std::ops::Range;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use super::fallback::{FallbackSplitter, Resolution};
use super::protocol::ProtocolClient;
use crate::cancel::CancelFlag;
use crate::error::Result;
use crate::segment::Segment;

/// Window ranges over `len` segments. Consecutive windows share `overlap`
/// segments; the last window is clipped to the end of the sequence.
pub fn window_ranges(len: usize, size: usize, overlap: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + size).min(len);
        windows.push(start..end);
        if end == len {
            break;
        }
        start += step;
    }
    windows
}

/// Runs overlapping windows concurrently and merges them in window order.
pub struct WindowOrchestrator {
    client: Arc<ProtocolClient>,
    splitter: Arc<FallbackSplitter>,
    concurrency: usize,
    cancel: CancelFlag,
}

impl WindowOrchestrator {
    pub fn new(
        client: Arc<ProtocolClient>,
        splitter: Arc<FallbackSplitter>,
        concurrency: usize,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            client,
            splitter,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Translate every speech segment. Results of later windows overwrite
    /// earlier ones on overlapping indices, regardless of completion order,
    /// unless the later window could only mark the segment untranslatable.
    pub async fn run(&self, segments: &[Segment], window_size: usize, overlap: usize) -> Result<Resolution> {
        let windows = window_ranges(segments.len(), window_size, overlap);
        info!(
            "Translating {} segments in {} windows (size {}, overlap {})",
            segments.len(),
            windows.len(),
            window_size,
            overlap
        );

        let progress = ProgressBar::new(windows.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} windows")
        {
            progress.set_style(style.progress_chars("#>-"));
        }

        let mut staged: Vec<(usize, Resolution)> = stream::iter(windows.into_iter().enumerate())
            .map(|(position, range)| {
                let progress = &progress;
                async move {
                    self.cancel.check()?;
                    let resolution = match self.client.translate(segments, range).await {
                        Ok(result) => Resolution::from(result),
                        Err(e) => self.splitter.resolve(segments, e).await?,
                    };
                    progress.inc(1);
                    Ok::<_, crate::error::YeokjaError>((position, resolution))
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        progress.finish_and_clear();

        staged.sort_by_key(|(position, _)| *position);
        let mut merged = Resolution::default();
        for (position, resolution) in staged {
            if !resolution.failures.is_empty() {
                warn!("Window {} needed {} fallback steps", position, resolution.failures.len());
            }
            merged.merge_window(resolution);
        }
        Ok(merged)
    }
}
