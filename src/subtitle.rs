use std::path::Path;

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info};

use crate::config::SubtitleConfig;
use crate::error::{Result, YeokjaError};
use crate::segment::{RawSegment, Segment};

const FULLWIDTH_PUNCTUATION: [char; 2] = ['，', '。'];

/// One numbered subtitle, ready to be written as SRT.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleRecord {
    pub number: usize,
    pub source_index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Turns the translated canonical sequence into subtitle records.
pub struct SubtitleAssembler {
    config: SubtitleConfig,
}

impl SubtitleAssembler {
    pub fn new(config: SubtitleConfig) -> Self {
        Self { config }
    }

    /// Timing is worked out over the whole sequence, silence included, before
    /// silence records are dropped, so dropping never moves another record.
    pub fn assemble(&self, segments: &[Segment]) -> Vec<SubtitleRecord> {
        let buffer = self.config.buffer_secs;
        let mut records = Vec::with_capacity(segments.len());

        for (i, segment) in segments.iter().enumerate() {
            let mut end = segment.end;
            if let Some(next) = segments.get(i + 1) {
                if self.config.extend_to_next || next.start - end < buffer {
                    end = next.start - buffer;
                }
                if end <= segment.start {
                    end = next.start;
                }
            }

            if segment.is_silence() && !self.config.show_silence_markers {
                continue;
            }

            let text = if segment.translated_text.is_empty() {
                &segment.source_text
            } else {
                &segment.translated_text
            };
            records.push(SubtitleRecord {
                number: records.len() + 1,
                source_index: segment.index,
                start: segment.start,
                end,
                text: self.clean_text(text),
            });
        }

        debug!("Assembled {} subtitle records from {} segments", records.len(), segments.len());
        records
    }

    fn clean_text(&self, text: &str) -> String {
        if self.config.strip_fullwidth_punctuation {
            text.replace(FULLWIDTH_PUNCTUATION, " ").trim().to_string()
        } else {
            text.trim().to_string()
        }
    }
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too).
pub fn parse_srt_time(value: &str) -> Option<f64> {
    let (clock, millis) = value.trim().split_once([',', '.'])?;
    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let secs: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || secs >= 60 {
        return None;
    }
    let millis: u64 = millis.trim().parse().ok()?;
    Some((hours * 3600 + minutes * 60 + secs) as f64 + millis as f64 / 1000.0)
}

pub fn render_srt(records: &[SubtitleRecord]) -> String {
    let mut srt_content = String::new();
    for record in records {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            record.number,
            format_srt_time(record.start),
            format_srt_time(record.end),
            record.text
        ));
    }
    srt_content
}

/// Write SRT subtitle file
pub async fn write_srt<P: AsRef<Path>>(records: &[SubtitleRecord], output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating SRT file: {}", output_path.display());

    fs::write(output_path, render_srt(records)).await?;

    info!("SRT file with {} subtitles generated", records.len());
    Ok(())
}

/// Read an existing SRT file back into raw segments, e.g. to translate
/// subtitles produced elsewhere.
pub fn parse_srt(content: &str) -> Result<Vec<RawSegment>> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut segments = Vec::new();

    for block in content.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
        let mut lines = block.lines();
        let mut timing = lines.next().unwrap_or_default();
        if !timing.contains("-->") {
            // numbered block
            timing = lines.next().unwrap_or_default();
        }
        let (start, end) = timing
            .split_once("-->")
            .and_then(|(start, end)| Some((parse_srt_time(start)?, parse_srt_time(end)?)))
            .ok_or_else(|| YeokjaError::Subtitle(format!("invalid timing line: {:?}", timing)))?;

        let text = lines.map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join(" ");
        segments.push(RawSegment::new(start, end, text));
    }

    Ok(segments)
}

pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<Vec<RawSegment>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(YeokjaError::FileNotFound(path.display().to_string()));
    }
    parse_srt(&fs::read_to_string(path).await?)
}
