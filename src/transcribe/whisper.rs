// OpenAI Whisper command line implementation

use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::TranscriberTrait;
use crate::config::TranscriberConfig;
use crate::error::{Result, YeokjaError};
use crate::segment::{RawSegment, WordTiming};

/// Whisper JSON output, reduced to what the pipeline reads
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    words: Vec<WhisperWord>,
}

#[derive(Debug, Deserialize)]
struct WhisperWord {
    word: String,
    start: f64,
    end: f64,
}

/// Map whisper's JSON output to raw segments, keeping word timings.
pub fn parse_whisper_output(json: &str) -> Result<Vec<RawSegment>> {
    let output: WhisperOutput = serde_json::from_str(json)
        .map_err(|e| YeokjaError::Transcriber(format!("Failed to parse Whisper JSON: {}", e)))?;

    Ok(output
        .segments
        .into_iter()
        .map(|segment| RawSegment {
            start: segment.start,
            end: segment.end,
            text: segment.text.trim().to_string(),
            words: segment
                .words
                .into_iter()
                .filter(|w| !w.word.trim().is_empty())
                .map(|w| WordTiming {
                    word: w.word.trim().to_string(),
                    start: w.start,
                    end: w.end,
                })
                .collect(),
        })
        .collect())
}

pub struct WhisperTranscriber {
    config: TranscriberConfig,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, audio_path: &Path, output_dir: &Path, prompt: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![audio_path.into()];
        let options = [
            ("--model", self.config.model.clone()),
            ("--language", self.config.language.clone()),
            ("--initial_prompt", prompt.to_string()),
            ("--temperature", self.config.temperature.to_string()),
            ("--word_timestamps", "True".to_string()),
            ("--output_format", "json".to_string()),
            ("--fp16", "False".to_string()),
        ];
        for (flag, value) in options {
            args.push(flag.into());
            args.push(value.into());
        }
        args.push("--output_dir".into());
        args.push(output_dir.into());
        args
    }
}

#[async_trait]
impl TranscriberTrait for WhisperTranscriber {
    async fn check_availability(&self) -> Result<()> {
        let output = Command::new(&self.config.binary_path)
            .arg("--help")
            .output()
            .await
            .map_err(|e| YeokjaError::Transcriber(format!("{} command not found: {}", self.config.binary_path, e)))?;

        if output.status.success() {
            info!("Whisper command-line tool is available");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(YeokjaError::Transcriber(format!(
                "Whisper not available. Install with: pip install openai-whisper\nError: {}",
                stderr
            )))
        }
    }

    async fn transcribe(&self, audio_path: &Path, prompt: &str) -> Result<Vec<RawSegment>> {
        if !audio_path.exists() {
            return Err(YeokjaError::FileNotFound(audio_path.display().to_string()));
        }

        let temp_dir = tempfile::tempdir()
            .map_err(|e| YeokjaError::Transcriber(format!("Failed to create temp directory: {}", e)))?;
        let output_dir = temp_dir.path();

        info!(
            "Transcribing {} with whisper model '{}'",
            audio_path.display(),
            self.config.model
        );
        debug!("Whisper prompt: {}", prompt);

        let output = Command::new(&self.config.binary_path)
            .args(self.build_args(audio_path, output_dir, prompt))
            .output()
            .await
            .map_err(|e| YeokjaError::Transcriber(format!("Failed to execute whisper command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(YeokjaError::Transcriber(format!("Whisper transcription failed: {}", stderr)));
        }

        let audio_stem = audio_path
            .file_stem()
            .ok_or_else(|| YeokjaError::Transcriber("Invalid audio filename".to_string()))?;
        let json_file = output_dir.join(format!("{}.json", audio_stem.to_string_lossy()));
        let json_content = tokio::fs::read_to_string(&json_file)
            .await
            .map_err(|e| YeokjaError::Transcriber(format!("Whisper JSON output not readable: {}", e)))?;

        let segments = parse_whisper_output(&json_content)?;
        info!("Whisper produced {} segments", segments.len());
        Ok(segments)
    }
}
