use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{Result, YeokjaError};

// Defaults for fields that older config files may not carry
fn default_context_segments() -> usize {
    3
}

fn default_single_segment_retries() -> u32 {
    1
}

fn default_untranslatable_marker() -> String {
    "[untranslated]".to_string()
}

fn default_prompt_keyword_limit() -> usize {
    400
}

fn default_source_language() -> String {
    "Korean".to_string()
}

fn default_max_segment_secs() -> f64 {
    7.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub transcriber: TranscriberConfig,
    pub translate: TranslateConfig,
    pub refine: RefineConfig,
    pub subtitle: SubtitleConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Path to the whisper command line tool
    pub binary_path: String,
    /// Whisper model name (tiny, base, small, medium, large)
    pub model: String,
    /// Spoken language of the audio
    pub language: String,
    /// Priming sentence handed to whisper before the reference keywords
    pub initial_prompt: String,
    /// Sampling temperature (0.0 is deterministic)
    pub temperature: f32,
    /// Maximum length of the generated priming prompt in characters
    #[serde(default = "default_prompt_keyword_limit")]
    pub prompt_keyword_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmProvider {
    /// OpenAI-compatible chat completions endpoint (OpenRouter, OpenAI, ...)
    OpenAiCompatible,
    /// Local Ollama server
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    pub provider: LlmProvider,
    /// Base URL of the LLM API
    pub endpoint: String,
    /// Model to use for translation
    pub model: String,
    /// Environment variable holding the API key (OpenAI-compatible only)
    pub api_key_env: String,
    /// Human readable source language put into the prompt
    #[serde(default = "default_source_language")]
    pub source_language: String,
    /// Human readable target language put into the prompt
    pub target_language: String,
    /// Optional reference document with names and keywords
    #[serde(default)]
    pub reference_file: Option<String>,
    /// Timeout for a single protocol call, in seconds
    pub request_timeout_secs: u64,
    /// Maximum number of LLM calls in flight
    pub concurrency: usize,
    /// Largest transcript (characters incl. prompt overhead) sent as one batch
    pub single_batch_max_chars: usize,
    /// Largest transcript (segments) sent as one batch
    pub single_batch_max_segments: usize,
    /// Segments per sliding window
    pub window_size: usize,
    /// Segments shared by consecutive windows
    pub window_overlap: usize,
    /// Coarse to fine split sizes used after a batch fails
    pub fallback_granularities: Vec<usize>,
    /// Neighbouring lines sent as read-only context with each batch
    #[serde(default = "default_context_segments")]
    pub context_segments: usize,
    /// Extra attempts for a single segment before it is marked unrecoverable
    #[serde(default = "default_single_segment_retries")]
    pub single_segment_retries: u32,
    /// Text written into segments that could not be translated
    #[serde(default = "default_untranslatable_marker")]
    pub untranslatable_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineConfig {
    /// Segments longer than this (in characters) are split
    pub max_segment_chars: usize,
    /// Segments lasting longer than this (seconds) are split
    #[serde(default = "default_max_segment_secs")]
    pub max_segment_secs: f64,
    /// Gaps longer than this (seconds) get a silence placeholder
    pub silence_gap_secs: f64,
    /// Text of silence placeholder segments
    pub silence_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleConfig {
    /// Minimum spacing between consecutive subtitles (seconds)
    pub buffer_secs: f64,
    /// Emit silence placeholders as visible subtitles instead of dropping them
    pub show_silence_markers: bool,
    /// Stretch each subtitle up to the next one (minus the buffer)
    pub extend_to_next: bool,
    /// Replace full-width comma and period with spaces
    pub strip_fullwidth_punctuation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Font used when burning subtitles
    pub font_name: String,
    pub font_size: u32,
    /// Outline width when no box background is used (0 for none)
    pub outline_width: u32,
    /// Draw a semi-transparent box behind subtitles instead of an outline
    pub box_background: bool,
    /// Additional encoding options for subtitle burn-in
    /// Common options: ["-preset", "medium", "-crf", "23"]
    pub subtitle_options: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transcriber: TranscriberConfig {
                binary_path: "whisper".to_string(),
                model: "large".to_string(),
                language: "ko".to_string(),
                initial_prompt: "This is a conversation in Korean and English.".to_string(),
                temperature: 0.0,
                prompt_keyword_limit: default_prompt_keyword_limit(),
            },
            translate: TranslateConfig {
                provider: LlmProvider::OpenAiCompatible,
                endpoint: "https://openrouter.ai/api/v1".to_string(),
                model: "google/gemini-2.5-pro".to_string(),
                api_key_env: "OPENROUTER_API_KEY".to_string(),
                source_language: default_source_language(),
                target_language: "Traditional Chinese (Taiwan)".to_string(),
                reference_file: None,
                request_timeout_secs: 300,
                concurrency: 4,
                single_batch_max_chars: 128_000,
                single_batch_max_segments: 1_000,
                window_size: 200,
                window_overlap: 3,
                fallback_granularities: vec![50, 10, 1],
                context_segments: default_context_segments(),
                single_segment_retries: default_single_segment_retries(),
                untranslatable_marker: default_untranslatable_marker(),
            },
            refine: RefineConfig {
                max_segment_chars: 40,
                max_segment_secs: default_max_segment_secs(),
                silence_gap_secs: 5.0,
                silence_marker: "[no speech]".to_string(),
            },
            subtitle: SubtitleConfig {
                buffer_secs: 0.1,
                show_silence_markers: false,
                extend_to_next: false,
                strip_fullwidth_punctuation: true,
            },
            media: MediaConfig {
                binary_path: "ffmpeg".to_string(),
                font_name: "PingFang TC".to_string(),
                font_size: 12,
                outline_width: 0,
                box_background: true,
                subtitle_options: Vec::new(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| YeokjaError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| YeokjaError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| YeokjaError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| YeokjaError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject settings the translation engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.translate.validate()?;

        if self.refine.max_segment_chars == 0 {
            return Err(YeokjaError::Config("refine.max_segment_chars must be positive".to_string()));
        }
        if self.refine.silence_marker.chars().count() > self.refine.max_segment_chars {
            return Err(YeokjaError::Config(
                "refine.silence_marker must fit within refine.max_segment_chars".to_string(),
            ));
        }
        if !(self.refine.max_segment_secs > 0.0) {
            return Err(YeokjaError::Config("refine.max_segment_secs must be positive".to_string()));
        }
        if !(self.refine.silence_gap_secs > 0.0) {
            return Err(YeokjaError::Config("refine.silence_gap_secs must be positive".to_string()));
        }
        if self.subtitle.buffer_secs < 0.0 {
            return Err(YeokjaError::Config("subtitle.buffer_secs must not be negative".to_string()));
        }
        Ok(())
    }
}

impl TranslateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(YeokjaError::Config("translate.window_size must be positive".to_string()));
        }
        if self.window_overlap >= self.window_size {
            return Err(YeokjaError::Config(format!(
                "translate.window_overlap ({}) must be smaller than translate.window_size ({})",
                self.window_overlap, self.window_size
            )));
        }
        if self.concurrency == 0 {
            return Err(YeokjaError::Config("translate.concurrency must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(YeokjaError::Config("translate.request_timeout_secs must be positive".to_string()));
        }
        if self.fallback_granularities.iter().any(|&g| g == 0) {
            return Err(YeokjaError::Config("translate.fallback_granularities must be positive".to_string()));
        }
        if self.fallback_granularities.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(YeokjaError::Config(
                "translate.fallback_granularities must be strictly decreasing".to_string(),
            ));
        }
        Ok(())
    }
}
