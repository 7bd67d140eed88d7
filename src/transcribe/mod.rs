// Transcription providers
//
// The pipeline only needs raw timed segments from a transcriber. Providers
// are created through a factory so other engines can be added next to the
// whisper command line tool.

pub mod whisper;

use async_trait::async_trait;
use std::path::Path;

use crate::config::TranscriberConfig;
use crate::error::Result;
use crate::segment::RawSegment;

/// Main trait for transcription operations
#[async_trait]
pub trait TranscriberTrait: Send + Sync {
    /// Fail early when the provider cannot run at all
    async fn check_availability(&self) -> Result<()>;

    /// Transcribe an audio file, priming the model with `prompt`
    async fn transcribe(&self, audio_path: &Path, prompt: &str) -> Result<Vec<RawSegment>>;
}

/// Transcriber implementation type
#[derive(Debug, Clone, Copy, Default)]
pub enum TranscriberImplementation {
    /// OpenAI Whisper command line tool
    #[default]
    WhisperCli,
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_transcriber(
        implementation: TranscriberImplementation,
        config: TranscriberConfig,
    ) -> Box<dyn TranscriberTrait> {
        match implementation {
            TranscriberImplementation::WhisperCli => Box::new(whisper::WhisperTranscriber::new(config)),
        }
    }

    pub fn create_default(config: TranscriberConfig) -> Box<dyn TranscriberTrait> {
        Self::create_transcriber(TranscriberImplementation::default(), config)
    }
}
