use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tokio::fs;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::error::{Result, YeokjaError};
use crate::media::{MediaProcessorFactory, MediaProcessorTrait};
use crate::reference::ReferenceContext;
use crate::refine::SegmentRefiner;
use crate::segment::{RawSegment, Segment};
use crate::subtitle::{SubtitleAssembler, read_srt, write_srt};
use crate::transcribe::{TranscriberFactory, TranscriberTrait};
use crate::translate::{BackendFactory, LlmBackend, TranslationEngine, TranslationReport};

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];
const TRANSLATED_SUFFIX: &str = "_translated";

/// Files written for one processed video.
#[derive(Debug, Clone)]
pub struct ProcessOutputs {
    pub subtitle_path: PathBuf,
    pub video_path: PathBuf,
    pub report: TranslationReport,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
}

pub struct Workflow {
    config: Config,
    transcriber: Box<dyn TranscriberTrait>,
    media: Box<dyn MediaProcessorTrait>,
    backend: Option<Arc<dyn LlmBackend>>,
    cancel: CancelFlag,
}

impl Workflow {
    pub fn new(config: Config, cancel: CancelFlag) -> Self {
        let transcriber = TranscriberFactory::create_default(config.transcriber.clone());
        let media = MediaProcessorFactory::create_processor(config.media.clone());
        Self::with_components(config, transcriber, media, cancel)
    }

    pub fn with_components(
        config: Config,
        transcriber: Box<dyn TranscriberTrait>,
        media: Box<dyn MediaProcessorTrait>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            config,
            transcriber,
            media,
            backend: None,
            cancel,
        }
    }

    /// Use this backend instead of building one from the configuration.
    pub fn with_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Fail before any work starts when an external tool is missing.
    pub async fn check_dependencies(&self) -> Result<()> {
        self.media.check_availability().await?;
        self.transcriber.check_availability().await?;
        Ok(())
    }

    /// Process a single video file with subtitle translation
    pub async fn process_single_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_dir: Option<Q>,
    ) -> Result<ProcessOutputs> {
        let input_path = input_path.as_ref();
        info!("Processing single file: {}", input_path.display());

        if !input_path.exists() {
            return Err(YeokjaError::FileNotFound(input_path.display().to_string()));
        }

        let output_dir = match output_dir {
            Some(dir) => dir.as_ref().to_path_buf(),
            None => input_path
                .parent()
                .ok_or_else(|| YeokjaError::Config("Cannot determine output directory".to_string()))?
                .to_path_buf(),
        };
        fs::create_dir_all(&output_dir).await?;

        self.process_video_file(input_path, &output_dir).await
    }

    /// Process all video files in a directory. A failing file does not stop
    /// the batch; cancellation does.
    pub async fn process_directory<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_dir: P,
        output_dir: Option<Q>,
    ) -> Result<BatchSummary> {
        let input_dir = input_dir.as_ref();
        info!("Processing directory: {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(YeokjaError::Config("Input path is not a directory".to_string()));
        }

        let output_dir = match output_dir {
            Some(dir) => dir.as_ref().to_path_buf(),
            None => input_dir.to_path_buf(),
        };
        fs::create_dir_all(&output_dir).await?;

        let video_files = find_videos(input_dir);
        info!("Found {} video files to process", video_files.len());

        let mut summary = BatchSummary::default();
        for video_path in video_files {
            self.cancel.check()?;
            match self.process_video_file(&video_path, &output_dir).await {
                Ok(_) => {
                    summary.processed += 1;
                    info!("Successfully processed: {}", video_path.display());
                }
                Err(YeokjaError::Cancelled) => return Err(YeokjaError::Cancelled),
                Err(e) => {
                    summary.failed += 1;
                    warn!("Failed to process {}: {}", video_path.display(), e);
                }
            }
        }

        info!("Batch finished: {} processed, {} failed", summary.processed, summary.failed);
        Ok(summary)
    }

    async fn process_video_file(&self, video_path: &Path, output_dir: &Path) -> Result<ProcessOutputs> {
        let video_stem = video_path
            .file_stem()
            .ok_or_else(|| YeokjaError::Config("Invalid video filename".to_string()))?
            .to_string_lossy()
            .to_string();
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let subtitle_path = output_dir.join(format!("{}_{}_subtitles.srt", video_stem, timestamp));
        let output_video = output_dir.join(format!("{}_{}{}.mp4", video_stem, timestamp, TRANSLATED_SUFFIX));

        let reference = self.load_reference().await;

        // Step 1: extract audio into a temporary file, removed on drop
        let audio = tempfile::Builder::new().prefix("yeokja_").suffix(".wav").tempfile()?.into_temp_path();
        self.media.extract_audio(video_path, &audio).await?;
        self.cancel.check()?;

        // Step 2: transcribe
        let prompt = reference.whisper_prompt(
            &self.config.transcriber.initial_prompt,
            self.config.transcriber.prompt_keyword_limit,
        );
        let raw = self.transcriber.transcribe(&audio, &prompt).await?;
        drop(audio);
        self.cancel.check()?;

        // Step 3: refine and translate
        let (segments, report) = self.translate_segments(raw, reference).await?;

        // Step 4: subtitles
        let records = SubtitleAssembler::new(self.config.subtitle.clone()).assemble(&segments);
        write_srt(&records, &subtitle_path).await?;
        self.cancel.check()?;

        // Step 5: burn into the video
        self.media.burn_subtitles(video_path, &subtitle_path, &output_video).await?;

        info!("Finished {} -> {}", video_path.display(), output_video.display());
        Ok(ProcessOutputs {
            subtitle_path,
            video_path: output_video,
            report,
        })
    }

    /// Refine raw segments and run the translation engine over them.
    pub async fn translate_segments(
        &self,
        raw: Vec<RawSegment>,
        reference: ReferenceContext,
    ) -> Result<(Vec<Segment>, TranslationReport)> {
        let mut segments = SegmentRefiner::new(self.config.refine.clone()).refine(raw);
        if segments.iter().all(Segment::is_silence) {
            return Err(YeokjaError::EmptyTranscript);
        }

        let backend = self.backend().await?;
        let engine = TranslationEngine::new(
            backend,
            Arc::new(reference),
            self.config.translate.clone(),
            self.cancel.clone(),
        );
        let report = engine.translate(&mut segments).await?;
        Ok((segments, report))
    }

    async fn backend(&self) -> Result<Arc<dyn LlmBackend>> {
        if let Some(backend) = &self.backend {
            return Ok(backend.clone());
        }
        let backend = BackendFactory::create_backend(&self.config.translate)?;
        backend
            .check_availability()
            .await
            .map_err(|e| YeokjaError::Translation(format!("{} unavailable: {}", backend.name(), e)))?;
        Ok(backend)
    }

    async fn load_reference(&self) -> ReferenceContext {
        match &self.config.translate.reference_file {
            Some(path) => ReferenceContext::load(path).await,
            None => ReferenceContext::default(),
        }
    }

    /// Extract audio from video file
    pub async fn extract_audio<P: AsRef<Path>>(&self, video_path: P, audio_path: P) -> Result<()> {
        self.media.extract_audio(video_path.as_ref(), audio_path.as_ref()).await
    }

    /// Transcribe an audio file into a source-language SRT file
    pub async fn transcribe_audio<P: AsRef<Path>>(&self, audio_path: P, output_path: P) -> Result<()> {
        let reference = self.load_reference().await;
        let prompt = reference.whisper_prompt(
            &self.config.transcriber.initial_prompt,
            self.config.transcriber.prompt_keyword_limit,
        );
        let raw = self.transcriber.transcribe(audio_path.as_ref(), &prompt).await?;

        let segments = SegmentRefiner::new(self.config.refine.clone()).refine(raw);
        if segments.iter().all(Segment::is_silence) {
            return Err(YeokjaError::EmptyTranscript);
        }
        let records = SubtitleAssembler::new(self.config.subtitle.clone()).assemble(&segments);
        write_srt(&records, output_path).await
    }

    /// Translate an existing SRT file into another SRT file
    pub async fn translate_subtitles<P: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: P,
    ) -> Result<TranslationReport> {
        let raw = read_srt(input_path).await?;
        let reference = self.load_reference().await;
        let (segments, report) = self.translate_segments(raw, reference).await?;

        let records = SubtitleAssembler::new(self.config.subtitle.clone()).assemble(&segments);
        write_srt(&records, output_path).await?;
        Ok(report)
    }

    /// Burn an SRT file into a video
    pub async fn embed_subtitles<P: AsRef<Path>>(&self, video_path: P, subtitles_path: P, output_path: P) -> Result<()> {
        self.media
            .burn_subtitles(video_path.as_ref(), subtitles_path.as_ref(), output_path.as_ref())
            .await
    }
}

/// Video files under `dir`, skipping files this tool produced.
fn find_videos(dir: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let is_video = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
            let is_ours = path
                .file_stem()
                .is_some_and(|stem| stem.to_string_lossy().ends_with(TRANSLATED_SUFFIX));
            is_video && !is_ours
        })
        .collect();
    videos.sort();
    videos
}
