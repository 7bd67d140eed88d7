use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::{MediaCommandBuilder, MediaProcessorTrait};
use crate::config::MediaConfig;
use crate::error::{Result, YeokjaError};

/// Concrete implementation of media processor (FFmpeg-based)
pub struct MediaProcessorImpl {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(config.clone());
        Self { config, command_builder }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn burn_subtitles(&self, video_path: &Path, subtitle_path: &Path, output_path: &Path) -> Result<()> {
        if !subtitle_path.exists() {
            return Err(YeokjaError::FileNotFound(subtitle_path.display().to_string()));
        }
        info!(
            "Burning subtitles from {} into {} -> {}",
            subtitle_path.display(),
            video_path.display(),
            output_path.display()
        );

        self.command_builder
            .burn_subtitles(video_path, subtitle_path, output_path)
            .execute()
            .await?;

        info!("Subtitle burn-in completed");
        Ok(())
    }

    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()> {
        if !video_path.exists() {
            return Err(YeokjaError::FileNotFound(video_path.display().to_string()));
        }
        info!("Extracting audio from {} to {}", video_path.display(), audio_path.display());

        self.command_builder.extract_audio(video_path, audio_path).execute().await?;

        info!("Audio extraction completed");
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        let command = self.command_builder.version_check();
        let output = Command::new(&command.binary_path)
            .args(&command.args)
            .output()
            .await
            .map_err(|e| YeokjaError::Media(format!("{} not found: {}", self.config.binary_path, e)))?;

        if output.status.success() {
            let version_info = String::from_utf8_lossy(&output.stdout);
            debug!("{}", version_info.lines().next().unwrap_or("Unknown version"));
            info!("Media processor is available");
            Ok(())
        } else {
            Err(YeokjaError::Media("Media processor version check failed".to_string()))
        }
    }
}
