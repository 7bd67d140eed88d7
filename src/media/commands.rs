use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::config::MediaConfig;
use crate::error::{Result, YeokjaError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Execute the command
    pub async fn execute(&self) -> Result<()> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| YeokjaError::Media(format!("Failed to execute media processor: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(YeokjaError::Media(format!("{} failed: {}", self.description, stderr)));
        }

        Ok(())
    }
}

/// Escape a path for use inside an ffmpeg filter argument.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// ASS `force_style` value for the subtitles filter.
pub fn force_style(config: &MediaConfig) -> String {
    if config.box_background {
        format!(
            "FontName={},FontSize={},Outline=3,Shadow=0,BorderStyle=3,BackColour=&H80000000",
            config.font_name, config.font_size
        )
    } else {
        format!(
            "FontName={},FontSize={},Outline={},Shadow=0,BorderStyle=1",
            config.font_name, config.font_size, config.outline_width
        )
    }
}

/// Builder for the ffmpeg invocations the pipeline needs
pub struct MediaCommandBuilder {
    config: MediaConfig,
}

impl MediaCommandBuilder {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Re-encode the video with the subtitles drawn onto the frames.
    pub fn burn_subtitles<P: AsRef<Path>>(&self, video_path: P, subtitle_path: P, output_path: P) -> MediaCommand {
        let filter = format!(
            "subtitles='{}':force_style='{}'",
            escape_filter_path(subtitle_path.as_ref()),
            force_style(&self.config)
        );

        MediaCommand::new(&self.config.binary_path, "Subtitle burn-in")
            .overwrite()
            .input(video_path)
            .video_filter(filter)
            .video_codec("libx264")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .audio_codec("aac")
            .args(self.config.subtitle_options.iter().cloned())
            .output(output_path)
    }

    pub fn extract_audio<P: AsRef<Path>>(&self, video_path: P, audio_path: P) -> MediaCommand {
        MediaCommand::new(&self.config.binary_path, "Audio extraction")
            .input(video_path)
            .no_video()
            .audio_codec("pcm_s16le")
            .audio_sample_rate(16000)
            .audio_channels(1)
            .overwrite()
            .output(audio_path)
    }

    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.config.binary_path, "Version check").arg("-version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(escape_filter_path(Path::new("C:\\subs\\a.srt")), "C\\:/subs/a.srt");
        assert_eq!(escape_filter_path(Path::new("/tmp/it's.srt")), "/tmp/it\\'s.srt");
    }

    #[test]
    fn test_force_style_variants() {
        let mut config = Config::default().media;
        assert_eq!(
            force_style(&config),
            "FontName=PingFang TC,FontSize=12,Outline=3,Shadow=0,BorderStyle=3,BackColour=&H80000000"
        );

        config.box_background = false;
        config.outline_width = 2;
        assert_eq!(force_style(&config), "FontName=PingFang TC,FontSize=12,Outline=2,Shadow=0,BorderStyle=1");
    }

    #[test]
    fn test_burn_subtitles_command() {
        let mut config = Config::default().media;
        config.subtitle_options = vec!["-crf".to_string(), "23".to_string()];
        let command = MediaCommandBuilder::new(config).burn_subtitles(
            Path::new("in.mp4"),
            Path::new("subs.srt"),
            Path::new("out.mp4"),
        );

        assert_eq!(command.binary_path, "ffmpeg");
        assert_eq!(&command.args[..3], ["-y", "-i", "in.mp4"]);
        assert!(command.args.contains(&"libx264".to_string()));
        assert!(command.args[4].starts_with("subtitles='subs.srt':force_style='FontName=PingFang TC"));
        let tail: Vec<&str> = command.args.iter().rev().take(3).map(String::as_str).collect();
        assert_eq!(tail, ["out.mp4", "23", "-crf"]);
    }

    #[test]
    fn test_extract_audio_command() {
        let command =
            MediaCommandBuilder::new(Config::default().media).extract_audio(Path::new("in.mp4"), Path::new("a.wav"));
        assert_eq!(
            command.args,
            ["-i", "in.mp4", "-vn", "-c:a", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y", "a.wav"]
        );
    }
}
