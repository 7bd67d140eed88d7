use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (defaults to ./yeokja.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Per-run overrides of the translation settings
#[derive(clap::Args, Debug, Default, Clone)]
pub struct TranslateOverrides {
    /// Target language put into the translation prompt
    #[arg(short, long)]
    pub target_lang: Option<String>,

    /// Reference document with names and keywords
    #[arg(short, long)]
    pub reference: Option<PathBuf>,

    /// LLM model identifier
    #[arg(short, long)]
    pub model: Option<String>,
}

impl TranslateOverrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(target) = &self.target_lang {
            config.translate.target_language = target.clone();
        }
        if let Some(reference) = &self.reference {
            config.translate.reference_file = Some(reference.to_string_lossy().to_string());
        }
        if let Some(model) = &self.model {
            config.translate.model = model.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe, translate and burn subtitles into a single video
    Process {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for processed files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        overrides: TranslateOverrides,
    },

    /// Process all video files in a directory
    Batch {
        /// Input directory containing video files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Output directory for processed files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        overrides: TranslateOverrides,
    },

    /// Extract audio from video file
    Extract {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output audio file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Transcribe audio into a source-language SRT file
    Transcribe {
        /// Input audio file
        #[arg(short, long)]
        input: PathBuf,

        /// Output SRT file
        #[arg(short, long)]
        output: PathBuf,

        /// Reference document used to prime the transcriber
        #[arg(short, long)]
        reference: Option<PathBuf>,
    },

    /// Translate an SRT file
    Translate {
        /// Input SRT file
        #[arg(short, long)]
        input: PathBuf,

        /// Output translated SRT file
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        overrides: TranslateOverrides,
    },

    /// Burn subtitles into video file
    Embed {
        /// Input video file
        #[arg(short, long)]
        video: PathBuf,

        /// Subtitle file
        #[arg(short, long)]
        subtitles: PathBuf,

        /// Output video file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "yeokja.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
