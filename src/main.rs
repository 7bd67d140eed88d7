//! yeokja - Korean video to translated subtitles
//!
//! Entry point: parses the command line, sets up logging and configuration,
//! then hands the selected command to the workflow.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use yeokja::cancel::CancelFlag;
use yeokja::cli::{Args, Commands};
use yeokja::config::Config;
use yeokja::translate::TranslationReport;
use yeokja::workflow::Workflow;

const DEFAULT_CONFIG_FILE: &str = "yeokja.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;
    info!("Starting yeokja");

    if let Commands::InitConfig { output, force } = &args.command {
        return init_config(output, *force);
    }

    let mut config = load_config(args.config.as_deref())?;

    let cancel = CancelFlag::new();
    cancel.cancel_on_ctrl_c();

    match args.command {
        Commands::Process { input, output_dir, overrides } => {
            overrides.apply(&mut config);
            config.validate()?;
            let workflow = Workflow::new(config, cancel);
            workflow.check_dependencies().await?;

            let outputs = workflow.process_single_file(&input, output_dir.as_ref()).await?;
            print_report(&outputs.report);
            println!("Subtitles: {}", outputs.subtitle_path.display());
            println!("Video:     {}", outputs.video_path.display());
        }
        Commands::Batch { input_dir, output_dir, overrides } => {
            overrides.apply(&mut config);
            config.validate()?;
            let workflow = Workflow::new(config, cancel);
            workflow.check_dependencies().await?;

            let summary = workflow.process_directory(&input_dir, output_dir.as_ref()).await?;
            println!("Processed {} videos, {} failed", summary.processed, summary.failed);
        }
        Commands::Extract { input, output } => {
            info!("Extracting audio from: {}", input.display());
            Workflow::new(config, cancel).extract_audio(&input, &output).await?;
        }
        Commands::Transcribe { input, output, reference } => {
            info!("Transcribing audio: {}", input.display());
            if let Some(reference) = reference {
                config.translate.reference_file = Some(reference.to_string_lossy().to_string());
            }
            Workflow::new(config, cancel).transcribe_audio(&input, &output).await?;
        }
        Commands::Translate { input, output, overrides } => {
            info!("Translating subtitles: {}", input.display());
            overrides.apply(&mut config);
            config.validate()?;

            let report = Workflow::new(config, cancel).translate_subtitles(&input, &output).await?;
            print_report(&report);
        }
        Commands::Embed { video, subtitles, output } => {
            info!("Burning subtitles into video: {}", video.display());
            Workflow::new(config, cancel).embed_subtitles(&video, &subtitles, &output).await?;
        }
        Commands::InitConfig { .. } => {}
    }

    info!("yeokja finished successfully");
    Ok(())
}

/// `--config`, then `./yeokja.toml`, then built-in defaults.
fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
            Ok(Config::from_file(DEFAULT_CONFIG_FILE)?)
        }
        None => Ok(Config::default()),
    }
}

fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite it", output.display());
    }
    Config::default().save_to_file(output)?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}

fn print_report(report: &TranslationReport) {
    println!(
        "Translated {} speech segments ({} silence) using {:?}",
        report.speech_segments, report.silence_segments, report.strategy
    );
    if !report.failures.is_empty() {
        println!("Fallback steps: {}", report.failures.len());
    }
    if !report.unrecoverable.is_empty() {
        warn!("Untranslated segments: {:?}", report.unrecoverable);
        println!("Untranslated segments: {:?}", report.unrecoverable);
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".yeokja").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "yeokja.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("yeokja.log").display()
    );
    Ok(())
}
