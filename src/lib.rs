//! yeokja - Korean video to translated subtitles
//!
//! Extracts audio with ffmpeg, transcribes it with Whisper, translates the
//! transcript with an LLM in strict JSON batches (sliding windows and
//! recursive fallback for failed batches), and burns the subtitles back into
//! the video.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod reference;
pub mod refine;
pub mod segment;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
pub mod workflow;
