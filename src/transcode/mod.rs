//! Audio format conversion via an external ffmpeg binary.
//!
//! Downloads arrive in whatever container the feed serves; m4a is common and
//! some players only take mp3. This module defines the [`Transcoder`] trait
//! plus two implementations: [`CliTranscoder`] wrapping ffmpeg, and
//! [`NoOpTranscoder`] for graceful degradation when ffmpeg is absent.

mod cli;
mod noop;

pub use cli::CliTranscoder;
pub use noop::NoOpTranscoder;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::TranscodeError;

/// Audio container formats the store cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// MPEG layer 3
    Mp3,
    /// MPEG-4 audio (m4a, m4b)
    M4a,
    /// Raw AAC
    Aac,
}

impl AudioFormat {
    /// File extension used when writing this format
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Aac => "aac",
        }
    }
}

/// Detect the audio format of a file from its extension
pub fn detect_format(path: &Path) -> Option<AudioFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp3" => Some(AudioFormat::Mp3),
        "m4a" | "m4b" => Some(AudioFormat::M4a),
        "aac" => Some(AudioFormat::Aac),
        _ => None,
    }
}

/// Trait for audio format conversion
///
/// Implementations can wrap external binaries or provide stub functionality
/// for graceful degradation. Conversion failures never destroy the input
/// file; callers keep the original on any error.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Human-readable name for logging and capability reporting
    fn name(&self) -> &'static str;

    /// Whether this transcoder can actually perform conversions
    fn is_available(&self) -> bool;

    /// Convert `input` to mp3, writing to `output` (or `input` with an
    /// `.mp3` extension when `None`). Returns the path of the produced file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The transcoder is unavailable ([`TranscodeError::Unavailable`])
    /// - The input file is missing or not a convertible format
    /// - The encoder fails or exceeds the configured timeout
    async fn convert(
        &self,
        input: &Path,
        output: Option<PathBuf>,
    ) -> Result<PathBuf, TranscodeError>;
}

/// Output path for a conversion: explicit target, or input with `.mp3`
pub(crate) fn output_path_for(input: &Path, output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| input.with_extension(AudioFormat::Mp3.extension()))
}
