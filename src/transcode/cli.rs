//! CLI-based transcoder using the external ffmpeg binary

use super::{AudioFormat, Transcoder, detect_format, output_path_for};
use crate::config::TranscodeConfig;
use crate::error::TranscodeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// CLI-based transcoder using the external ffmpeg binary
///
/// Prefers the libmp3lame encoder when the installed ffmpeg carries it,
/// falling back to the builtin mp3 encoder with a bitrate derived from the
/// configured quality level. Each invocation runs under a hard timeout.
pub struct CliTranscoder {
    binary_path: PathBuf,
    quality: u8,
    threads: u32,
    timeout: Duration,
}

impl CliTranscoder {
    /// Create a transcoder with an explicit ffmpeg path
    pub fn new(binary_path: PathBuf, config: &TranscodeConfig) -> Self {
        Self {
            binary_path,
            quality: config.quality.min(9),
            threads: config.threads,
            timeout: config.timeout,
        }
    }

    /// Attempt to find ffmpeg per the configuration
    ///
    /// An explicit `ffmpeg_path` wins; otherwise PATH is searched when
    /// `search_path` is set. Returns `None` when no binary is found.
    pub fn from_config(config: &TranscodeConfig) -> Option<Self> {
        let path = match &config.ffmpeg_path {
            Some(explicit) => explicit.exists().then(|| explicit.clone()),
            None if config.search_path => which::which("ffmpeg").ok(),
            None => None,
        }?;
        Some(Self::new(path, config))
    }

    /// Whether the installed ffmpeg has the libmp3lame encoder
    async fn has_libmp3lame(&self) -> bool {
        let output = Command::new(&self.binary_path)
            .args(["-hide_banner", "-encoders"])
            .output()
            .await;
        match output {
            Ok(out) => String::from_utf8_lossy(&out.stdout).contains("libmp3lame"),
            Err(_) => false,
        }
    }

    /// Bitrate for the builtin mp3 encoder at a given quality level
    fn bitrate_for_quality(quality: u8) -> &'static str {
        match quality {
            0 => "320k",
            1 => "288k",
            2 => "256k",
            3 => "224k",
            4 => "208k",
            5 => "192k",
            6 => "176k",
            7 => "160k",
            8 => "144k",
            _ => "128k",
        }
    }
}

#[async_trait]
impl Transcoder for CliTranscoder {
    fn name(&self) -> &'static str {
        "cli-ffmpeg"
    }

    fn is_available(&self) -> bool {
        self.binary_path.exists()
    }

    async fn convert(
        &self,
        input: &Path,
        output: Option<PathBuf>,
    ) -> Result<PathBuf, TranscodeError> {
        if !input.exists() {
            return Err(TranscodeError::InputMissing(input.to_path_buf()));
        }
        match detect_format(input) {
            Some(AudioFormat::M4a) | Some(AudioFormat::Aac) => {}
            Some(AudioFormat::Mp3) => {
                return Err(TranscodeError::UnsupportedFormat {
                    path: input.to_path_buf(),
                    format: "mp3".to_string(),
                });
            }
            None => {
                return Err(TranscodeError::UnsupportedFormat {
                    path: input.to_path_buf(),
                    format: input
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("unknown")
                        .to_string(),
                });
            }
        }

        let output = output_path_for(input, output);

        let mut command = Command::new(&self.binary_path);
        command
            .arg("-y")
            .args(["-threads", &self.threads.to_string()])
            .arg("-i")
            .arg(input);

        if self.has_libmp3lame().await {
            command
                .args(["-codec:a", "libmp3lame"])
                .args(["-qscale:a", &self.quality.to_string()]);
        } else {
            debug!("libmp3lame not found, using builtin mp3 encoder");
            command
                .args(["-codec:a", "mp3"])
                .args(["-b:a", Self::bitrate_for_quality(self.quality)]);
        }

        // Carry the source tags (title, artist, cover) into the mp3.
        command.args(["-map_metadata", "0"]).arg(&output);

        info!(
            input = %input.display(),
            output = %output.display(),
            "Converting audio file"
        );

        let result = tokio::time::timeout(self.timeout, command.output()).await;
        let process_output = match result {
            Ok(run) => run?,
            Err(_) => {
                // Kill leaves a partial output file behind; remove it.
                let _ = tokio::fs::remove_file(&output).await;
                return Err(TranscodeError::Timeout {
                    input: input.to_path_buf(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !process_output.status.success() {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(TranscodeError::Failed {
                input: input.to_path_buf(),
                stderr: String::from_utf8_lossy(&process_output.stderr)
                    .trim()
                    .to_string(),
            });
        }

        Ok(output)
    }
}
