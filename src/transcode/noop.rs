//! No-op transcoder for graceful degradation

use super::Transcoder;
use crate::error::TranscodeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// No-op transcoder used when ffmpeg is unavailable
///
/// Downloads still work without a transcoder; only explicit conversion
/// requests fail, with [`TranscodeError::Unavailable`]. Monitor and
/// download-latest tasks record the failure on the episode result and keep
/// the original file.
pub struct NoOpTranscoder;

#[async_trait]
impl Transcoder for NoOpTranscoder {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn convert(
        &self,
        _input: &Path,
        _output: Option<PathBuf>,
    ) -> Result<PathBuf, TranscodeError> {
        Err(TranscodeError::Unavailable)
    }
}
