use crate::error::TranscodeError;
use process_wrap::tokio::{KillOnDrop, TokioCommandWrap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tone_ml::audio::TARGET_SAMPLE_RATE;

/// Converts arbitrary audio containers to WAV with an external `ffmpeg`.
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout,
        }
    }

    /// Transcode `input` to a mono WAV file at [TARGET_SAMPLE_RATE], written to `output`.
    ///
    /// The `ffmpeg` process is killed if it doesn't finish within the configured timeout.
    #[tracing::instrument(skip(self))]
    pub async fn to_mono_wav(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let sample_rate = TARGET_SAMPLE_RATE.to_string();
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(input)
            .args(["-ar", sample_rate.as_str(), "-ac", "1", "-f", "wav"])
            .arg(output)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut wrapped = TokioCommandWrap::from(cmd);
        wrapped.wrap(KillOnDrop);

        #[cfg(unix)]
        {
            wrapped.wrap(process_wrap::tokio::ProcessGroup::leader());
        }
        #[cfg(windows)]
        {
            wrapped.wrap(process_wrap::tokio::JobObject);
        }

        let child = wrapped.spawn().map_err(|e| TranscodeError::Spawn { message: e.to_string() })?;

        // Dropping the child on timeout kills it.
        let result = tokio::time::timeout(self.timeout, Box::into_pin(child.wait_with_output())).await;
        let Ok(result) = result else {
            tracing::warn!(timeout = ?self.timeout, "Killed ffmpeg after timeout");
            return Err(TranscodeError::Timeout { after: self.timeout });
        };
        let process_output = result?;

        if !process_output.status.success() {
            return Err(TranscodeError::Failed {
                status: process_output.status.to_string(),
                stderr: String::from_utf8_lossy(&process_output.stderr).trim().to_string(),
            });
        }

        tracing::trace!("Transcoded audio");
        Ok(())
    }
}
