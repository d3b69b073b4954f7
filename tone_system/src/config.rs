use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneSystemConfig {
    /// Artifact directory of a trained emotion classifier.
    pub emotion_model: PathBuf,
    /// Whisper `ggml` model used to transcribe answers, transcription is skipped if not set.
    pub whisper_model: Option<PathBuf>,
    pub whisper_threads: u16,
    /// The `ffmpeg` executable used for uploads which aren't WAV.
    pub ffmpeg: PathBuf,
    /// Upper bound on a single `ffmpeg` transcode, the process is killed afterward.
    pub transcode_timeout: Duration,
}

impl Default for ToneSystemConfig {
    fn default() -> Self {
        Self {
            emotion_model: PathBuf::from("models").join("emotion"),
            whisper_model: None,
            whisper_threads: 4,
            ffmpeg: PathBuf::from("ffmpeg"),
            transcode_timeout: Duration::from_secs(30),
        }
    }
}
