use crate::error::AudioDecodeError;
use crate::transcode::Transcoder;
use tone_ml::audio::AudioClip;

/// Turns uploaded bytes into decoded audio.
///
/// Uploads are first decoded natively as WAV. Anything else is transcoded with `ffmpeg` and decoded again, failing
/// the upload if either of those steps fails.
#[derive(Debug, Clone)]
pub struct AudioLoader {
    transcoder: Transcoder,
}

impl AudioLoader {
    pub fn new(transcoder: Transcoder) -> Self {
        Self { transcoder }
    }

    #[tracing::instrument(skip_all, fields(bytes = bytes.len()))]
    pub async fn load(&self, bytes: &[u8]) -> Result<AudioClip, AudioDecodeError> {
        if bytes.is_empty() {
            return Err(AudioDecodeError::EmptyPayload);
        }

        // Removed on drop, whichever way we leave this function.
        let staging = tempfile::tempdir()?;
        let upload = staging.path().join("upload");
        tokio::fs::write(&upload, bytes).await?;

        let native = match AudioClip::from_wav_file(&upload) {
            Ok(clip) => return Ok(clip),
            Err(e) => e,
        };
        tracing::debug!(error = %native, "Native decode failed, falling back to ffmpeg");

        let transcoded = staging.path().join("transcoded.wav");
        if let Err(transcode) = self.transcoder.to_mono_wav(&upload, &transcoded).await {
            return Err(AudioDecodeError::Undecodable {
                native: native.to_string(),
                transcode,
            });
        }

        AudioClip::from_wav_file(&transcoded).map_err(|e| AudioDecodeError::TranscodedUnreadable { reason: e.to_string() })
    }
}
