use std::path::Path;
use std::sync::{Arc, Mutex};
use tone_ml::stt::AnswerTranscriber;

/// Shared whisper model, one transcription at a time.
#[derive(Clone)]
pub struct TranscriptionBackend {
    whisper: Arc<Mutex<AnswerTranscriber>>,
}

impl TranscriptionBackend {
    pub fn new(model_path: impl AsRef<Path>, cpu_threads: u16) -> eyre::Result<Self> {
        Ok(Self {
            whisper: Arc::new(Mutex::new(AnswerTranscriber::load(model_path, cpu_threads)?)),
        })
    }

    /// Transcribe mono 16 kHz audio on the blocking thread pool.
    pub async fn transcribe(&self, samples: Vec<f32>) -> eyre::Result<String> {
        let whisper = self.whisper.clone();

        tokio::task::spawn_blocking(move || -> eyre::Result<String> {
            let mut lock = whisper.lock().map_err(|_| eyre::eyre!("Whisper lock was poisoned"))?;
            lock.transcribe(&samples)
        })
        .await?
    }
}
