//! The inference service behind the HTTP API: decoding uploads, classifying their tone and transcribing them.

use crate::config::ToneSystemConfig;
use crate::decode::AudioLoader;
use crate::emotion::EmotionBackend;
use crate::transcode::Transcoder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tone_ml::audio::{self, AudioError, WaveformSample};

pub use crate::error::{AnalysisError, AudioDecodeError, TranscodeError};

pub mod config;
pub mod decode;
pub mod emotion;
pub mod transcode;
#[cfg(feature = "transcribe")]
pub mod transcription;
mod error;

pub type ToneSystemHandle = Arc<ToneSystem>;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub probability: f32,
}

/// The result of analysing one answer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Analysis {
    pub predicted_label: String,
    /// Probability of [Self::predicted_label], between `0` and `1`.
    pub confidence: f32,
    /// Probability of every known label.
    pub scores: Vec<LabelScore>,
    /// Transcription of the full answer, if a transcription model is configured and succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Single place collating all the loaded models of the service.
pub struct ToneSystem {
    config: Arc<ToneSystemConfig>,
    emotion: EmotionBackend,
    loader: AudioLoader,
    #[cfg(feature = "transcribe")]
    transcriber: Option<transcription::TranscriptionBackend>,
}

impl ToneSystem {
    /// Load all models named in `config`.
    ///
    /// Fails if the emotion classifier (or the configured whisper model) can't be loaded.
    #[tracing::instrument(skip_all)]
    pub fn new(config: Arc<ToneSystemConfig>) -> eyre::Result<Self> {
        let emotion = EmotionBackend::new(&config)?;

        #[cfg(feature = "transcribe")]
        let transcriber = config
            .whisper_model
            .as_ref()
            .map(|model| transcription::TranscriptionBackend::new(model, config.whisper_threads))
            .transpose()?;
        #[cfg(not(feature = "transcribe"))]
        if config.whisper_model.is_some() {
            tracing::warn!("A whisper model is configured, but transcription support was not compiled in");
        }

        Ok(Self {
            loader: AudioLoader::new(Transcoder::new(&config.ffmpeg, config.transcode_timeout)),
            config,
            emotion,
            #[cfg(feature = "transcribe")]
            transcriber,
        })
    }

    /// Build the service around an already loaded classifier, without transcription.
    pub fn from_parts(config: Arc<ToneSystemConfig>, emotion: EmotionBackend) -> Self {
        Self {
            loader: AudioLoader::new(Transcoder::new(&config.ffmpeg, config.transcode_timeout)),
            config,
            emotion,
            #[cfg(feature = "transcribe")]
            transcriber: None,
        }
    }

    pub fn config(&self) -> &ToneSystemConfig {
        &self.config
    }

    /// Classify the tone of an uploaded answer, in any format `ffmpeg` understands.
    #[tracing::instrument(skip_all, fields(bytes = upload.len()))]
    pub async fn analyse(&self, upload: &[u8]) -> Result<Analysis, AnalysisError> {
        let clip = self.loader.load(upload).await?;
        tracing::trace!(?clip, "Decoded upload");

        let mut signal = clip.into_mono_16k().map_err(rejected_audio)?;
        audio::normalize_peak(&mut signal).map_err(rejected_audio)?;
        let sample = WaveformSample::leading(&signal);

        let (prediction, text) = tokio::join!(self.emotion.predict(sample), self.transcribe(signal));
        let prediction = prediction?;

        let scores = self
            .emotion
            .labels()?
            .into_iter()
            .zip(prediction.scores)
            .map(|(label, probability)| LabelScore { label, probability })
            .collect();

        tracing::debug!(label = %prediction.label, confidence = prediction.confidence, "Analysed answer");

        Ok(Analysis {
            predicted_label: prediction.label,
            confidence: prediction.confidence,
            scores,
            text,
        })
    }

    /// The labels the loaded classifier can predict, in class index order.
    pub fn labels(&self) -> Result<Vec<String>, AnalysisError> {
        self.emotion.labels()
    }

    /// Unload all models, subsequent requests fail with [AnalysisError::ModelNotLoaded].
    pub async fn shutdown(&self) -> eyre::Result<()> {
        tracing::info!("Shutting down tone system");
        self.emotion.unload();
        Ok(())
    }

    #[cfg(feature = "transcribe")]
    async fn transcribe(&self, signal: Vec<f32>) -> Option<String> {
        let transcriber = self.transcriber.as_ref()?;

        match transcriber.transcribe(signal).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(error = ?e, "Transcription failed, continuing without text");
                None
            }
        }
    }

    #[cfg(not(feature = "transcribe"))]
    async fn transcribe(&self, _signal: Vec<f32>) -> Option<String> {
        None
    }
}

/// Preprocessing failures on decoded uploads are caused by the upload itself, never by the service.
fn rejected_audio(error: AudioError) -> AnalysisError {
    match error {
        AudioError::TooQuiet { .. } => AnalysisError::AudioTooQuiet,
        e => AnalysisError::Unprocessable { reason: e.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tone_ml::audio::AudioClip;
    use tone_ml::emotion_classifier::backbone::BackboneConfig;
    use tone_ml::emotion_classifier::model::EmotionModelConfig;
    use tone_ml::emotion_classifier::{EmotionClassifier, LabelSet};
    use tone_ml::CpuBackend;

    fn test_system() -> ToneSystem {
        let device = Default::default();
        let backbone = BackboneConfig::new()
            .with_conv_dim(vec![8; 7])
            .with_hidden_size(16)
            .with_num_layers(4)
            .with_num_heads(2)
            .with_intermediate_size(32)
            .with_pos_conv_kernel(4)
            .with_pos_conv_groups(2);
        let model = EmotionModelConfig::new(3)
            .with_backbone(backbone)
            .with_hidden_sizes(vec![16, 8, 8])
            .init::<CpuBackend>(&device);
        let labels = LabelSet::from_resolved(["angry", "happy", "sad"]);
        let classifier = EmotionClassifier::from_parts(model, labels, device).unwrap();

        let config = ToneSystemConfig {
            ffmpeg: "/definitely/not/ffmpeg".into(),
            transcode_timeout: Duration::from_secs(1),
            ..Default::default()
        };

        ToneSystem::from_parts(Arc::new(config), EmotionBackend::from_classifier(classifier))
    }

    fn wav_bytes(amplitude: f32) -> Vec<u8> {
        clip_bytes(AudioClip {
            samples: (0..4_000).map(|i| (i as f32 * 0.05).sin() * amplitude).collect(),
            n_channels: 1,
            sample_rate: 8_000,
        })
    }

    fn clip_bytes(clip: AudioClip) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answer.wav");
        clip.write_to_wav_file(&path).unwrap();

        std::fs::read(path).unwrap()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn analyses_wav_upload() {
        let system = test_system();

        let analysis = system.analyse(&wav_bytes(0.3)).await.unwrap();

        assert!(system.labels().unwrap().contains(&analysis.predicted_label));
        assert!((0.0..=1.0).contains(&analysis.confidence));
        assert_eq!(analysis.scores.len(), 3);
        let total: f32 = analysis.scores.iter().map(|s| s.probability).sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert_eq!(analysis.text, None);
    }

    #[tokio::test]
    async fn silent_upload_is_too_quiet() {
        let result = test_system().analyse(&wav_bytes(0.0)).await;

        assert!(matches!(result, Err(AnalysisError::AudioTooQuiet)));
    }

    #[tokio::test]
    async fn unresamplable_rate_is_rejected() {
        let upload = clip_bytes(AudioClip {
            samples: (0..200).map(|i| (i as f32 * 0.3).sin() * 0.5).collect(),
            n_channels: 1,
            sample_rate: 1,
        });

        let result = test_system().analyse(&upload).await;

        assert!(matches!(result, Err(AnalysisError::Unprocessable { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn non_finite_samples_are_rejected() {
        let upload = clip_bytes(AudioClip {
            samples: vec![0.5, f32::NAN, 0.2, -0.3],
            n_channels: 1,
            sample_rate: 16_000,
        });

        let result = test_system().analyse(&upload).await;

        assert!(matches!(result, Err(AnalysisError::Unprocessable { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn undecodable_upload_is_a_decode_error() {
        let result = test_system().analyse(b"RIFF but not really").await;

        assert!(matches!(result, Err(AnalysisError::Undecodable { .. })));
    }

    #[tokio::test]
    async fn requests_after_shutdown_fail() {
        let system = test_system();
        system.shutdown().await.unwrap();

        let result = system.analyse(&wav_bytes(0.3)).await;

        assert!(matches!(result, Err(AnalysisError::ModelNotLoaded)));
        assert!(matches!(system.labels(), Err(AnalysisError::ModelNotLoaded)));
    }
}
