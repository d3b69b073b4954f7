use crate::config::ToneSystemConfig;
use crate::error::AnalysisError;
use std::sync::{Arc, Mutex};
use tone_ml::audio::WaveformSample;
use tone_ml::emotion_classifier::{EmotionClassifier, LoadError, Prediction};
use tone_ml::CpuBackend;

/// Shared access to the loaded classifier, one prediction runs at a time.
#[derive(Clone)]
pub struct EmotionBackend {
    model: Arc<Mutex<Option<EmotionClassifier<CpuBackend>>>>,
}

impl EmotionBackend {
    pub fn new(config: &ToneSystemConfig) -> Result<EmotionBackend, LoadError> {
        let device = tone_ml::burn::backend::ndarray::NdArrayDevice::default();
        let classifier = EmotionClassifier::new(&config.emotion_model, device)?;

        Ok(Self::from_classifier(classifier))
    }

    pub fn from_classifier(classifier: EmotionClassifier<CpuBackend>) -> Self {
        Self {
            model: Arc::new(Mutex::new(Some(classifier))),
        }
    }

    /// Run the classifier on the blocking thread pool.
    pub async fn predict(&self, sample: WaveformSample) -> Result<Prediction, AnalysisError> {
        let model = self.model.clone();

        tokio::task::spawn_blocking(move || -> Result<Prediction, AnalysisError> {
            let lock = model.lock().map_err(|_| eyre::eyre!("Emotion model lock was poisoned"))?;
            let classifier = lock.as_ref().ok_or(AnalysisError::ModelNotLoaded)?;

            Ok(classifier.predict(&sample))
        })
        .await
        .map_err(eyre::Report::from)?
    }

    pub fn labels(&self) -> Result<Vec<String>, AnalysisError> {
        let lock = self.model.lock().map_err(|_| eyre::eyre!("Emotion model lock was poisoned"))?;
        let classifier = lock.as_ref().ok_or(AnalysisError::ModelNotLoaded)?;

        Ok(classifier.labels().as_slice().to_vec())
    }

    /// Drop the classifier, subsequent requests fail with [AnalysisError::ModelNotLoaded].
    pub fn unload(&self) {
        match self.model.lock() {
            Ok(mut lock) => *lock = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}
