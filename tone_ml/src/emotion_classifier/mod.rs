use crate::audio::WaveformSample;
use crate::emotion_classifier::data::waveform_tensor;
use crate::emotion_classifier::model::EmotionModel;
use crate::emotion_classifier::training::TrainingConfig;
use burn::prelude::{Backend, Config, Module};
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::activation::softmax;
use error_set::error_set;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub use labels::{EmotionCode, LabelError, LabelSet};

pub mod backbone;
pub mod data;
pub mod dataset;
pub mod labels;
pub mod model;
pub mod training;

/// Training and model configuration, enough to rebuild the architecture.
pub const CONFIG_FILE: &str = "config.json";
pub const LABELS_FILE: &str = "labels.json";
/// The model record, [CompactRecorder] appends its own extension.
pub const MODEL_FILE: &str = "model";

error_set! {
    LoadError = {
        #[display("No trained model found in {path:?}")]
        ModelNotFound {
            path: PathBuf,
        },
        #[display("Model artifacts disagree: {expected} labels but the model has {found} outputs")]
        ArtifactMismatch {
            expected: usize,
            found: usize,
        },
        #[display("Could not read the model config: {message}")]
        InvalidConfig {
            message: String,
        },
        #[display("Could not load the model weights: {message}")]
        Recorder {
            message: String,
        },
    } || LabelError;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub index: usize,
    /// Probability of the predicted label, in `[0, 1]`.
    pub confidence: f32,
    /// Probability per label, in [LabelSet] order.
    pub scores: Vec<f32>,
}

/// A trained emotion classifier, ready for inference.
pub struct EmotionClassifier<B: Backend> {
    model: EmotionModel<B>,
    labels: LabelSet,
    device: B::Device,
}

impl<B: Backend> EmotionClassifier<B> {
    /// Load the artifacts of a training run.
    ///
    /// Fails if the label count doesn't match the model's output width.
    #[tracing::instrument(skip_all, fields(dir = ?artifact_dir.as_ref()))]
    pub fn new(artifact_dir: impl AsRef<Path>, device: B::Device) -> Result<Self, LoadError> {
        let dir = artifact_dir.as_ref();
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(LoadError::ModelNotFound { path: dir.to_path_buf() });
        }

        let labels = LabelSet::load(dir.join(LABELS_FILE))?;
        let config = TrainingConfig::load(&config_path).map_err(|e| LoadError::InvalidConfig {
            message: format!("{e:?}"),
        })?;

        if config.model.num_classes != labels.len() {
            return Err(LoadError::ArtifactMismatch {
                expected: labels.len(),
                found: config.model.num_classes,
            });
        }

        let record = CompactRecorder::new()
            .load(dir.join(MODEL_FILE), &device)
            .map_err(|e| LoadError::Recorder {
                message: format!("{e:?}"),
            })?;
        let model = config.model.init::<B>(&device).load_record(record);

        tracing::debug!(labels = ?labels.as_slice(), "Loaded emotion classifier");
        Self::from_parts(model, labels, device)
    }

    pub fn from_parts(model: EmotionModel<B>, labels: LabelSet, device: B::Device) -> Result<Self, LoadError> {
        if model.num_classes() != labels.len() {
            return Err(LoadError::ArtifactMismatch {
                expected: labels.len(),
                found: model.num_classes(),
            });
        }

        Ok(Self { model, labels, device })
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn predict(&self, sample: &WaveformSample) -> Prediction {
        let mut predictions = self.predict_batch(std::slice::from_ref(sample));
        predictions.swap_remove(0)
    }

    /// Predict the emotion of every sample in one forward pass.
    pub fn predict_batch(&self, samples: &[WaveformSample]) -> Vec<Prediction> {
        if samples.is_empty() {
            return Vec::new();
        }

        let logits = self.model.forward(waveform_tensor(samples, &self.device));
        let probabilities = softmax(logits, 1).into_data().iter::<f32>().collect::<Vec<_>>();

        probabilities
            .chunks_exact(self.labels.len())
            .map(|scores| self.to_prediction(scores.to_vec()))
            .collect()
    }

    fn to_prediction(&self, scores: Vec<f32>) -> Prediction {
        let (index, confidence) = scores
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        Prediction {
            label: self.labels.as_slice()[index].clone(),
            index,
            confidence,
            scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{preprocess, AudioClip, WindowMode};
    use crate::emotion_classifier::model::tests::tiny_model_config;
    use crate::CpuBackend;
    use burn::optim::AdamConfig;

    fn write_artifacts(dir: &Path, num_classes: usize, labels: &LabelSet) {
        let device = Default::default();
        let model_config = tiny_model_config(num_classes);
        TrainingConfig::new(model_config.clone(), AdamConfig::new())
            .save(dir.join(CONFIG_FILE))
            .unwrap();
        model_config
            .init::<CpuBackend>(&device)
            .save_file(dir.join(MODEL_FILE), &CompactRecorder::new())
            .unwrap();
        labels.save(dir.join(LABELS_FILE)).unwrap();
    }

    fn half_second_8khz() -> WaveformSample {
        let clip = AudioClip {
            samples: (0..4_000).map(|i| (i as f32 * 0.07).sin() * 0.2).collect(),
            n_channels: 1,
            sample_rate: 8_000,
        };
        preprocess(clip, WindowMode::Leading).unwrap()
    }

    #[test]
    fn predicts_a_known_label_with_valid_probabilities() {
        let dir = tempfile::tempdir().unwrap();
        let labels = LabelSet::from_resolved(EmotionCode::ALL.map(EmotionCode::label));
        write_artifacts(dir.path(), labels.len(), &labels);

        let classifier = EmotionClassifier::<CpuBackend>::new(dir.path(), Default::default()).unwrap();
        let prediction = classifier.predict(&half_second_8khz());

        assert!(prediction.index < labels.len());
        assert_eq!(labels.index_of(&prediction.label), Some(prediction.index));
        assert!((0.0..=1.0).contains(&prediction.confidence));
        assert_eq!(prediction.scores.len(), labels.len());
        assert!((prediction.scores.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert_eq!(prediction.confidence, prediction.scores[prediction.index]);
    }

    #[test]
    fn batch_prediction_matches_single() {
        let device = Default::default();
        let labels = LabelSet::from_resolved(["angry", "sad"]);
        let model = tiny_model_config(2).init::<CpuBackend>(&device);
        let classifier = EmotionClassifier::from_parts(model, labels, device).unwrap();
        let sample = half_second_8khz();

        let batch = classifier.predict_batch(&[sample.clone(), sample.clone()]);
        let single = classifier.predict(&sample);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].index, single.index);
        assert!((batch[1].confidence - single.confidence).abs() < 1e-5);
    }

    #[test]
    fn label_count_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let labels = LabelSet::from_resolved(["angry", "happy", "sad"]);
        write_artifacts(dir.path(), 6, &labels);

        let result = EmotionClassifier::<CpuBackend>::new(dir.path(), Default::default());

        assert!(matches!(result, Err(LoadError::ArtifactMismatch { expected: 3, found: 6 })));
    }

    #[test]
    fn output_width_mismatch_is_rejected() {
        let device = Default::default();
        let model = tiny_model_config(4).init::<CpuBackend>(&device);

        let result = EmotionClassifier::from_parts(model, LabelSet::from_resolved(["angry", "sad"]), device);

        assert!(matches!(result, Err(LoadError::ArtifactMismatch { expected: 2, found: 4 })));
    }

    #[test]
    fn saved_weights_with_wrong_output_width_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let labels = LabelSet::from_resolved(["angry", "sad"]);
        write_artifacts(dir.path(), 2, &labels);
        tiny_model_config(4)
            .init::<CpuBackend>(&Default::default())
            .save_file(dir.path().join(MODEL_FILE), &CompactRecorder::new())
            .unwrap();

        let result = EmotionClassifier::<CpuBackend>::new(dir.path(), Default::default());

        assert!(matches!(result, Err(LoadError::ArtifactMismatch { expected: 2, found: 4 })));
    }

    #[test]
    fn missing_artifacts_are_reported() {
        let dir = tempfile::tempdir().unwrap();

        let result = EmotionClassifier::<CpuBackend>::new(dir.path().join("nope"), Default::default());

        assert!(matches!(result, Err(LoadError::ModelNotFound { .. })));
    }
}
