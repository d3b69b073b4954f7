use crate::audio::{self, AudioClip, WaveformSample, WindowMode, WINDOW_SIZE};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::{Backend, Int, Tensor, TensorData};
use std::path::PathBuf;

/// One labelled clip on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionItem {
    pub path: PathBuf,
    /// Index into the [LabelSet](crate::emotion_classifier::LabelSet) of the dataset.
    pub label: usize,
}

#[derive(Debug, Clone)]
pub struct EmotionTrainingBatch<B: Backend> {
    /// [batch_size, WINDOW_SIZE]
    pub waveforms: Tensor<B, 2>,
    /// [batch_size]
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> EmotionTrainingBatch<B> {
    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decodes and preprocesses clips as they are batched.
///
/// Clips which can't be decoded, or are too quiet, are dropped from their batch. A batch without any usable clips
/// becomes `None`.
#[derive(Clone, Debug)]
pub struct EmotionBatcher<B: Backend> {
    device: B::Device,
    mode: WindowMode,
}

impl<B: Backend> EmotionBatcher<B> {
    pub fn new(device: B::Device, mode: WindowMode) -> Self {
        Self { device, mode }
    }
}

impl<B: Backend> Batcher<EmotionItem, Option<EmotionTrainingBatch<B>>> for EmotionBatcher<B> {
    fn batch(&self, items: Vec<EmotionItem>) -> Option<EmotionTrainingBatch<B>> {
        let (samples, labels): (Vec<_>, Vec<_>) = items
            .into_iter()
            .filter_map(|item| {
                match AudioClip::from_wav_file(&item.path).and_then(|clip| audio::preprocess(clip, self.mode)) {
                    Ok(sample) => Some((sample, item.label as i64)),
                    Err(e) => {
                        tracing::warn!(path = ?item.path, error = %e, "Dropping unusable clip");
                        None
                    }
                }
            })
            .unzip();

        if samples.is_empty() {
            return None;
        }

        let len = labels.len();
        let labels = TensorData::new(labels, [len]).convert::<B::IntElem>();

        Some(EmotionTrainingBatch {
            waveforms: waveform_tensor(&samples, &self.device),
            labels: Tensor::from_data(labels, &self.device),
        })
    }
}

/// Stack the given samples into a [samples.len(), WINDOW_SIZE] tensor.
pub fn waveform_tensor<B: Backend>(samples: &[WaveformSample], device: &B::Device) -> Tensor<B, 2> {
    let flat = samples.iter().flat_map(|s| s.samples().iter().copied()).collect::<Vec<f32>>();
    let data = TensorData::new(flat, [samples.len(), WINDOW_SIZE]).convert::<B::FloatElem>();

    Tensor::from_data(data, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuBackend;
    use tracing_test::traced_test;

    fn write_tone(path: &std::path::Path, amplitude: f32, frames: usize) {
        let clip = AudioClip {
            samples: (0..frames).map(|i| (i as f32 * 0.05).sin() * amplitude).collect(),
            n_channels: 1,
            sample_rate: 16_000,
        };
        clip.write_to_wav_file(path).unwrap();
    }

    #[test]
    #[traced_test]
    fn unusable_clips_are_dropped_from_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let loud = dir.path().join("loud.wav");
        let silent = dir.path().join("silent.wav");
        write_tone(&loud, 0.5, 20_000);
        write_tone(&silent, 0.0, 20_000);

        let batcher = EmotionBatcher::<CpuBackend>::new(Default::default(), WindowMode::Random);
        let batch = batcher
            .batch(vec![
                EmotionItem { path: loud, label: 2 },
                EmotionItem { path: silent, label: 1 },
                EmotionItem {
                    path: dir.path().join("missing.wav"),
                    label: 0,
                },
            ])
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.waveforms.dims(), [1, WINDOW_SIZE]);
        assert_eq!(batch.labels.into_data().to_vec::<i32>().unwrap(), vec![2]);
        assert!(logs_contain("Dropping unusable clip"));
    }

    #[test]
    fn batch_without_usable_clips_is_none() {
        let batcher = EmotionBatcher::<CpuBackend>::new(Default::default(), WindowMode::Leading);

        let batch = batcher.batch(vec![EmotionItem {
            path: PathBuf::from("does/not/exist.wav"),
            label: 0,
        }]);

        assert!(batch.is_none());
    }
}
