use crate::audio::WindowMode;
use crate::emotion_classifier::data::{EmotionBatcher, EmotionItem, EmotionTrainingBatch};
use crate::emotion_classifier::dataset::CremaIndex;
use crate::emotion_classifier::labels::LabelError;
use crate::emotion_classifier::model::{EmotionModel, EmotionModelConfig};
use crate::emotion_classifier::{CONFIG_FILE, LABELS_FILE, MODEL_FILE};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::InMemDataset;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::{Backend, Config, Module};
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use burn::train::ClassificationOutput;
use error_set::error_set;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

error_set! {
    TrainError = {
        #[display("Could not save or load a model record: {message}")]
        Recorder {
            message: String,
        },
        #[display("Training needs at least one training clip, got {clips} clips in total")]
        EmptyTrainingSet {
            clips: usize,
        },
    } || LabelError;
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: EmotionModelConfig,
    pub optimizer: AdamConfig,
    #[config(default = 30)]
    pub num_epochs: usize,
    #[config(default = 8)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1e-4)]
    pub learning_rate: f64,
    #[config(default = 0.2)]
    pub validation_split: f64,
}

/// Loss and accuracy accumulated over one pass through a dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseMetrics {
    pub loss_sum: f64,
    pub correct: usize,
    pub seen: usize,
    pub batches: usize,
    /// Batches too small to train on.
    pub skipped_batches: usize,
}

impl PhaseMetrics {
    fn record<B: Backend>(&mut self, output: &ClassificationOutput<B>) {
        let batch_size = output.targets.dims()[0];
        let loss = output.loss.clone().into_scalar().elem::<f64>();
        let correct = output
            .output
            .clone()
            .argmax(1)
            .flatten::<1>(0, 1)
            .equal(output.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss_sum += loss * batch_size as f64;
        self.correct += correct as usize;
        self.seen += batch_size;
        self.batches += 1;
    }

    pub fn mean_loss(&self) -> f64 {
        if self.seen == 0 { 0.0 } else { self.loss_sum / self.seen as f64 }
    }

    pub fn accuracy(&self) -> f64 {
        if self.seen == 0 { 0.0 } else { self.correct as f64 / self.seen as f64 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub train: PhaseMetrics,
    pub valid: PhaseMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub artifact_dir: PathBuf,
    pub epochs: Vec<EpochReport>,
}

/// Fine-tune a classifier on the given dataset and persist it in `artifact_dir`.
///
/// `backbone` points to a [CompactRecorder] record of a pretrained
/// [Backbone](crate::emotion_classifier::backbone::Backbone). Without it the backbone starts from random weights.
#[tracing::instrument(skip_all, fields(artifact_dir = ?artifact_dir.as_ref()))]
pub fn train<B: AutodiffBackend>(
    artifact_dir: impl AsRef<Path>,
    index: &CremaIndex,
    mut config: TrainingConfig,
    backbone: Option<&Path>,
    device: B::Device,
) -> Result<TrainingSummary, TrainError> {
    let artifact_dir = artifact_dir.as_ref();
    std::fs::create_dir_all(artifact_dir)?;

    if config.model.num_classes != index.labels.len() {
        tracing::debug!(
            configured = config.model.num_classes,
            labels = index.labels.len(),
            "Overriding class count with the dataset's label count"
        );
        config.model.num_classes = index.labels.len();
    }
    config.save(artifact_dir.join(CONFIG_FILE))?;

    B::seed(config.seed);

    let mut model = config.model.init::<B>(&device);
    if let Some(path) = backbone {
        tracing::info!(?path, "Loading pretrained backbone");
        let record = CompactRecorder::new()
            .load(path.to_path_buf(), &device)
            .map_err(|e| TrainError::Recorder {
                message: format!("{e:?}"),
            })?;
        model.backbone = model.backbone.load_record(record);
    }
    let mut model = model.freeze_backbone_prefix(config.model.frozen_layers);
    let mut optim = config.optimizer.init();

    let (train_items, valid_items) = index.split(config.validation_split, config.seed);
    if train_items.is_empty() {
        return Err(TrainError::EmptyTrainingSet {
            clips: index.clips.len(),
        });
    }
    tracing::info!(train = train_items.len(), valid = valid_items.len(), "Split dataset");

    let loader_train = build_loader::<B>(&config, train_items, device.clone(), WindowMode::Random, true);
    let loader_valid = build_loader::<B::InnerBackend>(&config, valid_items, device, WindowMode::Leading, false);

    let mut epochs = Vec::with_capacity(config.num_epochs);

    for epoch in 1..=config.num_epochs {
        let _span = tracing::info_span!("epoch", epoch, total = config.num_epochs).entered();
        let mut train = PhaseMetrics::default();

        for batch in loader_train.iter().flatten() {
            // Batch normalisation needs more than one sample to compute statistics.
            if batch.len() < 2 {
                tracing::debug!(size = batch.len(), "Skipping undersized batch");
                train.skipped_batches += 1;
                continue;
            }

            let output = model.forward_classification(batch.waveforms, batch.labels);
            train.record(&output);

            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        let model_valid = model.valid();
        let mut valid = PhaseMetrics::default();
        for batch in loader_valid.iter().flatten() {
            let output = model_valid.forward_classification(batch.waveforms, batch.labels);
            valid.record(&output);
        }

        tracing::info!(
            train_loss = train.mean_loss(),
            train_acc = train.accuracy(),
            valid_loss = valid.mean_loss(),
            valid_acc = valid.accuracy(),
            "Finished epoch"
        );

        epochs.push(EpochReport { epoch, train, valid });
    }

    persist(&model, index, artifact_dir)?;

    Ok(TrainingSummary {
        artifact_dir: artifact_dir.to_path_buf(),
        epochs,
    })
}

fn build_loader<B: Backend>(
    config: &TrainingConfig,
    items: Vec<EmotionItem>,
    device: B::Device,
    mode: WindowMode,
    shuffle: bool,
) -> Arc<dyn DataLoader<Option<EmotionTrainingBatch<B>>>> {
    let mut builder = DataLoaderBuilder::new(EmotionBatcher::<B>::new(device, mode)).batch_size(config.batch_size);
    if shuffle {
        builder = builder.shuffle(config.seed);
    }
    if config.num_workers > 1 {
        builder = builder.num_workers(config.num_workers);
    }

    builder.build(InMemDataset::new(items))
}

fn persist<B: AutodiffBackend>(model: &EmotionModel<B>, index: &CremaIndex, artifact_dir: &Path) -> Result<(), TrainError> {
    model
        .clone()
        .save_file(artifact_dir.join(MODEL_FILE), &CompactRecorder::new())
        .map_err(|e| TrainError::Recorder {
            message: format!("{e:?}"),
        })?;
    index.labels.save(artifact_dir.join(LABELS_FILE))?;

    tracing::info!(?artifact_dir, "Persisted trained model");
    Ok(())
}

/// Create a fresh [TrainingConfig] for the default architecture.
pub fn default_config(num_classes: usize) -> TrainingConfig {
    TrainingConfig::new(EmotionModelConfig::new(num_classes), AdamConfig::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion_classifier::dataset::tests::{write_clip, write_votes};
    use crate::emotion_classifier::model::tests::tiny_model_config;
    use crate::emotion_classifier::EmotionClassifier;
    use crate::audio::{AudioClip, WindowMode, preprocess};
    use crate::CpuBackend;
    use burn::backend::Autodiff;

    #[test]
    #[tracing_test::traced_test]
    fn trains_and_persists_a_loadable_model() {
        let data = tempfile::tempdir().unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        let mut table = String::from("fileName,A,D,F,H,N,S\n");
        for i in 0..6 {
            let votes = if i % 2 == 0 { "3,0,0,0,0,0" } else { "0,0,0,3,0,0" };
            table.push_str(&format!("clip_{i},{votes}\n"));
            write_clip(data.path(), &format!("clip_{i}"));
        }
        write_votes(data.path(), &table);
        let index = CremaIndex::load(data.path()).unwrap();

        let config = TrainingConfig::new(tiny_model_config(99), AdamConfig::new())
            .with_num_epochs(1)
            .with_batch_size(2)
            .with_validation_split(0.34);
        let summary = train::<Autodiff<CpuBackend>>(artifacts.path(), &index, config, None, Default::default()).unwrap();

        assert_eq!(summary.epochs.len(), 1);
        let epoch = &summary.epochs[0];
        assert_eq!(epoch.train.seen, 4);
        assert_eq!(epoch.valid.seen, 2);
        assert!(epoch.train.mean_loss().is_finite());
        assert!((0.0..=1.0).contains(&epoch.valid.accuracy()));

        for file in [CONFIG_FILE, LABELS_FILE, "model.mpk.gz"] {
            assert!(artifacts.path().join(file).exists(), "missing {file}");
        }

        let classifier = EmotionClassifier::<CpuBackend>::new(artifacts.path(), Default::default()).unwrap();
        assert_eq!(classifier.labels().as_slice(), ["angry", "happy"]);

        let clip = AudioClip::from_wav_file(&index.clips[0].path).unwrap();
        let prediction = classifier.predict(&preprocess(clip, WindowMode::Leading).unwrap());
        assert!(classifier.labels().index_of(&prediction.label).is_some());
    }
}
