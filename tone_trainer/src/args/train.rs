use crate::args::ClapDevice;
use std::path::PathBuf;
use tone_ml::burn::backend::Autodiff;
use tone_ml::burn::prelude::Config;
use tone_ml::emotion_classifier::dataset::CremaIndex;
use tone_ml::emotion_classifier::training::{self, TrainingConfig, TrainingSummary};
use tone_ml::{CpuBackend, GpuBackend};

#[derive(clap::Args, Debug)]
pub struct TrainCommand {
    /// Dataset root, containing `processedResults/tabulatedVotes.csv` (or the table itself) and `AudioWAV/`
    data_dir: PathBuf,
    /// Where the trained model, its config and its labels are written
    #[clap(long, short)]
    output: PathBuf,
    /// A training config in JSON, as written by a previous run. Command line flags take precedence.
    #[clap(long)]
    config: Option<PathBuf>,
    /// Pretrained backbone record, as produced by `import-backbone`
    #[clap(long)]
    backbone: Option<PathBuf>,
    #[clap(long)]
    epochs: Option<usize>,
    #[clap(long)]
    batch_size: Option<usize>,
    #[clap(long)]
    learning_rate: Option<f64>,
    /// Fraction of the dataset held out for validation
    #[clap(long)]
    validation_split: Option<f64>,
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long, value_enum, default_value_t)]
    device: ClapDevice,
}

impl TrainCommand {
    #[tracing::instrument(skip_all, fields(data_dir = ?self.data_dir))]
    pub fn run(self) -> eyre::Result<()> {
        let index = CremaIndex::load(&self.data_dir)?;
        tracing::info!(
            clips = index.clips.len(),
            labels = ?index.labels.as_slice(),
            skipped = index.skipped,
            "Indexed dataset"
        );

        let config = self.training_config(index.labels.len())?;

        let summary = match self.device {
            ClapDevice::Cpu => training::train::<Autodiff<CpuBackend>>(
                &self.output,
                &index,
                config,
                self.backbone.as_deref(),
                Default::default(),
            )?,
            ClapDevice::Gpu => training::train::<Autodiff<GpuBackend>>(
                &self.output,
                &index,
                config,
                self.backbone.as_deref(),
                Default::default(),
            )?,
        };

        report(&summary);

        Ok(())
    }

    fn training_config(&self, num_classes: usize) -> eyre::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => training::default_config(num_classes),
        };

        if let Some(epochs) = self.epochs {
            config.num_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(split) = self.validation_split {
            eyre::ensure!((0.0..1.0).contains(&split), "Validation split must be in [0, 1), got {split}");
            config.validation_split = split;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        Ok(config)
    }
}

fn report(summary: &TrainingSummary) {
    let Some(last) = summary.epochs.last() else {
        tracing::warn!("No epochs were run, the saved model is untrained");
        return;
    };

    let best = summary
        .epochs
        .iter()
        .max_by(|a, b| a.valid.accuracy().total_cmp(&b.valid.accuracy()))
        .unwrap_or(last);

    tracing::info!(
        artifact_dir = ?summary.artifact_dir,
        final_valid_acc = last.valid.accuracy(),
        best_epoch = best.epoch,
        best_valid_acc = best.valid.accuracy(),
        "Training complete"
    );
}
