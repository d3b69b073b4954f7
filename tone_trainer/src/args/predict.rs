use serde_json::json;
use std::path::{Path, PathBuf};
use tone_ml::audio::{self, AudioClip, WaveformSample, WindowMode};
use tone_ml::emotion_classifier::EmotionClassifier;
use tone_ml::CpuBackend;

#[derive(clap::Args, Debug)]
pub struct PredictCommand {
    /// Directory of a finished training run
    #[clap(long, short)]
    model: PathBuf,
    /// WAV files to classify
    #[clap(required = true)]
    files: Vec<PathBuf>,
}

impl PredictCommand {
    #[tracing::instrument(skip_all, fields(model = ?self.model))]
    pub fn run(self) -> eyre::Result<()> {
        let classifier = EmotionClassifier::<CpuBackend>::new(&self.model, Default::default())?;

        for file in &self.files {
            let line = match load_sample(file) {
                Ok(sample) => {
                    let prediction = classifier.predict(&sample);
                    json!({ "file": file, "prediction": prediction })
                }
                Err(e) => {
                    tracing::warn!(?file, error = %e, "Could not classify file");
                    json!({ "file": file, "error": e.to_string() })
                }
            };

            println!("{line}");
        }

        Ok(())
    }
}

/// Read a WAV file into the same window the server would classify.
fn load_sample(file: &Path) -> eyre::Result<WaveformSample> {
    let clip = AudioClip::from_wav_file(file)?;

    Ok(audio::preprocess(clip, WindowMode::Leading)?)
}
