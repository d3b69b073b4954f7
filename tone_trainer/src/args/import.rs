use std::path::PathBuf;
use tone_ml::burn::prelude::{Config, Module};
use tone_ml::burn::record::CompactRecorder;
use tone_ml::emotion_classifier::backbone::{self, BackboneConfig};
use tone_ml::CpuBackend;

#[derive(clap::Args, Debug)]
pub struct ImportBackboneCommand {
    /// PyTorch state dict of a wav2vec2 model (`.pt`/`.pth`)
    checkpoint: PathBuf,
    /// Destination of the converted record, the recorder adds its own extension
    #[clap(long, short)]
    output: PathBuf,
    /// Backbone architecture in JSON, defaults to wav2vec2-base
    #[clap(long)]
    config: Option<PathBuf>,
    /// Extra key remappings as `PATTERN=REPLACEMENT`, applied after the built-in ones
    #[clap(long = "remap", value_parser = parse_remap)]
    remaps: Vec<(String, String)>,
}

impl ImportBackboneCommand {
    #[tracing::instrument(skip_all, fields(checkpoint = ?self.checkpoint))]
    pub fn run(self) -> eyre::Result<()> {
        let config = match &self.config {
            Some(path) => BackboneConfig::load(path)?,
            None => BackboneConfig::new(),
        };

        let device = Default::default();
        let backbone = backbone::import_pytorch_backbone::<CpuBackend>(&self.checkpoint, &self.remaps, &config, &device)?;
        tracing::info!(layers = backbone.num_layers(), "Converted checkpoint");

        backbone.save_file(&self.output, &CompactRecorder::new())?;
        tracing::info!(output = ?self.output, "Saved backbone record");

        Ok(())
    }
}

fn parse_remap(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(pattern, replacement)| (pattern.to_string(), replacement.to_string()))
        .ok_or_else(|| format!("expected PATTERN=REPLACEMENT, got '{value}'"))
}
