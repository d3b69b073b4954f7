#[cfg(feature = "import")]
use crate::args::import::ImportBackboneCommand;
use crate::args::predict::PredictCommand;
use crate::args::train::TrainCommand;

#[cfg(feature = "import")]
pub mod import;
pub mod predict;
pub mod train;

#[derive(clap::Parser, Debug)]
#[clap(version, about)]
pub struct ClapArgs {
    #[clap(subcommand)]
    pub commands: SubCommands,
}

#[derive(clap::Subcommand, Debug)]
pub enum SubCommands {
    /// Fine-tune an emotion classifier on a CREMA-D style dataset
    #[clap(arg_required_else_help(true))]
    #[clap(alias = "t")]
    Train(TrainCommand),
    /// Classify WAV files with a trained model and print the predictions as JSON lines
    #[clap(arg_required_else_help(true))]
    #[clap(alias = "p")]
    Predict(PredictCommand),
    /// Convert a PyTorch wav2vec2 checkpoint into a backbone record usable by `train --backbone`
    #[cfg(feature = "import")]
    #[clap(arg_required_else_help(true))]
    ImportBackbone(ImportBackboneCommand),
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default)]
pub enum ClapDevice {
    #[default]
    Cpu,
    Gpu,
}
