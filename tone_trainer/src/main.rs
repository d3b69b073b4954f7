use crate::args::SubCommands;
use clap::Parser;
use tracing_subscriber::util::SubscriberInitExt;

mod args;
mod trace;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = args::ClapArgs::parse();
    trace::create_subscriber("WARN,tone_trainer=TRACE,tone_ml=DEBUG")?.init();

    let now = std::time::Instant::now();

    match args.commands {
        SubCommands::Train(train) => {
            train.run()?;
        }
        SubCommands::Predict(predict) => {
            predict.run()?;
        }
        #[cfg(feature = "import")]
        SubCommands::ImportBackbone(import) => {
            import.run()?;
        }
    }

    tracing::info!("Runtime: {:.2?}", now.elapsed());

    Ok(())
}
