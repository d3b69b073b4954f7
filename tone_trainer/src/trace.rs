use indicatif::{ProgressState, ProgressStyle};
use std::{fmt, time::Duration};
use tracing::Subscriber;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    fmt::{format::Writer, time::FormatTime},
    layer::SubscriberExt,
    EnvFilter, Layer,
};

/// Epochs routinely take minutes, only flag spans which are slow even for training.
const SLOW_SPAN: Duration = Duration::from_secs(10 * 60);

/// Subscriber which renders every active span (epochs, dataset loading) as a spinner above the log output.
pub fn create_subscriber(default_directives: &str) -> eyre::Result<impl Subscriber> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    let style = ProgressStyle::with_template(
        "{color_start}{span_child_prefix}{spinner} {span_name} {span_fields} {wide_msg} {elapsed_precise}{color_end}",
    )?
    .with_key("color_start", |state: &ProgressState, writer: &mut dyn fmt::Write| {
        if state.elapsed() > SLOW_SPAN {
            // Yellow
            let _ = write!(writer, "\x1b[33m");
        }
    })
    .with_key("color_end", |state: &ProgressState, writer: &mut dyn fmt::Write| {
        if state.elapsed() > SLOW_SPAN {
            let _ = write!(writer, "\x1b[0m");
        }
    });

    let indicatif_layer = IndicatifLayer::new()
        .with_progress_style(style)
        .with_span_child_prefix_symbol("↳ ")
        .with_span_child_prefix_indent(" ");

    let format = tracing_subscriber::fmt::format()
        .with_source_location(false)
        .with_file(false)
        .with_timer(Uptime::default());

    Ok(tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(indicatif_layer.get_stderr_writer())
                .event_format(format)
                .with_filter(env_filter),
        )
        .with(indicatif_layer))
}

/// Time since the trainer started, as `HH:MM:SS`.
struct Uptime(std::time::Instant);

impl Default for Uptime {
    fn default() -> Self {
        Uptime(std::time::Instant::now())
    }
}

impl FormatTime for Uptime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let secs = self.0.elapsed().as_secs();
        write!(w, "{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }
}
