use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Targets of our own crates, which get source locations in their log lines.
fn is_first_party(target: &str) -> bool {
    target.starts_with("tone_")
}

/// Create the initial subscriber, alongside the custom formatting for standard i/o.
pub fn create_subscriber(default_directives: &str) -> impl Subscriber + Send + Sync {
    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let own_format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_thread_ids(true)
        .with_source_location(true);
    let dependency_format = own_format.clone().with_source_location(false);

    let own_logger = tracing_subscriber::fmt::layer()
        .event_format(own_format)
        .with_filter(tracing_subscriber::filter::filter_fn(|m| is_first_party(m.target())))
        .with_filter(env_filter());
    let dependency_logger = tracing_subscriber::fmt::layer()
        .event_format(dependency_format)
        .with_filter(tracing_subscriber::filter::filter_fn(|m| !is_first_party(m.target())))
        .with_filter(env_filter());

    tracing_subscriber::registry().with(own_logger).with(dependency_logger)
}
