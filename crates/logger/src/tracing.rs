use std::env::var;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// HTTP client and database internals stay at WARN unless RUST_LOG
/// raises them explicitly
const QUIET_DEPENDENCIES: [&str; 4] = ["hyper=warn", "hyper_util=warn", "reqwest=warn", "libsql=warn"];

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` controls filtering (default INFO) and `RUST_LOG_FORMAT=json`
/// switches to JSON lines for log collectors.
pub fn init() {
    initialize_tracing(LevelFilter::INFO);
}

fn initialize_tracing(level: LevelFilter) {
    let mut env_filter =
        EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    for directive in QUIET_DEPENDENCIES {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let log_format = var("RUST_LOG_FORMAT").unwrap_or_default();

    let log_layer = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(log_layer).init();
}
