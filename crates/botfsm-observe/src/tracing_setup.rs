//! Tracing subscriber for processes hosting an FSM store.
//!
//! The storage crates only emit `tracing` events: retries at debug from
//! `botfsm_core`, degraded operations at warn/error from `botfsm_infra`. The
//! hosting bot installs one subscriber at startup with [`init_tracing`].
//!
//! # Usage
//!
//! ```no_run
//! use botfsm_observe::tracing_setup::{LogFormat, TracingOptions, init_tracing};
//!
//! // Human-readable logs
//! init_tracing(&TracingOptions::default()).unwrap();
//!
//! // Or: JSON lines plus OpenTelemetry spans on stdout
//! init_tracing(&TracingOptions { format: LogFormat::Json, otel: true }).unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter directives read before `RUST_LOG`.
pub const LOG_ENV: &str = "BOTFSM_LOG";

/// Store failures and lifecycle at info; retry chatter stays hidden.
const DEFAULT_FILTER: &str = "warn,botfsm_infra=info,botfsm_core=warn";

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOptions {
    pub format: LogFormat,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub otel: bool,
}

/// Install the global subscriber.
///
/// Filter directives come from `BOTFSM_LOG`, then `RUST_LOG`, then
/// `warn,botfsm_infra=info,botfsm_core=warn`. Unparseable values are skipped.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let filter = storage_filter(|name| std::env::var(name).ok());

    let (pretty, json) = match options.format {
        LogFormat::Pretty => (Some(tracing_subscriber::fmt::layer().with_target(true)), None),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            ),
        ),
    };

    let provider = options.otel.then(|| {
        SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build()
    });
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("botfsm")));

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .with(otel)
        .try_init()?;

    if let Some(provider) = provider {
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
    }
    Ok(())
}

/// Flush pending spans and shut down the tracer provider, if one was installed.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

fn storage_filter(lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .filter_map(|name| lookup(name))
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
