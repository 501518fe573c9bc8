//! `tracing` logger configuration for the seal services.
//!
//! Both binaries run on shared edge hosts whose stdout is shipped to one
//! aggregate, so every formatted event is prefixed with the service name
//! (`[seal-gm]` / `[seal-lm]`). The default filter keeps seal crates at
//! INFO and the HTTP stack (hyper, reqwest, tower) at WARN; set `RUST_LOG`
//! to override both.

use std::{
    fmt::{self, Write as _},
    str::FromStr,
};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::Targets,
    fmt::{
        format::{Compact, Format, Writer},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
};

/// Stamps the service name in front of every formatted event.
struct ServiceFormat {
    service: &'static str,
    inner: Format<Compact>,
}

impl<S, N> FormatEvent<S, N> for ServiceFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "[{}] ", self.service)?;
        self.inner.format_event(ctx, writer, event)
    }
}

/// Initialize the global `tracing` logger for `service`.
///
/// Panics if a logger is already initialized. This will fail if used in
/// tests, since multiple test threads will compete to set the global
/// logger; use [`init_for_testing`] there.
pub fn init(service: &'static str) {
    try_init(service).expect("Failed to setup logger");
}

/// Use this to initialize the global logger in tests.
pub fn init_for_testing(service: &'static str) {
    // Quickly skip logger setup if no env var set.
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }

    // Don't panic if there's already a logger setup. Multiple tests might
    // try setting the global logger.
    let _ = try_init(service);
}

/// Try to initialize a global logger. Will return an `Err` if there is
/// another global logger already set.
pub fn try_init(service: &'static str) -> Result<(), TryInitError> {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|rust_log| Targets::from_str(&rust_log).ok())
        .unwrap_or_else(default_filter);

    let stdout_log = tracing_subscriber::fmt::layer()
        .event_format(ServiceFormat {
            service,
            inner: Format::default().compact(),
        })
        .with_ansi(true)
        .with_filter(filter);

    tracing_subscriber::registry().with(stdout_log).try_init()
}

/// Seal crates at INFO; the HTTP stack is too chatty at that level.
fn default_filter() -> Targets {
    Targets::new()
        .with_default(Level::INFO)
        .with_target("hyper", Level::WARN)
        .with_target("reqwest", Level::WARN)
        .with_target("tower", Level::WARN)
}
