// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Diagnostics go to stderr (and optionally a file); stdout carries the
//! JSON reports of the CLI.

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub fn init(verbose: bool) {
    let span_events = span_events_from(env_value("FLEETD_LOG_SPAN_EVENTS").as_deref());
    let format = format_from(env_value("FLEETD_LOG_FORMAT").as_deref());

    let mut layers = vec![fmt_layer(format, span_events.clone(), std::io::stderr, true)];
    if let Some((writer, guard)) = build_file_writer() {
        layers.push(fmt_layer(format, span_events, writer, false));
        let _ = FILE_GUARD.set(guard);
    }
    Registry::default()
        .with(layers)
        .with(tracing_error::ErrorLayer::default())
        .with(build_filter(verbose))
        .init();
}

fn fmt_layer<W>(format: LogFormat, span_events: FmtSpan, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(span_events)
        .with_writer(writer);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    match env::var("FLEETD_LOG") {
        Ok(value) => EnvFilter::new(value),
        Err(_) => {
            if verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("fleetd=info,warn")
            }
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

fn format_from(value: Option<&str>) -> LogFormat {
    match value {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn span_events_from(value: Option<&str>) -> FmtSpan {
    match value {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var("FLEETD_LOG_FILE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_falls_back_to_compact() {
        assert_eq!(format_from(Some("json")), LogFormat::Json);
        assert_eq!(format_from(Some("pretty")), LogFormat::Pretty);
        assert_eq!(format_from(Some("xml")), LogFormat::Compact);
        assert_eq!(format_from(None), LogFormat::Compact);
    }

    #[test]
    fn span_events_parse() {
        assert_eq!(span_events_from(Some("close")), FmtSpan::CLOSE);
        assert_eq!(span_events_from(None), FmtSpan::NONE);
    }
}
