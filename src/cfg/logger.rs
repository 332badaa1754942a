// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt::Write as _;

use anyhow::Context;
use chrono::Local;
use tracing::{Event, Subscriber, field::Visit, span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FmtContext, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
};

/// Span extension holding the worker name of a component span, e.g.
/// `listener`, `thread-pool-0` or `garbage-collector`. Spans opt in by
/// carrying a `name` field.
struct WorkerName(String);

struct CaptureWorkerNameLayer;

impl<S> Layer<S> for CaptureWorkerNameLayer
where S: Subscriber + for<'a> LookupSpan<'a>
{
    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        id: &span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        struct V(Option<String>);
        impl Visit for V {
            fn record_debug(&mut self, f: &tracing::field::Field, v: &dyn std::fmt::Debug) {
                if f.name() == "name" {
                    self.0 = Some(format!("{v:?}").trim_matches('"').to_string());
                }
            }

            fn record_str(&mut self, f: &tracing::field::Field, v: &str) {
                if f.name() == "name" {
                    self.0 = Some(v.to_string());
                }
            }
        }
        let mut vis = V(None);
        attrs.record(&mut vis);
        if let (Some(span), Some(name)) = (ctx.span(id), vis.0) {
            span.extensions_mut().insert(WorkerName(name));
        }
    }
}

/// Renders `YYYY-MM-DD HH:MM:SS.mmm --- [<worker-name>] : <message>`. The
/// worker name is taken from the innermost span carrying a `name` field,
/// falling back to the OS thread name.
struct LineFormatter;

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

        let mut worker = None;
        if let Some(scope) = ctx.event_scope() {
            for span in scope {
                if let Some(WorkerName(name)) = span.extensions().get::<WorkerName>() {
                    worker = Some(name.clone());
                    break;
                }
            }
        }
        let worker = worker.unwrap_or_else(|| {
            std::thread::current().name().unwrap_or("main").to_string()
        });

        struct MessageVisitor<'a>(&'a mut String);
        impl Visit for MessageVisitor<'_> {
            fn record_debug(&mut self, f: &tracing::field::Field, v: &dyn std::fmt::Debug) {
                if f.name() == "message" {
                    let _ = write!(self.0, "{v:?}");
                }
            }

            fn record_str(&mut self, f: &tracing::field::Field, v: &str) {
                if f.name() == "message" {
                    self.0.push_str(v);
                }
            }
        }
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));

        writeln!(writer, "{timestamp} --- [{worker:>15}] : {message}")
    }
}

/// Installs the global subscriber writing proxy-formatted lines to stdout.
/// The returned guard flushes the non-blocking writer on drop; keep it alive
/// for the lifetime of the process.
pub fn init_logger() -> anyhow::Result<WorkerGuard> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .event_format(LineFormatter);

    let subscriber = Registry::default()
        .with(env_filter)
        .with(CaptureWorkerNameLayer)
        .with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    Ok(guard)
}
