//! Tracing, logging and trace export setup.

use std::{fmt, io::IsTerminal};

use anyhow::Result;
use clap::ValueEnum;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Not exported by opentelemetry_sdk.
const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

const SERVICE_NAME: &str = "kreconcile";

/// Verbosity picked on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
	/// No log output at all.
	Disabled,
	Error,
	Warn,
	Info,
	Debug,
	Trace,
}

impl LogLevel {
	fn directive(self) -> &'static str {
		match self {
			LogLevel::Disabled => "off",
			LogLevel::Error => Level::ERROR.as_str(),
			LogLevel::Warn => Level::WARN.as_str(),
			LogLevel::Info => Level::INFO.as_str(),
			LogLevel::Debug => Level::DEBUG.as_str(),
			LogLevel::Trace => Level::TRACE.as_str(),
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LogLevel::Disabled => write!(f, "disabled"),
			other => write!(f, "{}", other.directive().to_lowercase()),
		}
	}
}

/// Keeps trace export alive; flushes on drop.
pub struct TelemetryGuard {
	_inner: Option<OtelGuard>,
}

struct OtelGuard {
	tracer_provider: SdkTracerProvider,
}

impl Drop for OtelGuard {
	fn drop(&mut self) {
		if let Err(e) = self.tracer_provider.shutdown() {
			eprintln!("Failed to shutdown tracer provider: {e}");
		}
	}
}

fn otel_export_enabled() -> bool {
	std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT).is_ok()
		|| std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT).is_ok()
}

/// `--log-level` wins over `RUST_LOG`, which wins over `info`.
fn filter(log_level: Option<LogLevel>) -> EnvFilter {
	match log_level {
		Some(level) => EnvFilter::new(level.directive()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	}
}

/// Install the global subscriber.
///
/// Logs go to stderr so stdout only carries manifests and diffs: pretty on a
/// terminal, JSON lines otherwise. Spans are additionally exported over OTLP
/// when `OTEL_EXPORTER_OTLP_ENDPOINT` or `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT`
/// is set; the exporter follows the standard `OTEL_*` variables.
pub fn init(log_level: Option<LogLevel>) -> Result<TelemetryGuard> {
	let filter_layer = filter(log_level);

	let fmt_layer = if std::io::stderr().is_terminal() {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.pretty()
			.boxed()
	} else {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.json()
			.boxed()
	};

	if !otel_export_enabled() {
		tracing_subscriber::registry()
			.with(filter_layer)
			.with(fmt_layer)
			.init();
		return Ok(TelemetryGuard { _inner: None });
	}

	let (otel_layer, guard) = init_otel()?;
	tracing_subscriber::registry()
		.with(filter_layer)
		.with(fmt_layer)
		.with(otel_layer)
		.init();

	Ok(TelemetryGuard {
		_inner: Some(guard),
	})
}

fn init_otel<S>() -> Result<(impl Layer<S>, OtelGuard)>
where
	S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
	// The builder picks up OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES itself.
	let mut resource = Resource::builder();
	if std::env::var(OTEL_SERVICE_NAME).is_err() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let protocol = std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL);
	let exporter = match protocol
		.as_deref()
		.unwrap_or(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
	{
		"grpc" => opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.build()?,
		_ => opentelemetry_otlp::SpanExporter::builder()
			.with_http()
			.build()?,
	};

	let tracer_provider = SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build();
	opentelemetry::global::set_tracer_provider(tracer_provider.clone());

	let layer = tracing_opentelemetry::layer()
		.with_error_records_to_exceptions(true)
		.with_tracer(tracer_provider.tracer(SERVICE_NAME));

	Ok((layer, OtelGuard { tracer_provider }))
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::disabled(LogLevel::Disabled, "off", "disabled")]
	#[case::warn(LogLevel::Warn, "WARN", "warn")]
	#[case::trace(LogLevel::Trace, "TRACE", "trace")]
	fn test_log_level(#[case] level: LogLevel, #[case] directive: &str, #[case] display: &str) {
		assert_eq!(level.directive(), directive);
		assert_eq!(level.to_string(), display);
	}
}
