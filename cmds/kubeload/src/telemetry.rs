//! Log output and optional OpenTelemetry trace export.

use std::io::IsTerminal;

use anyhow::Result;
use clap::ValueEnum;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::Level;
use tracing_subscriber::{
	layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Not exported by opentelemetry_sdk.
const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

const DEFAULT_SERVICE_NAME: &str = "kubeload";

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
	/// Pretty when stderr is a terminal, JSON otherwise.
	#[default]
	Auto,
	Pretty,
	Json,
}

impl LogFormat {
	fn pretty(self, stderr_is_terminal: bool) -> bool {
		match self {
			Self::Auto => stderr_is_terminal,
			Self::Pretty => true,
			Self::Json => false,
		}
	}
}

/// Transport for the span exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OtlpProtocol {
	Grpc,
	Http,
}

impl OtlpProtocol {
	/// Anything but `grpc` is exported over HTTP.
	fn from_env_value(value: &str) -> Self {
		if value == "grpc" {
			Self::Grpc
		} else {
			Self::Http
		}
	}

	fn from_env() -> Self {
		let value = std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL);
		Self::from_env_value(
			value
				.as_deref()
				.unwrap_or(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT),
		)
	}
}

/// Keeps trace export alive; spans still buffered are flushed when it drops.
#[must_use = "dropping the guard flushes and stops trace export"]
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		let Some(provider) = self.tracer_provider.take() else {
			return;
		};
		if let Err(e) = provider.shutdown() {
			eprintln!("failed to shut down tracer provider: {e}");
		}
	}
}

fn otel_export_enabled() -> bool {
	std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT).is_ok()
		|| std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT).is_ok()
}

/// `--log-level` wins over `RUST_LOG`, which wins over info.
fn env_filter(log_level: Option<Level>) -> EnvFilter {
	match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	}
}

/// Install the global subscriber.
///
/// Trace export is switched on by `OTEL_EXPORTER_OTLP_ENDPOINT` or
/// `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` and otherwise configured through the
/// standard OTEL variables. The service name falls back to "kubeload".
pub fn init(log_level: Option<Level>, format: LogFormat) -> Result<TelemetryGuard> {
	let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
	let fmt_layer = if format.pretty(std::io::stderr().is_terminal()) {
		fmt_layer.pretty().boxed()
	} else {
		fmt_layer.json().boxed()
	};

	let (otel_layer, tracer_provider) = if otel_export_enabled() {
		let (layer, provider) = otel_layer()?;
		(Some(layer), Some(provider))
	} else {
		(None, None)
	};

	tracing_subscriber::registry()
		.with(env_filter(log_level))
		.with(fmt_layer)
		.with(otel_layer)
		.try_init()?;

	Ok(TelemetryGuard { tracer_provider })
}

fn otel_layer<S>() -> Result<(impl Layer<S>, SdkTracerProvider)>
where
	S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
	// The builder already honors OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES
	let mut resource = Resource::builder();
	if std::env::var(OTEL_SERVICE_NAME).is_err() {
		resource = resource.with_service_name(DEFAULT_SERVICE_NAME);
	}

	let exporter = match OtlpProtocol::from_env() {
		OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.build()?,
		OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
			.with_http()
			.build()?,
	};

	let provider = SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build();
	opentelemetry::global::set_tracer_provider(provider.clone());

	let layer = tracing_opentelemetry::layer()
		.with_error_records_to_exceptions(true)
		.with_tracer(provider.tracer(DEFAULT_SERVICE_NAME));
	Ok((layer, provider))
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::auto_on_terminal(LogFormat::Auto, true, true)]
	#[case::auto_piped(LogFormat::Auto, false, false)]
	#[case::forced_pretty(LogFormat::Pretty, false, true)]
	#[case::forced_json(LogFormat::Json, true, false)]
	fn test_log_format_selection(
		#[case] format: LogFormat,
		#[case] terminal: bool,
		#[case] pretty: bool,
	) {
		assert_eq!(format.pretty(terminal), pretty);
	}

	#[test]
	fn test_otlp_protocol_from_env_value() {
		assert_eq!(OtlpProtocol::from_env_value("grpc"), OtlpProtocol::Grpc);
		assert_eq!(
			OtlpProtocol::from_env_value("http/protobuf"),
			OtlpProtocol::Http
		);
		assert_eq!(OtlpProtocol::from_env_value("http/json"), OtlpProtocol::Http);
	}

	#[test]
	fn test_explicit_level_overrides_environment() {
		let filter = env_filter(Some(Level::DEBUG));
		assert_eq!(filter.max_level_hint(), Some(Level::DEBUG.into()));
	}
}
