//! Logging and metrics setup shared by the iotwatch binaries.
//!
//! Logs go to stdout, either in the compact human readable format or as JSON
//! lines when `RUST_LOG_FORMAT=json`. Metrics and traces are exported over
//! OTLP only when `OTEL_SDK_DISABLED=false`; otherwise the meter provider is
//! installed without readers and instruments are effectively no-ops.

use std::borrow::Cow;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{InstrumentationScope, global};
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::{prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
};

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const OTEL_METRIC_EXPORT_INTERVAL: &str = "OTEL_METRIC_EXPORT_INTERVAL";
const RUST_LOG_FORMAT: &str = "RUST_LOG_FORMAT";
const DEPLOY_ENV: &str = "DEPLOY_ENV";

const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_LOG_LEVEL: &str = "INFO";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("Failed to build exporter"))]
    Exporter { source: ExporterBuildError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Observability settings read from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityOptions {
    pub log_format: LogFormat,
    /// OTLP export. Off unless `OTEL_SDK_DISABLED=false`.
    pub export_enabled: bool,
    pub export_interval: Duration,
    /// Reported as the `deployment.environment` resource attribute.
    pub environment: Option<String>,
}

impl ObservabilityOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_format = match lookup(RUST_LOG_FORMAT).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        // The otel sdk doesn't follow the disabled env variable flag,
        // so we implement it here and default to disabled.
        let export_enabled = lookup(OTEL_SDK_DISABLED).is_some_and(|v| v == "false");

        let export_interval = lookup(OTEL_METRIC_EXPORT_INTERVAL)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_EXPORT_INTERVAL);

        Self {
            log_format,
            export_enabled,
            export_interval,
            environment: lookup(DEPLOY_ENV).filter(|v| !v.is_empty()),
        }
    }
}

/// Returns a meter from the global meter provider.
///
/// Before [`init_observability`] runs this is a no-op meter, which is what
/// tests rely on.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

pub fn init_observability(
    package_name: impl Into<Cow<'static, str>>,
    package_version: impl Into<Cow<'static, str>>,
) -> Result<(), ObservabilityError> {
    let options = ObservabilityOptions::from_env();
    let service = Service {
        name: package_name.into(),
        version: package_version.into(),
    };

    let layers = vec![log_layer(options.log_format), otel_layer(&service, &options)?];

    tracing_subscriber::registry().with(layers).init();

    Ok(())
}

struct Service {
    name: Cow<'static, str>,
    version: Cow<'static, str>,
}

impl Service {
    fn resource(&self, environment: Option<&str>) -> Resource {
        let mut attributes = vec![KeyValue::new("service.version", self.version.to_string())];
        if let Some(environment) = environment {
            attributes.push(KeyValue::new("deployment.environment", environment.to_string()));
        }

        Resource::builder()
            .with_service_name(self.name.to_string())
            .with_attributes(attributes)
            .build()
    }

    fn scope(&self) -> InstrumentationScope {
        InstrumentationScope::builder(self.name.clone())
            .with_version(self.version.clone())
            .build()
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

fn log_layer<S>(format: LogFormat) -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(env_filter())
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_filter(env_filter())
            .boxed(),
    }
}

fn tracer_provider(
    resource: Resource,
    export_enabled: bool,
) -> Result<SdkTracerProvider, ObservabilityError> {
    let builder = SdkTracerProvider::builder().with_resource(resource);
    if !export_enabled {
        return Ok(builder.build());
    }

    let exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .context(ExporterSnafu {})?;
    Ok(builder.with_batch_exporter(exporter).build())
}

fn meter_provider(
    resource: Resource,
    options: &ObservabilityOptions,
) -> Result<SdkMeterProvider, ObservabilityError> {
    let builder = MeterProviderBuilder::default().with_resource(resource);
    if !options.export_enabled {
        return Ok(builder.build());
    }

    let exporter = MetricExporter::builder()
        .with_tonic()
        .build()
        .context(ExporterSnafu {})?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(options.export_interval)
        .build();
    Ok(builder.with_reader(reader).build())
}

fn otel_layer<S>(
    service: &Service,
    options: &ObservabilityOptions,
) -> Result<BoxedLayer<S>, ObservabilityError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let resource = service.resource(options.environment.as_deref());

    let tracer = tracer_provider(resource.clone(), options.export_enabled)?
        .tracer_with_scope(service.scope());
    let meters = meter_provider(resource, options)?;

    global::set_meter_provider(meters.clone());

    Ok(env_filter()
        .and_then(MetricsLayer::new(meters))
        .and_then(tracing_opentelemetry::layer().with_tracer(tracer))
        .boxed())
}
