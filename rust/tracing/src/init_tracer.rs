use opentelemetry::trace::TracerProvider;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt;
use tracing_subscriber::Registry;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtelFilterLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for OtelFilterLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OtelFilterLevel::Trace => f.write_str("trace"),
            OtelFilterLevel::Debug => f.write_str("debug"),
            OtelFilterLevel::Info => f.write_str("info"),
            OtelFilterLevel::Warn => f.write_str("warn"),
            OtelFilterLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtelFilter {
    pub crate_name: String,
    pub filter_level: OtelFilterLevel,
}

// Crate names use underscores, matching how rustc exposes them as tracing targets.
const DEFAULT_CRATE_NAMES: [&str; 10] = [
    "chroma_config",
    "chroma_coordinator",
    "chroma_error",
    "chroma_log",
    "chroma_memberlist",
    "chroma_sqlite",
    "chroma_storage",
    "chroma_sysdb",
    "chroma_tracing",
    "chroma_types",
];

pub(crate) fn global_filter_directive(custom_filters: &[OtelFilter]) -> String {
    let defaults = DEFAULT_CRATE_NAMES
        .iter()
        .map(|s| format!("{s}=info"))
        .collect::<Vec<_>>()
        .join(",");
    let custom = custom_filters
        .iter()
        .map(|custom_filter| {
            format!(
                "{}={}",
                custom_filter.crate_name, custom_filter.filter_level
            )
        })
        .collect::<Vec<_>>();
    if custom.is_empty() {
        format!("error,opentelemetry_sdk=info,{defaults}")
    } else {
        format!("error,opentelemetry_sdk=info,{defaults},{}", custom.join(","))
    }
}

pub fn init_global_filter_layer(
    custom_filters: &[OtelFilter],
) -> Box<dyn Layer<Registry> + Send + Sync> {
    let directive = std::env::var("RUST_LOG").unwrap_or(global_filter_directive(custom_filters));
    EnvFilter::new(directive).boxed()
}

/// Builds the OTLP span layer and installs the global meter provider.
/// Returns `None` when the exporters cannot be built; the process keeps
/// logging to stdout in that case.
pub fn init_otel_layer(
    service_name: &str,
    otel_endpoint: &str,
) -> Option<Box<dyn Layer<Registry> + Send + Sync>> {
    let resource = opentelemetry_sdk::Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new(
            "service.pod_name",
            std::env::var("HOSTNAME").unwrap_or("unknown".to_string()),
        ),
    ]);

    let span_exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otel_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(err) => {
            eprintln!("Failed to build OTLP span exporter for {otel_endpoint}: {err}");
            return None;
        }
    };
    let trace_config = opentelemetry_sdk::trace::Config::default().with_resource(resource.clone());
    let tracer_provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(span_exporter, opentelemetry_sdk::runtime::Tokio)
        .with_config(trace_config)
        .build();
    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);

    let metrics_endpoint = std::env::var("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT")
        .unwrap_or(otel_endpoint.to_string());
    match opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(metrics_endpoint)
        .build()
    {
        Ok(metric_exporter) => {
            let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(
                metric_exporter,
                opentelemetry_sdk::runtime::Tokio,
            )
            .build();
            let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
                .with_reader(reader)
                .with_resource(resource)
                .build();
            global::set_meter_provider(meter_provider);
        }
        Err(err) => {
            eprintln!("Failed to build OTLP metric exporter: {err}");
        }
    }

    Some(tracing_opentelemetry::OpenTelemetryLayer::new(tracer).boxed())
}

pub fn init_stdout_layer() -> Box<dyn Layer<Registry> + Send + Sync> {
    fmt::layer().pretty().with_target(false).boxed()
}

pub fn init_tracing(layers: Vec<Box<dyn Layer<Registry> + Send + Sync>>) {
    global::set_text_map_propagator(TraceContextPropagator::new());
    let Some(layers) = layers.into_iter().reduce(|a, b| Box::new(a.and_then(b))) else {
        return;
    };
    let subscriber = tracing_subscriber::registry().with(layers);
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Global tracing subscriber already set: {err}");
        return;
    }
    tracing::info!("Global tracing subscriber set");
}

pub fn init_panic_tracing_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();

        let payload = if let Some(s) = payload.downcast_ref::<&str>() {
            Some(&**s)
        } else {
            payload.downcast_ref::<String>().map(|s| s.as_str())
        };

        tracing::error!(
            panic.payload = payload,
            panic.location = panic_info.location().map(|l| l.to_string()),
            panic.backtrace = tracing::field::display(std::backtrace::Backtrace::capture()),
            "A panic occurred"
        );

        prev_hook(panic_info);
    }));
}

/// Installs filtering, OTLP export (when an endpoint is given) and stdout logging.
pub fn init_otel_tracing(
    service_name: &str,
    custom_filters: &[OtelFilter],
    otel_endpoint: Option<&str>,
) {
    // The global filter applies to all subsequent layers
    let mut layers = vec![init_global_filter_layer(custom_filters)];
    if let Some(endpoint) = otel_endpoint.filter(|endpoint| !endpoint.is_empty()) {
        if let Some(otel_layer) = init_otel_layer(service_name, endpoint) {
            layers.push(otel_layer);
        }
    }
    layers.push(init_stdout_layer());
    init_tracing(layers);
    init_panic_tracing_hook();
}

/// Stdout-only logging, for local runs without a collector.
pub fn init_stdout_tracing(custom_filters: &[OtelFilter]) {
    init_tracing(vec![
        init_global_filter_layer(custom_filters),
        init_stdout_layer(),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_includes_custom_filters() {
        let directive = global_filter_directive(&[OtelFilter {
            crate_name: "kube_runtime".to_string(),
            filter_level: OtelFilterLevel::Warn,
        }]);
        assert!(directive.starts_with("error,"));
        assert!(directive.contains("chroma_sysdb=info"));
        assert!(directive.ends_with("kube_runtime=warn"));
        assert!(EnvFilter::try_new(&directive).is_ok());
    }

    #[test]
    fn test_filter_level_serde() {
        let filter: OtelFilter =
            serde_json::from_str(r#"{"crate_name":"chroma_log","filter_level":"debug"}"#).unwrap();
        assert_eq!(filter.filter_level, OtelFilterLevel::Debug);
        assert_eq!(filter.filter_level.to_string(), "debug");
    }
}
