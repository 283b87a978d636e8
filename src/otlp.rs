use opentelemetry::{global, trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, SdkTracerProvider},
    Resource,
};
use opentelemetry_semantic_conventions::attribute::DEPLOYMENT_ENVIRONMENT_NAME;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Data, Request, Response,
};
use tracing::{field::Empty, Span};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");

fn exporting_provider(endpoint: &str) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let environment = std::env::var("ROCKET_PROFILE").unwrap_or_else(|_| "dev".to_string());
    let resource = Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_attribute(KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, environment))
        .build();

    Ok(SdkTracerProvider::builder()
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

/// Installs the global subscriber: an env filter (default `info`), the fmt
/// layer, and an OTLP exporter when `endpoint` is set.
pub fn init_tracing_subscriber(endpoint: Option<String>) -> anyhow::Result<OtelGuard> {
    let provider = endpoint
        .as_deref()
        .map(exporting_provider)
        .transpose()?;

    let otel_layer = provider
        .as_ref()
        .map(|provider| OpenTelemetryLayer::new(provider.tracer(SERVICE_NAME)));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .try_init()?;

    match &provider {
        Some(provider) => {
            global::set_tracer_provider(provider.clone());
            global::set_text_map_propagator(TraceContextPropagator::new());
        }
        None => tracing::warn!("No OTLP_ENDPOINT specified, not enabling opentelemetry"),
    }

    Ok(OtelGuard { provider })
}

/// Flushes pending spans on drop.
pub struct OtelGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to flush traces");
            }
        }
    }
}

struct RequestSpan(Span);

fn span_name(method: &str, route: Option<&str>) -> String {
    match route {
        Some(route) => format!("{} {}", method, route),
        None => method.to_string(),
    }
}

/// Opens one span per request, named after the matched route once routing
/// is done, and records the response status on it.
pub struct TracingFairing;

#[rocket::async_trait]
impl Fairing for TracingFairing {
    fn info(&self) -> Info {
        Info {
            name: "Tracing Fairing",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        let span = tracing::info_span!(
            "request",
            otel.name = Empty,
            http.request.method = %req.method(),
            url.path = %req.uri().path(),
            http.response.status_code = Empty,
        );
        req.local_cache(|| RequestSpan(span));
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let span = &req.local_cache(|| RequestSpan(Span::none())).0;
        let route = req.route().map(|route| route.uri.to_string());
        let name = span_name(req.method().as_str(), route.as_deref());
        span.record("otel.name", name.as_str());
        span.record("http.response.status_code", res.status().code);
        span.in_scope(|| tracing::debug!(status = res.status().code, "Request finished"));
    }
}

#[cfg(test)]
mod tests {
    use super::span_name;

    #[test]
    fn test_span_name_uses_the_matched_route() {
        assert_eq!(
            span_name("GET", Some("/team/get?<team_name>")),
            "GET /team/get?<team_name>"
        );
        assert_eq!(span_name("POST", None), "POST");
    }
}
