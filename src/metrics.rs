//! Prometheus metrics for the dashboard poller.
//!
//! Exposes:
//! - `chat_dashboard_fetch_duration_seconds` (histogram)
//! - `chat_dashboard_fetch_total` (counter with trigger and status)
//! - `chat_dashboard_fetch_inflight` (gauge)
//! - `chat_dashboard_records` (gauge, records in the last successful fetch)
//! - process metrics via `process` collector
//!
//! The optional HTTP endpoint also answers `/healthz`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static FETCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 50ms up to ~3 minutes.
    let buckets =
        prometheus::exponential_buckets(0.05, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "chat_dashboard_fetch_duration_seconds",
        "Webhook fetch duration in seconds",
        &["trigger"],
        buckets
    )
    .expect("failed to register fetch duration histogram")
});

static FETCH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chat_dashboard_fetch_total",
        "Total webhook fetches by status",
        &["trigger", "status"]
    )
    .expect("failed to register fetch counter")
});

static FETCH_INFLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "chat_dashboard_fetch_inflight",
        "Number of in-flight webhook fetches",
        &["trigger"]
    )
    .expect("failed to register inflight gauge")
});

static RECORDS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "chat_dashboard_records",
        "Valid records returned by the last successful fetch"
    )
    .expect("failed to register records gauge")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&FETCH_DURATION);
    Lazy::force(&FETCH_TOTAL);
    Lazy::force(&FETCH_INFLIGHT);
    Lazy::force(&RECORDS);
}

/// Increment inflight gauge for a fetch.
pub fn record_fetch_start(trigger: &'static str) {
    init_collectors();
    FETCH_INFLIGHT.with_label_values(&[trigger]).inc();
}

/// Record fetch completion with duration and status.
pub fn record_fetch_result(trigger: &'static str, duration: Duration, status: &'static str) {
    init_collectors();
    FETCH_INFLIGHT.with_label_values(&[trigger]).dec();
    FETCH_DURATION
        .with_label_values(&[trigger])
        .observe(duration.as_secs_f64());
    FETCH_TOTAL.with_label_values(&[trigger, status]).inc();
}

pub fn record_record_count(count: usize) {
    init_collectors();
    RECORDS.set(count as i64);
}

/// Tracks one fetch; a guard dropped without `finish` counts as cancelled.
pub struct FetchTimer {
    trigger: &'static str,
    started: Instant,
    finished: bool,
}

impl FetchTimer {
    pub fn start(trigger: &'static str) -> Self {
        record_fetch_start(trigger);
        Self {
            trigger,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn finish(mut self, success: bool) {
        self.finished = true;
        record_fetch_result(
            self.trigger,
            self.started.elapsed(),
            if success { "ok" } else { "error" },
        );
    }
}

impl Drop for FetchTimer {
    fn drop(&mut self) {
        if !self.finished {
            record_fetch_result(self.trigger, self.started.elapsed(), "cancelled");
        }
    }
}

type MetricsBody = Full<Bytes>;

fn text_response(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Response<MetricsBody> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// Prometheus text exposition of the default registry.
fn render_metrics() -> Response<MetricsBody> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => text_response(StatusCode::OK, encoder.format_type(), buffer),
        Err(err) => {
            error!("Failed to encode metrics: {}", err);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "encode error",
            )
        }
    }
}

async fn route(req: Request<Incoming>) -> Result<Response<MetricsBody>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => render_metrics(),
        "/healthz" => text_response(StatusCode::OK, "text/plain", "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", Bytes::new()),
    };
    Ok(response)
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "📈 Dashboard metrics listening on /metrics");

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            let conn =
                http1::Builder::new().serve_connection(TokioIo::new(stream), service_fn(route));
            if let Err(err) = conn.await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}
