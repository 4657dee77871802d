//! Prometheus metrics for the control plane

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;

pub struct Metrics {
    registry: Registry,

    pub devices_connected: IntGauge,
    pub gateway_connected: IntGaugeVec,
    pub device_streams_ended: IntCounterVec,
    pub login_requests: IntCounterVec,
    pub gateway_configs_returned: IntCounterVec,
    pub privileged_users: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let devices_connected = IntGauge::with_opts(Opts::new(
            "wardgate_apiserver_devices_connected",
            "Devices with an open configuration stream",
        ))?;
        registry.register(Box::new(devices_connected.clone()))?;

        let gateway_connected = IntGaugeVec::new(
            Opts::new(
                "wardgate_apiserver_gateway_connected",
                "1 while the gateway holds a configuration stream",
            ),
            &["gateway"],
        )?;
        registry.register(Box::new(gateway_connected.clone()))?;

        let device_streams_ended = IntCounterVec::new(
            Opts::new(
                "wardgate_apiserver_device_streams_ended_total",
                "Device configuration streams ended, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(device_streams_ended.clone()))?;

        let login_requests = IntCounterVec::new(
            Opts::new(
                "wardgate_apiserver_login_requests_total",
                "Login requests, by agent version",
            ),
            &["version"],
        )?;
        registry.register(Box::new(login_requests.clone()))?;

        let gateway_configs_returned = IntCounterVec::new(
            Opts::new(
                "wardgate_apiserver_gateway_configs_returned_total",
                "Gateway configurations computed",
            ),
            &["gateway"],
        )?;
        registry.register(Box::new(gateway_configs_returned.clone()))?;

        let privileged_users = IntGaugeVec::new(
            Opts::new(
                "wardgate_apiserver_privileged_users",
                "Users with an active privileged grant",
            ),
            &["gateway"],
        )?;
        registry.register(Box::new(privileged_users.clone()))?;

        Ok(Self {
            registry,
            devices_connected,
            gateway_connected,
            device_streams_ended,
            login_requests,
            gateway_configs_returned,
            privileged_users,
        })
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serve `/metrics` until `cancel` fires
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Metrics endpoint listening");

    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
