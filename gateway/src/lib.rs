pub mod breaker;
pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod orchestrator;
pub mod partner;
pub mod protocol;
pub mod repository;

#[cfg(test)]
mod testutils;

use crate::breaker::CircuitBreakerRegistry;
use crate::cache::PartnerCache;
use crate::client::PartnerHttpClient;
use crate::codec::SecretCodec;
use crate::errors::GatewayError;
use crate::orchestrator::BroadcastOrchestrator;
use crate::protocol::{BroadcastReport, BroadcastRequest};
use crate::repository::InMemoryPartnerRepository;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::{make_error_response, run_http_service};
use std::pin::Pin;
use std::sync::Arc;

/// Builds the long-lived components from config and serves the gateway
/// until interrupted, then drains in-flight broadcasts.
pub async fn run(config: config::Config) -> Result<(), GatewayError> {
    let encryption_key = std::env::var("GATEWAY_ENCRYPTION_KEY")
        .ok()
        .or_else(|| config.encryption_key.clone())
        .unwrap_or_default();

    let repository = Arc::new(InMemoryPartnerRepository::seeded(config.partners.clone()));
    let cache = Arc::new(PartnerCache::new(
        repository,
        SecretCodec::new(encryption_key),
        &config.cache,
    ));
    cache.preload().await;

    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));
    let _sweeper = breakers.spawn_sweeper();

    let client = Arc::new(PartnerHttpClient::new(breakers));
    let orchestrator = Arc::new(BroadcastOrchestrator::new(
        cache,
        client,
        config.broadcast.clone(),
    ));

    let service = GatewayService::new(orchestrator.clone());

    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        "Starting broadcast gateway"
    );
    run_http_service(&config.listener.host, config.listener.port, service, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Interrupt received");
    })
    .await?;

    orchestrator.shutdown().await;
    Ok(())
}

/// Thin inbound surface: decodes the request envelope, delegates to the
/// orchestrator and maps the report onto HTTP statuses.
pub struct GatewayService {
    orchestrator: Arc<BroadcastOrchestrator>,
}

impl GatewayService {
    pub fn new(orchestrator: Arc<BroadcastOrchestrator>) -> Self {
        GatewayService { orchestrator }
    }
}

impl<B> Service<Request<B>> for GatewayService
where
    B: hyper::body::Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<Full<Bytes>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let orchestrator = self.orchestrator.clone();

        match (req.method().clone(), req.uri().path()) {
            (Method::POST, "/api/v1/broadcast/start-charging") => {
                Box::pin(async move { handle_start_charging(orchestrator, req).await })
            }
            (Method::GET, "/api/v1/broadcast/health") => Box::pin(async move {
                Ok(Response::new(Full::new(Bytes::from(
                    "Broadcast gateway is healthy",
                ))))
            }),
            _ => Box::pin(async move {
                Ok(make_error_response(StatusCode::NOT_FOUND).map(Full::new))
            }),
        }
    }
}

async fn handle_start_charging<B>(
    orchestrator: Arc<BroadcastOrchestrator>,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, GatewayError>
where
    B: hyper::body::Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Ok(make_error_response(StatusCode::BAD_REQUEST).map(Full::new)),
    };

    let request = match BroadcastRequest::from_bytes(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed broadcast request");
            return Ok(error_body(StatusCode::BAD_REQUEST, "Malformed request body"));
        }
    };

    // Validated before the orchestrator ever runs
    if request.uid.trim().is_empty() {
        return Ok(error_body(StatusCode::BAD_REQUEST, "UID is required"));
    }

    tracing::info!(uid = %request.uid, "Received start-charging request");

    match orchestrator.broadcast_start_charging(&request).await {
        Ok(report) => report_response(&report),
        Err(GatewayError::ShuttingDown) => {
            Ok(make_error_response(StatusCode::SERVICE_UNAVAILABLE).map(Full::new))
        }
        Err(e) => {
            tracing::error!(uid = %request.uid, error = %e, "Broadcast error");
            Ok(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Internal server error: {e}"),
            ))
        }
    }
}

/// 200 for a successful broadcast, 400 with the full report otherwise.
fn report_response(report: &BroadcastReport) -> Result<Response<Full<Bytes>>, GatewayError> {
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    let bytes = report
        .to_bytes()
        .map_err(|e| GatewayError::ResponseSerializationError(e.to_string()))?;
    Ok(json_response(status, bytes))
}

fn error_body(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({"success": false, "message": message});
    json_response(status, Bytes::from(body.to_string()))
}

fn json_response(status: StatusCode, bytes: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    response
}
