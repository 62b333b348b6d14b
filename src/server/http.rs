//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection and hand-rolled
//! `(Method, path)` routing.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::backend::{self, SecretBackend};
use crate::config::Args;
use crate::custody::CustodyClient;
use crate::export::ExportPipeline;
use crate::handshake::{spawn_handshake_task, HandshakeClient, KeyPairStore};
use crate::health::{spawn_health_monitor, HealthMonitor};
use crate::routes;
use crate::store::{CredentialStore, KdfParams, StoreConfig};
use crate::types::BridgeError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Session, verify and health-check keys
    pub store: Arc<CredentialStore>,
    pub backend: Arc<dyn SecretBackend>,
    pub export: ExportPipeline,
    pub handshake: Arc<HandshakeClient>,
    pub health: Arc<HealthMonitor>,
    pub started_at: Instant,
}

impl AppState {
    /// Build the state from configuration. Fails when the store cannot open.
    pub async fn new(args: Args) -> Result<Self, BridgeError> {
        Self::with_kdf(args, KdfParams::default()).await
    }

    pub async fn with_kdf(args: Args, kdf: KdfParams) -> Result<Self, BridgeError> {
        let secret = args
            .store_secret()
            .ok_or_else(|| BridgeError::Configuration("SECURE_STORE_SECRET is required".into()))?;

        let store = Arc::new(
            CredentialStore::open(
                StoreConfig::new(&args.secure_store_path, secret).with_kdf(kdf),
            )
            .await?,
        );

        let backend = backend::from_handler(&args.handler, &args.storage_root)
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;

        let custody = CustodyClient::new(&args.custody_url, args.request_timeout())
            .map_err(|e| BridgeError::Configuration(format!("HTTP client: {e}")))?;

        let export = ExportPipeline::new(Arc::clone(&backend))
            .with_concurrency(args.export_concurrency)
            .with_page_size(args.list_page_size);

        let handshake = Arc::new(HandshakeClient::new(
            custody.clone(),
            Arc::clone(&store),
            KeyPairStore::new(&args.key_dir),
            args.url.clone(),
            args.api_key.clone(),
        ));

        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&backend),
            custody,
            Arc::clone(&store),
            args.url.clone(),
        ));

        Ok(Self {
            args,
            store,
            backend,
            export,
            handshake,
            health,
            started_at: Instant::now(),
        })
    }
}

/// Start background tasks and serve until `shutdown` is notified.
pub async fn run(state: Arc<AppState>, shutdown: Arc<Notify>) -> Result<(), BridgeError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        listen = %state.args.listen,
        backend = state.backend.name(),
        "Custody bridge listening"
    );

    let handshake_task =
        spawn_handshake_task(Arc::clone(&state.handshake), state.args.handshake_schedule());
    let health_task =
        spawn_health_monitor(Arc::clone(&state.health), state.args.health_check_interval());

    loop {
        let accepted = tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move {
                            debug!(peer = %addr, method = %req.method(), path = %req.uri().path(), "Request");
                            Ok::<_, hyper::Error>(handle_request(state, req).await)
                        }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }

    handshake_task.abort();
    health_task.abort();
    info!("Custody bridge stopped accepting connections");
    Ok(())
}

/// Route a request. Errors become JSON error responses.
pub async fn handle_request<B>(state: Arc<AppState>, req: Request<B>) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let req = match read_body(req).await {
        Ok(req) => req,
        Err(e) => return to_boxed(error_response(&e)),
    };

    let result = match (method, path.as_str()) {
        (Method::GET, "/health") => Ok(to_boxed(routes::health::handle_health(&state))),
        (Method::POST, "/healthz") => routes::health::handle_healthz(&state, req).await.map(to_boxed),
        (Method::POST, "/get-key") => routes::keys::handle_get_key(&state, req).await.map(to_boxed),
        (Method::POST, "/set-key") => routes::keys::handle_set_key(&state, req).await.map(to_boxed),
        (Method::POST, "/export") => routes::export::handle_export(&state, req).await,
        _ => Ok(to_boxed(not_found_response(&path))),
    };

    result.unwrap_or_else(|e| {
        match e.status_code() {
            s if s.is_server_error() => error!(path = %path, error = %e, "Request failed"),
            _ => warn!(path = %path, error = %e, "Request rejected"),
        }
        to_boxed(error_response(&e))
    })
}

/// Buffer the request body, bounded by [`MAX_BODY_BYTES`].
async fn read_body<B>(req: Request<B>) -> Result<Request<Bytes>, BridgeError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let bytes = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| BridgeError::Validation(format!("Unreadable request body: {e}")))?
        .to_bytes();
    Ok(Request::from_parts(parts, bytes))
}

pub fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// JSON response with the given status
pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Error response from the bridge taxonomy
pub fn error_response(err: &BridgeError) -> Response<Full<Bytes>> {
    json_response(err.status_code(), &err.to_json())
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    json_response(StatusCode::NOT_FOUND, &body)
}
