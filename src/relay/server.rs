//! Relay HTTP/WebSocket server
//!
//! One axum app serves the WebSocket endpoint, the landing and viewer pages,
//! a static directory, and the read-only status API. Each accepted socket
//! gets a reader loop in its own task plus a writer task draining that
//! connection's outbound channel; the registry only ever sees the channel.

use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum_server::tls_rustls::RustlsConfig;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::constants::WS_HEARTBEAT_SECS;
use crate::error::{NetworkError, Result};
use crate::relay::router::{ConnCtx, MessageRouter, RouterAction};
use crate::relay::tls;
use crate::session::{Connection, OutboundFrame, SessionRegistry, SessionStatus};

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Shared state for all handlers.
pub struct AppState {
    pub router: MessageRouter,
    pub config: ServerConfig,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        Self { config, registry }
    }

    /// Build the axum application.
    pub fn app(state: Arc<AppState>) -> axum::Router {
        axum::Router::new()
            .route("/ws", get(ws_handler))
            .route("/", get(landing_page))
            .route("/land.html", get(landing_page))
            .route("/view.html", get(viewer_page))
            .route("/audio_call.html", get(viewer_page))
            .route("/api/status/:uuid", get(connection_status))
            .nest_service("/static", ServeDir::new(&state.config.static_dir))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve until the process exits. TLS is enabled when both
    /// cert and key files are configured.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| NetworkError::BindFailed(format!("{e}")))?;

        let tls_files = match (&self.config.cert_file, &self.config.key_file) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        };

        let state = Arc::new(AppState {
            router: MessageRouter::new(self.registry),
            config: self.config,
        });
        let app = Self::app(state).into_make_service_with_connect_info::<SocketAddr>();

        match tls_files {
            Some((cert, key)) => {
                let rustls_config = RustlsConfig::from_config(Arc::new(
                    tls::load_server_config(&cert, &key)?,
                ));
                tracing::info!(%addr, "Relay listening (wss)");
                axum_server::bind_rustls(addr, rustls_config)
                    .serve(app)
                    .await
                    .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
            }
            None => {
                tracing::info!(%addr, "Relay listening (ws, no TLS)");
                axum_server::bind(addr)
                    .serve(app)
                    .await
                    .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
            }
        }

        Ok(())
    }
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket, addr))
}

/// Drive one WebSocket connection to completion.
async fn handle_socket(state: Arc<AppState>, socket: WebSocket, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let conn = Connection::new(outbound_tx, addr.to_string());
    let mut ctx = ConnCtx::new();

    // Writer task: drains the outbound channel and keeps the socket alive
    // with protocol-level pings.
    let writer = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_SECS));
        heartbeat.tick().await;
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => match frame {
                    Some(OutboundFrame::Text(text)) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                match state.router.handle_text(&mut ctx, &conn, &text) {
                    RouterAction::Continue => {}
                    RouterAction::Disconnect => break,
                    RouterAction::CloseUnauthorized => {
                        // The error reply is already queued ahead of the close.
                        conn.close();
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(remote = %addr, "WebSocket transport error: {}", e);
                break;
            }
        }
    }

    // Tear down only this socket's bindings; the paired endpoint simply
    // stops receiving forwarded traffic.
    state.router.handle_close(&ctx);
    conn.close();
    let _ = writer.await;
}

async fn landing_page(State(state): State<Arc<AppState>>) -> Response {
    serve_page(&state.config.static_dir, "land.html").await
}

async fn viewer_page(State(state): State<Arc<AppState>>) -> Response {
    serve_page(&state.config.static_dir, "view.html").await
}

async fn serve_page(dir: &FsPath, name: &str) -> Response {
    match tokio::fs::read_to_string(dir.join(name)).await {
        Ok(body) => Html(body).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, format!("{} not found", name)).into_response(),
    }
}

/// Read-only snapshot of one identity's pairing state.
async fn connection_status(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Json<ApiResponse<SessionStatus>> {
    Json(ApiResponse::ok(state.router.registry().status(&uuid)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_page_is_404() {
        let response = serve_page(FsPath::new("/nonexistent-dir"), "land.html").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_api_response_shapes() {
        let ok = serde_json::to_value(ApiResponse::ok(5)).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"], 5);
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"], "nope");
    }
}
