use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use runner::Pipeline;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::config::ServeArgs;
use crate::connection::serve_websocket;

/// Bounds the HTTP exchange only. Upgraded sockets run outside the layer.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

async fn healthcheck() -> Response {
    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_websocket(socket, state.pipeline))
}

async fn log_request_response(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    log::debug!("request: {method} {uri}");
    let response = next.run(request).await;
    log::info!(
        "response: {method} {uri} status={} latency_ms={}",
        response.status(),
        start.elapsed().as_millis()
    );
    response
}

/// Every path other than `/healthz` accepts the WebSocket upgrade.
pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/healthz", get(healthcheck))
        .fallback(websocket_handler)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            HANDSHAKE_TIMEOUT,
        ))
        .layer(middleware::from_fn(log_request_response))
        .with_state(AppState { pipeline })
}

pub async fn serve_listener<F>(
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let display_name = pipeline.strategy().display_name().to_owned();
    let app = build_router(pipeline);
    log::info!("{display_name} executor ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server terminated")?;
    log::info!("{display_name} executor stopped");
    Ok(())
}

pub async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let pipeline = args.executor.shared_pipeline()?;
    log::info!(
        "{} executor starting on port {}...",
        pipeline.strategy().display_name(),
        args.port
    );
    let addr = args.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    serve_listener(listener, pipeline, shutdown_signal()).await
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use runner::ExecutionLimits;
    use runner::python::PythonStrategy;
    use tower::ServiceExt;

    use super::*;

    fn router() -> Router {
        let pipeline = Pipeline::new(
            Arc::new(PythonStrategy::new("python_worker")),
            ExecutionLimits::default(),
            1,
        );
        build_router(Arc::new(pipeline))
    }

    #[tokio::test]
    async fn healthcheck_is_not_cached() {
        let response = router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
    }

    #[tokio::test]
    async fn plain_http_is_refused_on_socket_paths() {
        for path in ["/", "/ws", "/anything/else"] {
            let response = router()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert!(response.status().is_client_error(), "{path}");
        }
    }

    #[tokio::test]
    async fn shuts_down_when_signalled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PythonStrategy::new("python_worker")),
            ExecutionLimits::default(),
            1,
        ));
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_listener(listener, pipeline, async move {
            let _ = stopped.await;
        }));
        stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
