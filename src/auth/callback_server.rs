//! HTTP listener for the OAuth redirect.
//!
//! The router runs as its own task on the runtime and never touches the
//! manager directly: each request is queued with a reply slot, and the tick
//! loop drains the queue with [`CallbackServer::next_request`]. Dropping the
//! server signals a graceful shutdown, which releases the port.

use std::net::{Ipv4Addr, SocketAddr};

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
};
use tokio::net::TcpSocket;
use tokio::sync::{mpsc, oneshot};

use super::{pages, CallbackParams};
use crate::error::{Error, Result};

const MAX_PENDING: usize = 8;
const BACKLOG: u32 = 16;

/// What the browser asked for.
#[derive(Clone, Debug)]
pub enum Route {
    Status,
    Callback(CallbackParams),
}

pub struct CallbackRequest {
    pub route: Route,
    pub reply: Responder,
}

struct Reply {
    status: StatusCode,
    html: String,
}

/// Answers one queued request.
pub struct Responder(oneshot::Sender<Reply>);

impl Responder {
    pub fn send(self, status: StatusCode, html: String) {
        if self.0.send(Reply { status, html }).is_err() {
            tracing::debug!("Callback client went away before the reply");
        }
    }
}

pub struct CallbackServer {
    port: u16,
    requests: mpsc::Receiver<CallbackRequest>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl CallbackServer {
    /// Bind on all interfaces so the phone that scanned the QR code can
    /// reach us. Must be called from within the runtime.
    pub fn bind(port: u16) -> Result<Self> {
        let bind_error = |e: std::io::Error| Error::ListenerBind {
            port,
            reason: e.to_string(),
        };
        let socket = TcpSocket::new_v4().map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket
            .bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .map_err(bind_error)?;
        let listener = socket.listen(BACKLOG).map_err(bind_error)?;
        let port = listener.local_addr().map_err(bind_error)?.port();

        let (tx, requests) = mpsc::channel(MAX_PENDING);
        let app = Router::new()
            .route("/", get(status_handler))
            .route("/callback", get(callback_handler))
            .fallback(not_found_handler)
            .with_state(tx);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            match served {
                Ok(()) => tracing::debug!(port, "Callback listener stopped"),
                Err(e) => tracing::warn!(port, error = %e, "Callback listener failed"),
            }
        });

        tracing::debug!(port, "Callback listener started");
        Ok(Self {
            port,
            requests,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Take the next queued request without waiting.
    pub fn next_request(&mut self) -> Option<CallbackRequest> {
        self.requests.try_recv().ok()
    }

    /// Answer everything still queued with `status` and `html`.
    pub fn reject_pending(&mut self, status: StatusCode, html: &str) {
        while let Some(request) = self.next_request() {
            request.reply.send(status, html.to_string());
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

type Requests = mpsc::Sender<CallbackRequest>;

async fn status_handler(State(requests): State<Requests>) -> (StatusCode, Html<String>) {
    forward(&requests, Route::Status).await
}

async fn callback_handler(
    State(requests): State<Requests>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    forward(&requests, Route::Callback(params)).await
}

async fn not_found_handler() -> (StatusCode, Html<String>) {
    (StatusCode::NOT_FOUND, Html(pages::not_found()))
}

async fn forward(requests: &Requests, route: Route) -> (StatusCode, Html<String>) {
    let (tx, rx) = oneshot::channel();
    let request = CallbackRequest {
        route,
        reply: Responder(tx),
    };
    if requests.try_send(request).is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Html(pages::failed("The device is busy, try again")),
        );
    }
    match rx.await {
        Ok(reply) => (reply.status, Html(reply.html)),
        // Listener torn down with the request still queued
        Err(_) => (
            StatusCode::GONE,
            Html(pages::failed("This login is no longer pending")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn get_in_background(url: String) -> tokio::task::JoinHandle<(u16, String)> {
        tokio::spawn(async move {
            let response = reqwest::get(url).await.unwrap();
            let status = response.status().as_u16();
            (status, response.text().await.unwrap())
        })
    }

    async fn wait_for_request(server: &mut CallbackServer) -> CallbackRequest {
        for _ in 0..400 {
            if let Some(request) = server.next_request() {
                return request;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no request arrived");
    }

    #[tokio::test]
    async fn queues_callback_query_and_answers() {
        let mut server = CallbackServer::bind(0).unwrap();
        assert!(server.next_request().is_none());

        let client = get_in_background(format!(
            "http://127.0.0.1:{}/callback?code=abc%2F1&state=xyz",
            server.port()
        ));
        let request = wait_for_request(&mut server).await;
        let Route::Callback(params) = request.route else {
            panic!("expected a callback route");
        };
        assert_eq!(params.code.as_deref(), Some("abc/1"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert_eq!(params.error, None);

        request.reply.send(StatusCode::OK, "<p>done</p>".to_string());
        let (status, body) = client.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "<p>done</p>");
    }

    #[tokio::test]
    async fn unknown_paths_never_reach_the_queue() {
        let mut server = CallbackServer::bind(0).unwrap();
        let (status, body) = get_in_background(format!("http://127.0.0.1:{}/favicon.ico", server.port()))
            .await
            .unwrap();
        assert_eq!(status, 404);
        assert!(body.contains("Not found"));
        assert!(server.next_request().is_none());
    }

    #[tokio::test]
    async fn abandoned_request_is_answered_gone() {
        let mut server = CallbackServer::bind(0).unwrap();
        let client = get_in_background(format!("http://127.0.0.1:{}/", server.port()));
        let request = wait_for_request(&mut server).await;
        assert!(matches!(request.route, Route::Status));

        drop(request);
        let (status, _) = client.await.unwrap();
        assert_eq!(status, 410);
    }

    #[tokio::test]
    async fn dropping_the_server_frees_the_port() {
        let server = CallbackServer::bind(0).unwrap();
        let port = server.port();
        drop(server);

        for _ in 0..100 {
            if let Ok(again) = CallbackServer::bind(port) {
                assert_eq!(again.port(), port);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("port {port} was never released");
    }

    #[tokio::test]
    async fn busy_port_is_a_bind_error() {
        let server = CallbackServer::bind(0).unwrap();
        let err = CallbackServer::bind(server.port()).err().unwrap();
        assert!(matches!(err, Error::ListenerBind { .. }));
    }
}
