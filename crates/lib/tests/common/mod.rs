//! Local peers for integration tests: an axum HTTP responder and a scripted gateway.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use std::net::TcpListener;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

pub const HELLO: &str = r#"{"op":10,"d":{"heartbeat_interval":45000},"s":null,"t":null}"#;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Names are lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

type Route = dyn Fn(&RecordedRequest) -> (u16, String) + Send + Sync;

/// Local HTTP server that records every request and answers through `route`. Routes run on the
/// blocking pool, so a slow route doesn't hold up fast ones.
pub struct HttpPeer {
    pub port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl HttpPeer {
    pub fn start(route: impl Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let route: Arc<Route> = Arc::new(route);
        let recorded = Arc::clone(&requests);

        let app = Router::new().fallback(
            move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
                let route = Arc::clone(&route);
                let recorded = Arc::clone(&recorded);
                async move {
                    let request = RecordedRequest {
                        method: method.to_string(),
                        path: uri
                            .path_and_query()
                            .map(|p| p.as_str().to_string())
                            .unwrap_or_else(|| uri.path().to_string()),
                        headers: headers
                            .iter()
                            .map(|(name, value)| {
                                (
                                    name.as_str().to_string(),
                                    value.to_str().unwrap_or_default().to_string(),
                                )
                            })
                            .collect(),
                        body: String::from_utf8_lossy(&body).into_owned(),
                    };
                    recorded.lock().unwrap().push(request.clone());
                    let (status, body) = tokio::task::spawn_blocking(move || route(&request))
                        .await
                        .expect("route panicked");
                    (
                        StatusCode::from_u16(status).expect("valid status"),
                        [(header::CONTENT_TYPE, "application/json")],
                        body,
                    )
                }
            },
        );

        let (port_tx, port_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("peer runtime");
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind http peer");
                let port = listener.local_addr().expect("local_addr").port();
                port_tx.send(port).expect("report port");
                axum::serve(listener, app).await.expect("serve http peer");
            });
        });
        let port = port_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("http peer started");

        Self { port, requests }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// What the gateway peer saw from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Text(String),
    Closed(Option<u16>),
}

/// Accepts one WebSocket client, sends HELLO, waits for `expect_frames` text frames, then sends
/// `script` one message per entry and reports everything it receives until the client closes.
pub fn start_gateway_peer(script: Vec<String>, expect_frames: usize) -> (u16, mpsc::Receiver<PeerEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind gateway peer");
    let port = listener.local_addr().expect("local_addr").port();
    listener.set_nonblocking(true).expect("nonblocking");
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("peer runtime");
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).expect("tokio listener");
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("websocket accept");
            ws.send(Message::Text(HELLO.to_string())).await.expect("send hello");

            let mut seen = 0;
            while seen < expect_frames {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        seen += 1;
                        let _ = tx.send(PeerEvent::Text(text));
                    }
                    Some(Ok(_)) => {}
                    _ => return,
                }
            }

            for piece in script {
                ws.send(Message::Text(piece)).await.expect("send scripted frame");
                tokio::time::sleep(Duration::from_millis(5)).await;
            }

            while let Some(message) = ws.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let _ = tx.send(PeerEvent::Text(text));
                    }
                    Ok(Message::Close(frame)) => {
                        let _ = tx.send(PeerEvent::Closed(frame.map(|f| u16::from(f.code))));
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    });

    (port, rx)
}

/// Wait for the next text frame from the client, parsed as JSON.
pub fn next_frame(rx: &mpsc::Receiver<PeerEvent>) -> serde_json::Value {
    match rx.recv_timeout(Duration::from_secs(5)).expect("peer event") {
        PeerEvent::Text(text) => serde_json::from_str(&text).expect("client sent JSON"),
        PeerEvent::Closed(code) => panic!("client closed early ({:?})", code),
    }
}
