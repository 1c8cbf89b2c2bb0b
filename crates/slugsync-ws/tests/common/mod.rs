//! Mock feed server for integration tests.
//!
//! Accepts websocket connections and records every text frame per
//! connection. Tests can push frames to all live connections or kick them.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use slugsync_core::{Slug, SlugSet};
use slugsync_ws::{Operation, SubscriptionRequest};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Control {
    Send(String),
    Kick,
}

/// A mock feed server for testing.
pub struct MockFeedServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    /// Received text frames, one list per accepted connection.
    frames: Arc<Mutex<Vec<Vec<String>>>>,
    control: broadcast::Sender<Control>,
}

impl MockFeedServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let (control, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let frames_clone = frames.clone();
        let control_clone = control.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let index = {
                            let mut frames = frames_clone.lock().await;
                            frames.push(Vec::new());
                            frames.len() - 1
                        };
                        let control_rx = control_clone.subscribe();
                        tokio::spawn(handle_connection(stream, index, frames_clone.clone(), control_rx));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            frames,
            control,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> usize {
        self.frames.lock().await.len()
    }

    /// Text frames received on connection `index`.
    pub async fn frames(&self, index: usize) -> Vec<String> {
        self.frames
            .lock()
            .await
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Subscription requests received on connection `index`, in order.
    pub async fn requests(&self, index: usize) -> Vec<SubscriptionRequest> {
        self.frames(index)
            .await
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// Net subscription set the client asked for on connection `index`.
    pub async fn subscribed(&self, index: usize) -> SlugSet {
        let mut set = SlugSet::new();
        for request in self.requests(index).await {
            match request.operation {
                Operation::Subscribe => set.extend(request.slugs),
                Operation::Unsubscribe => {
                    for slug in &request.slugs {
                        set.remove(slug);
                    }
                }
            }
        }
        set
    }

    /// Push a text frame to every live connection.
    pub fn send(&self, text: impl Into<String>) {
        let _ = self.control.send(Control::Send(text.into()));
    }

    /// Close every live connection from the server side.
    pub fn kick_all(&self) {
        let _ = self.control.send(Control::Kick);
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    index: usize,
    frames: Arc<Mutex<Vec<Vec<String>>>>,
    mut control: broadcast::Receiver<Control>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    frames.lock().await[index].push(text);
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
            ctl = control.recv() => match ctl {
                Ok(Control::Send(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Control::Kick) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

pub fn slugs(items: &[&str]) -> SlugSet {
    items.iter().map(|s| Slug::new(*s).unwrap()).collect()
}

/// Poll `check` until it returns true or `limit` elapses.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(limit, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
